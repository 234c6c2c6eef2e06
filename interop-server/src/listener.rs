//! Inbound HTTP listener.
//!
//! Every request a peer sends to the listener becomes one inbound [`Event`]
//! on the running machine's queue. The peer's request is held until the
//! event is queued, so a full queue slows the peer down instead of dropping
//! its messages.

use crate::config::ListenerConfig;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use interop_core::MachineHandle;
use interop_protocol::{ContentKind, Event};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Bound, not yet serving, inbound listener.
pub struct Listener {
    listener: TcpListener,
    status: StatusCode,
}

impl Listener {
    /// Binds the configured address.
    pub async fn bind(config: &ListenerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let status = StatusCode::from_u16(config.response_status).unwrap_or(StatusCode::OK);
        Ok(Self { listener, status })
    }

    /// Actual bound address (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` fires, feeding every request to `handle`.
    pub async fn run(self, handle: MachineHandle, mut shutdown: broadcast::Receiver<()>) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Listening for inbound messages on http://{}", addr),
            Err(e) => tracing::warn!("Listener address unavailable: {}", e),
        }

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::debug!("Inbound connection from {}", peer);
                            let handle = handle.clone();
                            let status = self.status;
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let handle = handle.clone();
                                    async move { handle_request(req, handle, status).await }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    tracing::debug!("Inbound connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Listener accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Queues one inbound request as an event.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    handle: MachineHandle,
    status: StatusCode,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let event = decode(req).await?;
    tracing::debug!(event = %event.summary(), "Inbound message");

    let status = match handle.push_event(event).await {
        Ok(()) => status,
        Err(e) => {
            tracing::warn!("Inbound message rejected: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    Ok(response)
}

async fn decode(req: Request<hyper::body::Incoming>) -> Result<Event, hyper::Error> {
    let (parts, body) = req.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut event = Event::request(parts.method.as_str(), path);

    for (name, value) in parts.headers.iter() {
        // Non-UTF-8 header values cannot be compared by guards.
        if let Ok(value) = value.to_str() {
            event = event.with_header(name.as_str(), value);
        }
    }

    let bytes = body.collect().await?.to_bytes();
    if !bytes.is_empty() {
        let kind = parts
            .headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ContentKind::from_content_type)
            .unwrap_or_default();
        event = event.with_body(String::from_utf8_lossy(&bytes), kind);
    }

    Ok(event)
}
