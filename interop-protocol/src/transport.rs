//! Pluggable transports.
//!
//! The state machine only needs "send a request, get a normalized response".
//! [`HttpTransport`] covers `http` and `https`; other schemes (CoAP, ...) are
//! supplied by implementing [`Transport`].

use crate::error::TransportError;
use crate::event::{ContentKind, Event};
use crate::message::{Method, Request};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use std::time::Duration;

/// Uniform send/receive contract.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a resolved request and returns the normalized response.
    ///
    /// Implementations must not retry.
    async fn send(&self, request: &Request) -> Result<Event, TransportError>;
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for one request/response round trip.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("interop/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TransportConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// reqwest-backed HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    fn map_error(url: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            TransportError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            TransportError::Http(err)
        }
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<Event, TransportError> {
        let url = reqwest::Url::parse(&request.url).map_err(|e| TransportError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::UnsupportedScheme(request.url.clone()));
        }

        let mut builder = self.client.request(http_method(request.method), url);
        for (name, value) in request.headers.iter() {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            builder = builder.header(header_name, header_value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        tracing::debug!("Sending {}", request.summary());
        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(&request.url, e))?;

        let mut event = Event::response(response.status().as_u16());
        for (name, value) in response.headers() {
            event
                .headers
                .insert(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let kind = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ContentKind::from_content_type)
            .unwrap_or_default();

        let text = response
            .text()
            .await
            .map_err(|e| Self::map_error(&request.url, e))?;
        if !text.is_empty() {
            event = event.with_body(text, kind);
        }

        tracing::debug!("Received {} for {}", event.summary(), request.summary());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Headers;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> HttpTransport {
        let config = TransportConfig::default().with_request_timeout(Duration::from_secs(5));
        HttpTransport::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_send_normalizes_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/7"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-request-id", "abc")
                    .set_body_raw(r#"{"user":{"age":21}}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let request = Request {
            method: Method::Get,
            url: format!("{}/users/7", server.uri()),
            headers: Headers::new(),
            body: None,
        };
        let event = transport().send(&request).await.unwrap();

        assert_eq!(event.status, Some(200));
        assert_eq!(event.headers.get("X-Request-Id"), Some("abc"));
        let body = event.body.unwrap();
        assert_eq!(body.kind, ContentKind::Json);
        assert_eq!(body.text, r#"{"user":{"age":21}}"#);
    }

    #[tokio::test]
    async fn test_send_forwards_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(header("content-type", "application/xml"))
            .and(body_string("<login/>"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let request = Request {
            method: Method::Post,
            url: format!("{}/login", server.uri()),
            headers: [("Content-Type", "application/xml")].into_iter().collect(),
            body: Some("<login/>".to_string()),
        };
        let event = transport().send(&request).await.unwrap();
        assert_eq!(event.status, Some(201));
        assert!(event.body.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let request = Request {
            method: Method::Get,
            url: "coap://localhost/sensors".to_string(),
            headers: Headers::new(),
            body: None,
        };
        let err = transport().send(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let request = Request {
            method: Method::Get,
            url: "not a url".to_string(),
            headers: Headers::new(),
            body: None,
        };
        let err = transport().send(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let request = Request {
            method: Method::Get,
            url: "http://127.0.0.1:1/".to_string(),
            headers: Headers::new(),
            body: None,
        };
        let err = transport().send(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "UNREACHABLE");
    }
}
