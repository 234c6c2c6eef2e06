//! Outbound message invocation.

use crate::error::{CoreError, ReferenceError};
use crate::reference::{self, ReferenceContext};
use interop_protocol::{join_url, Event, Headers, MessageSpec, Request, Transport};
use std::sync::Arc;
use tracing::debug;

/// Turns message specs into requests and sends them.
#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn Transport>,
}

impl Invoker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Resolves every reference in `spec` against the current run state.
    pub fn prepare(
        spec: &MessageSpec,
        refs: &dyn ReferenceContext,
    ) -> Result<Request, ReferenceError> {
        let base = reference::resolve(&spec.url, refs)?;
        let path = reference::resolve(&spec.path, refs)?;

        let mut headers = Headers::new();
        for (name, value) in spec.headers.iter() {
            headers.insert(name, reference::resolve(value, refs)?);
        }

        let body = match &spec.body {
            Some(text) => Some(reference::resolve(text, refs)?),
            None => None,
        };

        Ok(Request {
            method: spec.method,
            url: join_url(&base, &path),
            headers,
            body,
        })
    }

    /// Sends `spec` from the state labelled `state`.
    ///
    /// Both failure kinds are fatal to a run and never retried.
    pub async fn invoke(
        &self,
        state: &str,
        spec: &MessageSpec,
        refs: &dyn ReferenceContext,
    ) -> Result<Event, CoreError> {
        let request = Self::prepare(spec, refs).map_err(|source| CoreError::Invocation {
            state: state.to_string(),
            source,
        })?;

        debug!(state, request = %request.summary(), "Invoking message");

        self.transport
            .send(&request)
            .await
            .map_err(|source| CoreError::Transport {
                state: state.to_string(),
                source,
            })
    }
}
