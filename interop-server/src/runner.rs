//! Test runner.
//!
//! Wires one pattern run together: outbound transport, the machine, and the
//! inbound listener that feeds it.

use crate::config::Config;
use crate::error::ServerError;
use crate::listener::Listener;
use interop_core::{MachineHandle, Pattern, PatternDescriptor, Report, RunOutcome, StateMachine};
use interop_protocol::{HttpTransport, Transport};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Control surface handed to callers before the run starts.
#[derive(Clone)]
pub struct RunControl {
    pub handle: MachineHandle,
    /// Where peers should send inbound messages, when the listener is on.
    pub listener_addr: Option<SocketAddr>,
}

/// Runs patterns under one configuration.
pub struct TestRunner {
    config: Config,
}

impl TestRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Loads, builds and validates the pattern file at `path`.
    pub fn load_pattern(path: impl AsRef<Path>) -> Result<Pattern, ServerError> {
        let descriptor = PatternDescriptor::load(path)?;
        Ok(Pattern::build(&descriptor)?)
    }

    /// Report matching `runner.realtime_report`: streamed to stdout, or batch.
    pub fn report(&self) -> Report {
        if self.config.runner.realtime_report {
            Report::realtime(std::io::stdout())
        } else {
            Report::batch()
        }
    }

    /// Runs `pattern` to completion.
    pub async fn run(&self, pattern: Pattern, report: Report) -> Result<RunOutcome, ServerError> {
        self.run_with(pattern, report, |_| {}).await
    }

    /// Runs `pattern`, calling `hook` once the machine and listener are up.
    pub async fn run_with<F>(
        &self,
        pattern: Pattern,
        report: Report,
        hook: F,
    ) -> Result<RunOutcome, ServerError>
    where
        F: FnOnce(RunControl),
    {
        let transport = HttpTransport::new(&self.config.transport.to_transport_config())?;
        self.run_with_transport(pattern, Arc::new(transport), report, hook)
            .await
    }

    /// Same as [`TestRunner::run_with`] over a caller-supplied transport.
    pub async fn run_with_transport<F>(
        &self,
        pattern: Pattern,
        transport: Arc<dyn Transport>,
        report: Report,
        hook: F,
    ) -> Result<RunOutcome, ServerError>
    where
        F: FnOnce(RunControl),
    {
        let machine = StateMachine::new(
            pattern,
            transport,
            report,
            self.config.runner.machine_config(),
        );
        let handle = machine.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (listener_addr, listener_task) = if self.config.listener.enabled {
            let listener = Listener::bind(&self.config.listener).await?;
            let addr = listener.local_addr()?;
            let task = tokio::spawn(listener.run(handle.clone(), shutdown_rx));
            (Some(addr), Some(task))
        } else {
            (None, None)
        };

        hook(RunControl {
            handle,
            listener_addr,
        });

        let outcome = machine.start().await;

        // No receiver left means the listener already exited.
        let _ = shutdown_tx.send(());
        if let Some(task) = listener_task {
            if let Err(e) = task.await {
                tracing::warn!("Listener task failed: {}", e);
            }
        }

        tracing::info!(
            run_id = %outcome.run_id,
            success = outcome.success,
            "Test run finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_core::Termination;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HANDSHAKE_YAML: &str = r#"
name: handshake
components:
  peer: PEER_URL
states:
  - label: wait
    type: START
    transitions:
      - kind: guarded
        target: confirm
        guards:
          - { param: path, op: EQUALS, value: /notify }
          - { param: "content($.ok)", op: EQUALS, value: "true" }
  - label: confirm
    type: TRIGGER
    transitions:
      - kind: trigger
        target: check
        message:
          method: POST
          url: $$component.peer$$
          path: /confirm
          body: '{"token":"$$wait|content|$.token$$"}'
          content_type: json
  - label: check
    type: NORMAL
    transitions:
      - kind: guarded
        target: done
        guards:
          - { param: status, op: EQUALS, value: 201 }
      - kind: guarded
        target: rejected
        guards:
          - { param: status, op: NOTEQUALS, value: 201 }
  - label: done
    type: END
    report: peer confirmed the token
  - label: rejected
    type: END
    success: "false"
"#;

    fn pattern(peer: &str) -> Pattern {
        let yaml = HANDSHAKE_YAML.replace("PEER_URL", peer);
        let descriptor = PatternDescriptor::from_yaml_str(&yaml).unwrap();
        Pattern::build(&descriptor).unwrap()
    }

    fn config(listener: bool) -> Config {
        let mut config = Config::default();
        config.listener.enabled = listener;
        config.listener.bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        config
    }

    #[tokio::test]
    async fn test_end_to_end_handshake() {
        let peer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/confirm"))
            .and(body_json(serde_json::json!({"token": "abc"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&peer)
            .await;

        let runner = TestRunner::new(config(true));
        let outcome = runner
            .run_with(pattern(&peer.uri()), Report::batch(), |control| {
                let addr = control.listener_addr.unwrap();
                tokio::spawn(async move {
                    reqwest::Client::new()
                        .post(format!("http://{}/notify", addr))
                        .header("Content-Type", "application/json")
                        .body(r#"{"ok":true,"token":"abc"}"#)
                        .send()
                        .await
                        .unwrap();
                });
            })
            .await
            .unwrap();

        assert!(outcome.success, "{}", outcome.report_text());
        match &outcome.termination {
            Termination::Completed { end_state } => assert_eq!(end_state, "done"),
            other => panic!("unexpected termination {:?}", other),
        }
        assert!(outcome.report_text().contains("peer confirmed the token"));
        assert_eq!(
            outcome.state("check").unwrap().last_event().unwrap().status,
            Some(201)
        );
    }

    #[tokio::test]
    async fn test_peer_rejection_fails_run() {
        let peer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/confirm"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&peer)
            .await;

        let runner = TestRunner::new(config(true));
        let outcome = runner
            .run_with(pattern(&peer.uri()), Report::batch(), |control| {
                let addr = control.listener_addr.unwrap();
                tokio::spawn(async move {
                    reqwest::Client::new()
                        .post(format!("http://{}/notify", addr))
                        .header("Content-Type", "application/json")
                        .body(r#"{"ok":true,"token":"zzz"}"#)
                        .send()
                        .await
                        .unwrap();
                });
            })
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(matches!(
            &outcome.termination,
            Termination::Completed { end_state } if end_state == "rejected"
        ));
    }

    #[tokio::test]
    async fn test_stop_without_listener() {
        let runner = TestRunner::new(config(false));
        let outcome = runner
            .run_with(pattern("http://127.0.0.1:9"), Report::batch(), |control| {
                assert!(control.listener_addr.is_none());
                control.handle.stop();
            })
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(matches!(outcome.termination, Termination::Stopped { .. }));
    }

    #[test]
    fn test_load_pattern_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handshake.yaml");
        std::fs::write(&path, HANDSHAKE_YAML.replace("PEER_URL", "http://127.0.0.1:9")).unwrap();

        let pattern = TestRunner::load_pattern(&path).unwrap();
        assert_eq!(pattern.first(), "wait");
        assert!(pattern.checksum().is_some());
    }

    #[test]
    fn test_load_invalid_pattern_is_core_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(
            &path,
            "name: broken\nstates:\n  - label: done\n    type: END\n",
        )
        .unwrap();

        let err = TestRunner::load_pattern(&path).unwrap_err();
        assert!(matches!(err, ServerError::Core(_)));
        assert_eq!(err.error_code(), "INVALID_PATTERN");
    }

    #[tokio::test]
    async fn test_bind_failure_is_io_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = config(true);
        config.listener.bind_addr = taken.local_addr().unwrap();

        let runner = TestRunner::new(config);
        let err = runner
            .run(pattern("http://127.0.0.1:9"), Report::batch())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "IO_ERROR");
    }
}
