//! The state machine interpreter.
//!
//! One [`StateMachine`] serves exactly one run. [`StateMachine::start`]
//! consumes the machine and drives it state by state:
//!
//! - TRIGGER / TRIGGERSTART: send the sole transition's message, push the
//!   response onto the machine's own event queue and move to the target.
//! - LOOP: evaluate the exit transitions first; if none passes, bump the
//!   counter, send the loop's message again and stay.
//! - START / NORMAL: take the next event from the queue and move along the
//!   first transition whose guards all pass. No match ends the run.
//! - END: the run is complete.
//!
//! Outside code talks to a running machine only through a
//! [`MachineHandle`]: it pushes inbound events into the bounded queue and
//! controls stop and single-step execution.

use crate::error::{CoreError, ReferenceError};
use crate::guard::{GuardInput, GuardVerdict};
use crate::invoker::Invoker;
use crate::pattern::{Pattern, PatternData};
use crate::reference::ReferenceContext;
use crate::report::Report;
use crate::state::{State, StateTable, Transition, TransitionKind};
use chrono::Utc;
use interop_protocol::{Event, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Default capacity of the inbound event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Run-time settings of a machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Events that can wait unconsumed before producers block.
    pub queue_capacity: usize,
    /// Upper bound on waiting for an inbound event; `None` waits forever.
    pub event_timeout: Option<Duration>,
    /// Start with single-step execution enabled.
    pub step_mode: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_timeout: None,
            step_mode: false,
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Termination {
    /// An END state was reached.
    Completed { end_state: String },
    /// The run aborted in `state`.
    Failed { state: String, error: CoreError },
    /// `stop()` was called while in `state`.
    Stopped { state: String },
}

/// Everything left after a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub report: Report,
    pub success: bool,
    pub termination: Termination,
    pub states: StateTable,
}

impl RunOutcome {
    /// Final state of a state, including END annotations.
    pub fn state(&self, label: &str) -> Option<&State> {
        self.states.get(label)
    }

    /// Full trace text.
    pub fn report_text(&self) -> String {
        self.report.output_report()
    }
}

/// Control handle for a machine; cheap to clone and safe to share.
#[derive(Clone)]
pub struct MachineHandle {
    events: mpsc::Sender<Event>,
    stop: Arc<watch::Sender<bool>>,
    step: mpsc::UnboundedSender<u64>,
    step_mode: Arc<AtomicBool>,
    step_epoch: Arc<AtomicU64>,
}

impl MachineHandle {
    /// Enqueues an inbound event, waiting while the queue is full.
    ///
    /// Fails with `QueueClosed` once the run has ended.
    pub async fn push_event(&self, event: Event) -> Result<(), CoreError> {
        self.events
            .send(event)
            .await
            .map_err(|_| CoreError::QueueClosed)
    }

    /// Enqueues an event without waiting.
    pub fn try_push_event(&self, event: Event) -> Result<(), CoreError> {
        self.events.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CoreError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CoreError::QueueClosed,
        })
    }

    /// Enqueues an event from a thread outside the async runtime.
    ///
    /// Panics if called from within an async context, like
    /// [`mpsc::Sender::blocking_send`].
    pub fn blocking_push_event(&self, event: Event) -> Result<(), CoreError> {
        self.events
            .blocking_send(event)
            .map_err(|_| CoreError::QueueClosed)
    }

    /// Ends the run at the next suspension point.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Releases one iteration in step mode. Does nothing outside step mode.
    pub fn next(&self) {
        if self.step_mode() {
            let _ = self.step.send(self.step_epoch.load(Ordering::SeqCst));
        }
    }

    /// Switches single-step execution on or off.
    ///
    /// Releases issued before step mode was last switched on are discarded.
    pub fn set_step_mode(&self, enabled: bool) {
        if enabled {
            if !self.step_mode() {
                self.step_epoch.fetch_add(1, Ordering::SeqCst);
                self.step_mode.store(true, Ordering::SeqCst);
            }
        } else if self.step_mode.swap(false, Ordering::SeqCst) {
            // wake an iteration already waiting for a step
            let _ = self.step.send(self.step_epoch.load(Ordering::SeqCst));
        }
    }

    pub fn step_mode(&self) -> bool {
        self.step_mode.load(Ordering::SeqCst)
    }
}

/// Why a single iteration did not simply advance.
enum Halt {
    Stopped,
    Failed(CoreError),
}

impl From<CoreError> for Halt {
    fn from(err: CoreError) -> Self {
        Halt::Failed(err)
    }
}

/// The interpreter for one run of a pattern.
pub struct StateMachine {
    run_id: Uuid,
    name: String,
    first: String,
    states: StateTable,
    data: PatternData,
    invoker: Invoker,
    report: Report,
    event_timeout: Option<Duration>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    step_tx: mpsc::UnboundedSender<u64>,
    step_rx: mpsc::UnboundedReceiver<u64>,
    step_mode: Arc<AtomicBool>,
    step_epoch: Arc<AtomicU64>,
}

impl StateMachine {
    pub fn new(
        pattern: Pattern,
        transport: Arc<dyn Transport>,
        report: Report,
        config: MachineConfig,
    ) -> Self {
        let name = pattern.name().to_string();
        let (first, states, data) = pattern.into_parts();
        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (step_tx, step_rx) = mpsc::unbounded_channel();

        Self {
            run_id: Uuid::new_v4(),
            name,
            first,
            states,
            data,
            invoker: Invoker::new(transport),
            report,
            event_timeout: config.event_timeout,
            events_tx,
            events_rx,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            step_tx,
            step_rx,
            step_mode: Arc::new(AtomicBool::new(config.step_mode)),
            step_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn handle(&self) -> MachineHandle {
        MachineHandle {
            events: self.events_tx.clone(),
            stop: self.stop_tx.clone(),
            step: self.step_tx.clone(),
            step_mode: self.step_mode.clone(),
            step_epoch: self.step_epoch.clone(),
        }
    }

    /// Runs to an END state, a fatal failure or a stop.
    pub async fn start(mut self) -> RunOutcome {
        let started = Utc::now();
        tracing::info!(run_id = %self.run_id, pattern = %self.name, "Test run started");
        self.report.println(format!(
            "Interoperability test '{}' (run {})",
            self.name, self.run_id
        ));
        self.report
            .println(format!("Started: {}", started.to_rfc3339()));

        let termination = self.run().await;

        let success = match &termination {
            Termination::Completed { end_state } => {
                let (passed, annotation) = match self.states.get(end_state) {
                    Some(state) => (
                        state.is_successful_end(),
                        state.report().map(str::to_string),
                    ),
                    None => (true, None),
                };
                if let Some(text) = annotation {
                    self.report.printtabline(text);
                }
                if passed {
                    self.report
                        .println(format!("SUCCESS: end state '{}' reached", end_state));
                } else {
                    self.report
                        .println(format!("FAILURE: end state '{}' reached", end_state));
                }
                passed
            }
            Termination::Failed { state, error } => {
                tracing::warn!(state = %state, code = error.error_code(), "Test run failed: {}", error);
                self.report.println(format!("FAILURE: {}", error));
                false
            }
            Termination::Stopped { state } => {
                self.report
                    .println(format!("Test execution stopped at state '{}'", state));
                false
            }
        };
        self.report.set_success(success);

        let elapsed = Utc::now() - started;
        self.report.println(format!(
            "Finished: {} ({} ms)",
            Utc::now().to_rfc3339(),
            elapsed.num_milliseconds()
        ));
        tracing::info!(run_id = %self.run_id, success, "Test run finished");

        RunOutcome {
            run_id: self.run_id,
            report: self.report,
            success,
            termination,
            states: self.states,
        }
    }

    async fn run(&mut self) -> Termination {
        let mut current = match self.states.get(&self.first) {
            Some(state) => state.label().to_string(),
            None => {
                return Termination::Failed {
                    state: self.first.clone(),
                    error: CoreError::UnknownState {
                        label: self.first.clone(),
                    },
                }
            }
        };

        loop {
            if self.step_mode.load(Ordering::SeqCst) && !self.wait_for_step().await {
                return Termination::Stopped { state: current };
            }

            if *self.stop_rx.borrow() {
                return Termination::Stopped { state: current };
            }

            let state_type = match self.states.get(&current) {
                Some(state) => state.state_type(),
                None => {
                    return Termination::Failed {
                        error: CoreError::UnknownState {
                            label: current.clone(),
                        },
                        state: current,
                    }
                }
            };
            self.report.println(format!("State: {}", current));
            tracing::debug!(state = %current, kind = %state_type, "Entering state");

            if state_type.is_end() {
                return Termination::Completed { end_state: current };
            }

            let step = if state_type.is_trigger() {
                self.fire_trigger(&current).await.map(Some)
            } else if state_type.is_loop() {
                self.run_loop(&current).await
            } else {
                self.await_event(&current).await.map(Some)
            };

            match step {
                Ok(Some(next)) => current = next,
                Ok(None) => {}
                Err(Halt::Stopped) => return Termination::Stopped { state: current },
                Err(Halt::Failed(error)) => {
                    return Termination::Failed {
                        state: current,
                        error,
                    }
                }
            }
        }
    }

    /// Waits for a release from the current step epoch. `false` means stopped.
    async fn wait_for_step(&mut self) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut self.stop_rx) => return false,
                token = self.step_rx.recv() => match token {
                    Some(epoch) if epoch < self.step_epoch.load(Ordering::SeqCst) => continue,
                    _ => return true,
                },
            }
        }
    }

    /// Sends the state's message; the response goes onto the event queue.
    async fn fire_trigger(&mut self, label: &str) -> Result<String, Halt> {
        let (target, event) = self.invoke(label).await?;
        self.report
            .printtabline(format!("Response: {}", event.summary()));

        if let Some(state) = self.states.get_mut(label) {
            state.capture(event.clone());
        }
        self.events_tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CoreError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => CoreError::QueueClosed,
        })?;

        self.report
            .printtabline(format!("Transition to '{}'", target));
        Ok(target)
    }

    /// Exit check, otherwise one more iteration. `None` means stay.
    async fn run_loop(&mut self, label: &str) -> Result<Option<String>, Halt> {
        let exit = {
            let state = self
                .states
                .get(label)
                .ok_or_else(|| CoreError::UnknownState {
                    label: label.to_string(),
                })?;
            let input = GuardInput {
                event: state.last_event(),
                counter: Some(state.counter()),
            };
            let ctx = RunContext {
                states: &self.states,
                data: &self.data,
            };
            choose(&ctx, &mut self.report, state.transitions(), &input)
        };

        if let Some(target) = exit {
            return Ok(Some(target));
        }

        let counter = match self.states.get_mut(label) {
            Some(state) => state.increment_counter(),
            None => 0,
        };
        self.report.printtabline(format!("Iteration {}", counter));

        let (_, event) = self.invoke(label).await?;
        self.report
            .printtabline(format!("Response: {}", event.summary()));
        if let Some(state) = self.states.get_mut(label) {
            state.capture(event);
        }
        Ok(None)
    }

    /// Takes the next event and picks a guarded transition.
    async fn await_event(&mut self, label: &str) -> Result<String, Halt> {
        let event = self.take(label).await?;
        self.report
            .printtabline(format!("Received: {}", event.summary()));

        match self.states.get_mut(label) {
            Some(state) => state.capture(event),
            None => {
                return Err(Halt::Failed(CoreError::UnknownState {
                    label: label.to_string(),
                }))
            }
        }

        let chosen = match self.states.get(label) {
            Some(state) => {
                let input = GuardInput {
                    event: state.last_event(),
                    counter: None,
                };
                let ctx = RunContext {
                    states: &self.states,
                    data: &self.data,
                };
                choose(&ctx, &mut self.report, state.transitions(), &input)
            }
            None => None,
        };

        chosen.ok_or_else(|| {
            Halt::Failed(CoreError::NoTransition {
                state: label.to_string(),
            })
        })
    }

    /// Sends the message of the state's triggering transition.
    async fn invoke(&mut self, label: &str) -> Result<(String, Event), Halt> {
        let state = self
            .states
            .get(label)
            .ok_or_else(|| CoreError::UnknownState {
                label: label.to_string(),
            })?;
        let (target, spec) = state
            .trigger()
            .and_then(|t| t.message().map(|spec| (&t.target, spec)))
            .ok_or_else(|| CoreError::NoTransition {
                state: label.to_string(),
            })?;

        self.report
            .printtabline(format!("Sending {} {}{}", spec.method, spec.url, spec.path));

        let ctx = RunContext {
            states: &self.states,
            data: &self.data,
        };
        let event = tokio::select! {
            biased;
            _ = stopped(&mut self.stop_rx) => return Err(Halt::Stopped),
            result = self.invoker.invoke(label, spec, &ctx) => result?,
        };

        Ok((target.clone(), event))
    }

    /// Waits for the next inbound event.
    async fn take(&mut self, label: &str) -> Result<Event, Halt> {
        tracing::debug!(state = %label, "Waiting for event");
        let timeout = self.event_timeout;

        tokio::select! {
            biased;
            _ = stopped(&mut self.stop_rx) => Err(Halt::Stopped),
            received = recv_within(&mut self.events_rx, timeout) => match received {
                Ok(Some(event)) => Ok(event),
                Ok(None) => Err(Halt::Failed(CoreError::QueueClosed)),
                Err(_) => Err(Halt::Failed(CoreError::EventTimeout {
                    state: label.to_string(),
                })),
            },
        }
    }
}

/// Resolves once a stop has been requested.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        // every handle and the machine itself dropped the sender
        std::future::pending::<()>().await;
    }
}

async fn recv_within(
    rx: &mut mpsc::Receiver<Event>,
    timeout: Option<Duration>,
) -> Result<Option<Event>, tokio::time::error::Elapsed> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, rx.recv()).await,
        None => Ok(rx.recv().await),
    }
}

/// Evaluates guarded transitions in order; the first full match wins.
///
/// Guard errors are reported and count as a failed guard.
fn choose(
    ctx: &RunContext<'_>,
    report: &mut Report,
    transitions: &[Transition],
    input: &GuardInput<'_>,
) -> Option<String> {
    'transitions: for transition in transitions {
        let guards = match &transition.kind {
            TransitionKind::Guarded(guards) => guards,
            TransitionKind::Triggering(_) => continue,
        };

        for guard in guards {
            match guard.evaluate(input, ctx) {
                Ok(GuardVerdict::Passed) => {
                    report.printtabline(format!("Guard {}: passed", guard));
                }
                Ok(GuardVerdict::Failed(reason)) => {
                    report.printtabline(format!("Guard {}: failed, {}", guard, reason));
                    continue 'transitions;
                }
                Err(e) => {
                    tracing::warn!(guard = %guard, "Guard evaluation error: {}", e);
                    report.printtabline(format!("Guard {}: error, {}", guard, e));
                    continue 'transitions;
                }
            }
        }

        report.printtabline(format!("Transition to '{}'", transition.target));
        tracing::debug!(target = %transition.target, "Transition taken");
        return Some(transition.target.clone());
    }

    None
}

/// Reference view over the run's states and pattern data.
struct RunContext<'a> {
    states: &'a StateTable,
    data: &'a PatternData,
}

impl ReferenceContext for RunContext<'_> {
    fn data(&self, name: &str) -> Option<&str> {
        self.data.constant(name)
    }

    fn component(&self, name: &str) -> Option<&str> {
        self.data.component(name)
    }

    fn last_event(&self, state: &str) -> Result<&Event, ReferenceError> {
        let found = self
            .states
            .get(state)
            .ok_or_else(|| ReferenceError::UnknownState(state.to_string()))?;
        found
            .last_event()
            .ok_or_else(|| ReferenceError::NoCapturedEvent(found.label().to_string()))
    }
}
