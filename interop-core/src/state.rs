//! States, transitions and the state table.

use crate::error::CoreError;
use crate::guard::Guard;
use interop_protocol::{Event, MessageSpec};
use std::collections::HashMap;
use std::fmt;

/// Minimum label length.
pub const MIN_LABEL_LEN: usize = 2;

/// The six kinds of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateType {
    /// Initial state that waits for an event.
    Start,
    /// Initial state that fires a message.
    TriggerStart,
    /// Waits for an event and picks a guarded transition.
    Normal,
    /// Fires a message and moves on.
    Trigger,
    /// Checks its exit guards, otherwise fires its message again.
    Loop,
    /// Terminal state.
    End,
}

impl StateType {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "START" => Ok(StateType::Start),
            "TRIGGERSTART" => Ok(StateType::TriggerStart),
            "NORMAL" => Ok(StateType::Normal),
            "TRIGGER" => Ok(StateType::Trigger),
            "LOOP" => Ok(StateType::Loop),
            "END" => Ok(StateType::End),
            _ => Err(CoreError::invalid_pattern(format!(
                "unknown state type '{}'",
                s
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateType::Start => "START",
            StateType::TriggerStart => "TRIGGERSTART",
            StateType::Normal => "NORMAL",
            StateType::Trigger => "TRIGGER",
            StateType::Loop => "LOOP",
            StateType::End => "END",
        }
    }

    /// True for states that fire their sole transition's message.
    pub fn is_trigger(&self) -> bool {
        matches!(self, StateType::Trigger | StateType::TriggerStart)
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, StateType::Loop)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StateType::End)
    }

    pub fn is_start(&self) -> bool {
        matches!(self, StateType::Start | StateType::TriggerStart)
    }
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a transition is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    /// Taken when every guard passes; no guards means unconditional.
    Guarded(Vec<Guard>),
    /// Fires an outbound message.
    Triggering(MessageSpec),
}

/// A directed edge to another state, referenced by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub target: String,
    pub kind: TransitionKind,
}

impl Transition {
    pub fn guarded(target: impl Into<String>, guards: Vec<Guard>) -> Self {
        Self {
            target: target.into(),
            kind: TransitionKind::Guarded(guards),
        }
    }

    pub fn triggering(target: impl Into<String>, message: MessageSpec) -> Self {
        Self {
            target: target.into(),
            kind: TransitionKind::Triggering(message),
        }
    }

    pub fn is_triggering(&self) -> bool {
        matches!(self.kind, TransitionKind::Triggering(_))
    }

    /// Guards of a guarded transition; empty for triggering ones.
    pub fn guards(&self) -> &[Guard] {
        match &self.kind {
            TransitionKind::Guarded(guards) => guards,
            TransitionKind::Triggering(_) => &[],
        }
    }

    pub fn message(&self) -> Option<&MessageSpec> {
        match &self.kind {
            TransitionKind::Triggering(message) => Some(message),
            TransitionKind::Guarded(_) => None,
        }
    }
}

/// A node in the pattern graph.
#[derive(Debug, Clone)]
pub struct State {
    label: String,
    state_type: StateType,
    transitions: Vec<Transition>,
    counter: u32,
    last_event: Option<Event>,
    report: Option<String>,
    success: Option<String>,
}

impl State {
    pub fn new(label: impl Into<String>, state_type: StateType) -> Self {
        Self {
            label: label.into(),
            state_type,
            transitions: Vec::new(),
            counter: 0,
            last_event: None,
            report: None,
            success: None,
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Sets the report and success annotations of an END state.
    pub fn with_annotations(mut self, report: Option<String>, success: Option<String>) -> Self {
        self.report = report;
        self.success = success;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state_type(&self) -> StateType {
        self.state_type
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// The first triggering transition, if any.
    pub fn trigger(&self) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.is_triggering())
    }

    /// Number of times a LOOP state has fired.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The most recent event this state received.
    pub fn last_event(&self) -> Option<&Event> {
        self.last_event.as_ref()
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn success(&self) -> Option<&str> {
        self.success.as_deref()
    }

    /// Verdict of reaching this state.
    ///
    /// A `success` annotation of `false`, `fail`, `failed` or `no` marks an
    /// expected-failure END state; anything else counts as success.
    pub fn is_successful_end(&self) -> bool {
        match self.success.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) => !matches!(s.as_str(), "false" | "fail" | "failed" | "no"),
            None => true,
        }
    }

    pub(crate) fn capture(&mut self, event: Event) {
        self.last_event = Some(event);
    }

    pub(crate) fn increment_counter(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }
}

/// All states of a pattern, keyed case-insensitively by label.
#[derive(Debug, Clone, Default)]
pub struct StateTable {
    states: Vec<State>,
    index: HashMap<String, usize>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state.
    pub fn insert(&mut self, state: State) -> Result<(), CoreError> {
        let label = state.label().trim();
        if label.chars().count() < MIN_LABEL_LEN {
            return Err(CoreError::invalid_pattern(format!(
                "state label '{}' must be at least {} characters",
                label, MIN_LABEL_LEN
            )));
        }

        let key = fold(label);
        if self.index.contains_key(&key) {
            return Err(CoreError::invalid_pattern(format!(
                "duplicate state label '{}'",
                label
            )));
        }

        self.index.insert(key, self.states.len());
        self.states.push(state);
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&State> {
        self.index.get(&fold(label)).map(|&i| &self.states[i])
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut State> {
        match self.index.get(&fold(label)) {
            Some(&i) => self.states.get_mut(i),
            None => None,
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index.contains_key(&fold(label))
    }

    /// States in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Checks the structural invariants and returns the start state's label.
    pub fn validate(&self) -> Result<String, CoreError> {
        let starts: Vec<&State> = self
            .states
            .iter()
            .filter(|s| s.state_type.is_start())
            .collect();
        let start = match starts.as_slice() {
            [one] => one.label.clone(),
            [] => return Err(CoreError::invalid_pattern("no START or TRIGGERSTART state")),
            many => {
                let labels: Vec<&str> = many.iter().map(|s| s.label()).collect();
                return Err(CoreError::invalid_pattern(format!(
                    "more than one start state: {}",
                    labels.join(", ")
                )));
            }
        };

        for state in &self.states {
            let triggering = state.transitions.iter().filter(|t| t.is_triggering()).count();
            let total = state.transitions.len();

            match state.state_type {
                StateType::End if total != 0 => {
                    return Err(CoreError::invalid_pattern(format!(
                        "END state '{}' has outgoing transitions",
                        state.label
                    )));
                }
                StateType::Trigger | StateType::TriggerStart
                    if total != 1 || triggering != 1 =>
                {
                    return Err(CoreError::invalid_pattern(format!(
                        "{} state '{}' needs exactly one triggering transition",
                        state.state_type, state.label
                    )));
                }
                StateType::Loop if triggering != 1 => {
                    return Err(CoreError::invalid_pattern(format!(
                        "LOOP state '{}' needs exactly one triggering transition",
                        state.label
                    )));
                }
                StateType::Loop => {
                    let stays = state
                        .transitions
                        .iter()
                        .filter(|t| t.is_triggering())
                        .all(|t| fold(&t.target) == fold(&state.label));
                    if !stays {
                        return Err(CoreError::invalid_pattern(format!(
                            "LOOP state '{}' must trigger back onto itself",
                            state.label
                        )));
                    }
                }
                StateType::Start | StateType::Normal if triggering != 0 => {
                    return Err(CoreError::invalid_pattern(format!(
                        "{} state '{}' cannot fire messages",
                        state.state_type, state.label
                    )));
                }
                _ => {}
            }

            for transition in &state.transitions {
                if !self.contains(&transition.target) {
                    return Err(CoreError::invalid_pattern(format!(
                        "transition from '{}' targets unknown state '{}'",
                        state.label, transition.target
                    )));
                }
            }
        }

        Ok(start)
    }
}

fn fold(label: &str) -> String {
    label.trim().to_lowercase()
}
