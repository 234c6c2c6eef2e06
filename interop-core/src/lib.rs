//! # interop-core
//!
//! State machine engine for interoperability tests.
//!
//! This crate provides:
//! - Content path evaluation over XML and JSON bodies
//! - Deferred `$$...$$` references
//! - Guard evaluation
//! - States, transitions and pattern loading
//! - Outbound message invocation
//! - The state machine interpreter and its report

pub mod content;
pub mod error;
pub mod guard;
pub mod invoker;
pub mod json_path;
pub mod machine;
pub mod pattern;
pub mod reference;
pub mod report;
pub mod state;
pub mod xml_path;

pub use content::{ChildMatch, ContentFormat, Node, PathMatch};
pub use error::{ContentError, CoreError, GuardError, ReferenceError};
pub use guard::{Comparison, DataType, Guard, GuardInput, GuardTarget, GuardVerdict};
pub use invoker::Invoker;
pub use machine::{
    MachineConfig, MachineHandle, RunOutcome, StateMachine, Termination, DEFAULT_QUEUE_CAPACITY,
};
pub use pattern::{Pattern, PatternData, PatternDescriptor};
pub use reference::{Reference, ReferenceContext};
pub use report::{Report, SharedSink};
pub use state::{State, StateTable, StateType, Transition, TransitionKind};
