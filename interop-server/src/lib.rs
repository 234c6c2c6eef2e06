//! # interop-server
//!
//! Runtime for interop test runs.
//!
//! This crate provides:
//! - YAML and environment configuration
//! - The inbound HTTP listener that feeds events to a running machine
//! - The test runner that wires transport, listener and machine together

pub mod config;
pub mod error;
pub mod listener;
pub mod runner;

pub use config::{Config, ConfigError, ListenerConfig, RunnerConfig, TransportSettings};
pub use error::ServerError;
pub use listener::Listener;
pub use runner::{RunControl, TestRunner};
