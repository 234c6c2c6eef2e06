//! # interop-protocol
//!
//! Protocol layer for the interop test engine.
//!
//! This crate provides:
//! - The normalized [`Event`] shape shared by inbound and outbound exchanges
//! - Outbound message specifications validated at construction time
//! - The [`Transport`] contract and an HTTP implementation

pub mod error;
pub mod event;
pub mod message;
pub mod transport;

pub use error::{MessageError, TransportError};
pub use event::{Body, ContentKind, Event, EventRole, Headers};
pub use message::{join_url, MessageSpec, Method, Request};
pub use transport::{HttpTransport, Transport, TransportConfig};

/// Header consulted for body classification and required for `other` bodies.
pub const CONTENT_TYPE: &str = "Content-Type";
