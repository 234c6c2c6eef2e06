//! Outbound message specifications.
//!
//! A [`MessageSpec`] is the unresolved form attached to a trigger transition.
//! It may still contain `$$...$$` references in its URL, path, header values
//! and body; the invoker turns it into a concrete [`Request`] just before
//! sending.

use crate::error::MessageError;
use crate::event::{ContentKind, Headers};
use crate::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Parses a method name, case-insensitively.
    pub fn parse(s: &str) -> Result<Self, MessageError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(MessageError::InvalidMethod(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated outbound message, not yet template-substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub content_kind: ContentKind,
}

impl MessageSpec {
    /// Builds and validates a message specification.
    ///
    /// `content_type` is one of `xml`, `json` or `other`. A body declared as
    /// `other` cannot be serialized unless the headers carry an explicit
    /// `Content-Type`.
    pub fn new(
        method: &str,
        url: impl Into<String>,
        path: impl Into<String>,
        mut headers: Headers,
        body: Option<String>,
        content_type: Option<&str>,
    ) -> Result<Self, MessageError> {
        let method = Method::parse(method)?;
        let url = url.into();
        if url.trim().is_empty() {
            return Err(MessageError::MissingUrl);
        }

        let content_kind = match content_type {
            Some(ct) => ContentKind::parse(ct)?,
            None => ContentKind::Other,
        };

        if body.is_some() {
            match content_kind.default_mime() {
                Some(mime) => {
                    if !headers.contains(CONTENT_TYPE) {
                        headers.insert(CONTENT_TYPE, mime);
                    }
                }
                None => {
                    if !headers.contains(CONTENT_TYPE) {
                        return Err(MessageError::MissingContentType);
                    }
                }
            }
        }

        Ok(Self {
            method,
            url,
            path: path.into(),
            headers,
            body,
            content_kind,
        })
    }

    /// A bodiless message.
    pub fn simple(method: &str, url: impl Into<String>, path: impl Into<String>) -> Result<Self, MessageError> {
        Self::new(method, url, path, Headers::new(), None, None)
    }
}

/// A fully resolved request, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl Request {
    pub fn summary(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Joins a base URL and a path with exactly one separating slash.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim();
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('?') {
        return format!("{}{}", base, path);
    }
    format!("{}/{}", base, path.trim_start_matches('/'))
}
