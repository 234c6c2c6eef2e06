//! Normalized protocol events.
//!
//! Every request/response cycle, inbound or outbound, is reduced to an
//! [`Event`]: a role, an optional status code, ordered headers and an optional
//! typed body. Guards and deferred references only ever look at this shape.

use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventRole {
    /// A request, usually received by the inbound listener.
    Request,
    /// A response to an outbound message.
    Response,
}

/// Declared body format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Xml,
    Json,
    #[default]
    Other,
}

impl ContentKind {
    /// Parses a declared content kind (`xml`, `json` or `other`).
    pub fn parse(s: &str) -> Result<Self, MessageError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(ContentKind::Xml),
            "json" => Ok(ContentKind::Json),
            "other" => Ok(ContentKind::Other),
            _ => Err(MessageError::InvalidContentType(s.to_string())),
        }
    }

    /// Classifies a MIME type such as `application/json; charset=utf-8`.
    pub fn from_content_type(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        if mime.contains("json") {
            ContentKind::Json
        } else if mime.contains("xml") {
            ContentKind::Xml
        } else {
            ContentKind::Other
        }
    }

    /// Default MIME type sent for this kind, if it has one.
    pub fn default_mime(&self) -> Option<&'static str> {
        match self {
            ContentKind::Xml => Some("application/xml"),
            ContentKind::Json => Some("application/json"),
            ContentKind::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Xml => "xml",
            ContentKind::Json => "json",
            ContentKind::Other => "other",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets a header, replacing an existing one with the same folded name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Message body with its declared format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub text: String,
    pub kind: ContentKind,
}

impl Body {
    pub fn new(text: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// A normalized protocol exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub role: EventRole,

    /// Request method (requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Request path (requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Status code (responses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(default)]
    pub headers: Headers,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl Event {
    /// Creates an inbound request event.
    pub fn request(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            role: EventRole::Request,
            method: Some(method.into()),
            path: Some(path.into()),
            status: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a response event.
    pub fn response(status: u16) -> Self {
        Self {
            role: EventRole::Response,
            method: None,
            path: None,
            status: Some(status),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, text: impl Into<String>, kind: ContentKind) -> Self {
        self.body = Some(Body::new(text, kind));
        self
    }

    /// Looks up a guard parameter.
    ///
    /// Headers take precedence; `status` (alias `code`), `method` and `path`
    /// are pseudo-parameters filled from the event itself.
    pub fn parameter(&self, name: &str) -> Option<String> {
        if let Some(value) = self.headers.get(name) {
            return Some(value.to_string());
        }
        match name.to_ascii_lowercase().as_str() {
            "status" | "code" => self.status.map(|s| s.to_string()),
            "method" => self.method.clone(),
            "path" => self.path.clone(),
            _ => None,
        }
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameter(name).is_some()
    }

    /// Names of all parameters this event exposes.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.headers.names().into_iter().map(String::from).collect();
        if self.status.is_some() {
            names.push("status".to_string());
        }
        if self.method.is_some() {
            names.push("method".to_string());
        }
        if self.path.is_some() {
            names.push("path".to_string());
        }
        names
    }

    /// Body format, `Other` when there is no body.
    pub fn content_kind(&self) -> ContentKind {
        self.body.as_ref().map(|b| b.kind).unwrap_or_default()
    }

    /// One-line description used in report traces.
    pub fn summary(&self) -> String {
        let mut out = match self.role {
            EventRole::Request => format!(
                "request {} {}",
                self.method.as_deref().unwrap_or("?"),
                self.path.as_deref().unwrap_or("/")
            ),
            EventRole::Response => match self.status {
                Some(status) => format!("response {}", status),
                None => "response".to_string(),
            },
        };
        if let Some(body) = &self.body {
            out.push_str(&format!(" ({} bytes {})", body.text.len(), body.kind));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_parse() {
        assert_eq!(ContentKind::parse("XML").unwrap(), ContentKind::Xml);
        assert_eq!(ContentKind::parse(" json ").unwrap(), ContentKind::Json);
        assert_eq!(ContentKind::parse("other").unwrap(), ContentKind::Other);
        assert!(matches!(
            ContentKind::parse("yaml"),
            Err(MessageError::InvalidContentType(_))
        ));
    }

    #[test]
    fn test_content_kind_from_mime() {
        assert_eq!(
            ContentKind::from_content_type("application/json; charset=utf-8"),
            ContentKind::Json
        );
        assert_eq!(
            ContentKind::from_content_type("application/senml+xml"),
            ContentKind::Xml
        );
        assert_eq!(ContentKind::from_content_type("text/plain"), ContentKind::Other);
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("X-Trace", "1");
        headers.insert("content-type", "application/json");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.names(), vec!["Content-Type", "X-Trace"]);
    }

    #[test]
    fn test_parameters() {
        let event = Event::response(200).with_header("Location", "/users/7");
        assert_eq!(event.parameter("status").as_deref(), Some("200"));
        assert_eq!(event.parameter("code").as_deref(), Some("200"));
        assert_eq!(event.parameter("location").as_deref(), Some("/users/7"));
        assert!(event.parameter("method").is_none());

        let request = Event::request("POST", "/login");
        assert_eq!(request.parameter("method").as_deref(), Some("POST"));
        assert_eq!(request.parameter("path").as_deref(), Some("/login"));
        assert!(!request.has_parameter("status"));
    }

    #[test]
    fn test_header_shadows_pseudo_parameter() {
        let event = Event::response(404).with_header("Status", "200");
        assert_eq!(event.parameter("status").as_deref(), Some("200"));
    }

    #[test]
    fn test_summary() {
        let event = Event::response(201).with_body("{}", ContentKind::Json);
        assert_eq!(event.summary(), "response 201 (2 bytes json)");
        assert_eq!(Event::request("GET", "/a").summary(), "request GET /a");
    }
}
