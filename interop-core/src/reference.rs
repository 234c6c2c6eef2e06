//! Deferred `$$...$$` references.
//!
//! References are resolved immediately before use, never when a pattern is
//! loaded, because they can read events captured earlier in the same run:
//!
//! - `$$data.NAME$$` - pattern-wide constant
//! - `$$component.NAME$$` - address of a component in the architecture model
//! - `$$STATE|content|PATH$$` - content path over the last event of `STATE`
//! - `$$STATE|headers|FIELD$$` - header (or status/method/path) of that event

use crate::content;
use crate::error::ReferenceError;
use interop_protocol::Event;

const DELIMITER: &str = "$$";

/// A parsed reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Data(String),
    Component(String),
    StateContent { state: String, path: String },
    StateHeader { state: String, field: String },
}

impl Reference {
    /// Parses the text between the `$$` delimiters.
    pub fn parse(inner: &str) -> Result<Self, ReferenceError> {
        let inner = inner.trim();
        let malformed = |reason: &str| ReferenceError::Malformed {
            reference: format!("{}{}{}", DELIMITER, inner, DELIMITER),
            reason: reason.to_string(),
        };

        if inner.contains('|') {
            let mut parts = inner.splitn(3, '|');
            let state = parts.next().unwrap_or_default().trim();
            let section = parts.next().unwrap_or_default().trim();
            let rest = parts.next().unwrap_or_default().trim();
            if state.is_empty() || rest.is_empty() {
                return Err(malformed("expected STATE|content|PATH or STATE|headers|FIELD"));
            }
            return match section.to_ascii_lowercase().as_str() {
                "content" => Ok(Reference::StateContent {
                    state: state.to_string(),
                    path: rest.to_string(),
                }),
                "headers" | "header" => Ok(Reference::StateHeader {
                    state: state.to_string(),
                    field: rest.to_string(),
                }),
                _ => Err(malformed("section must be 'content' or 'headers'")),
            };
        }

        if let Some(name) = inner.strip_prefix("data.") {
            if name.is_empty() {
                return Err(malformed("empty data name"));
            }
            return Ok(Reference::Data(name.to_string()));
        }

        if let Some(name) = inner.strip_prefix("component.") {
            if name.is_empty() {
                return Err(malformed("empty component name"));
            }
            return Ok(Reference::Component(name.to_string()));
        }

        Err(malformed("unknown reference form"))
    }

    /// Resolves this reference against live run state.
    pub fn resolve(&self, ctx: &dyn ReferenceContext) -> Result<String, ReferenceError> {
        match self {
            Reference::Data(name) => ctx
                .data(name)
                .map(str::to_string)
                .ok_or_else(|| ReferenceError::DataNotFound(name.clone())),
            Reference::Component(name) => ctx
                .component(name)
                .map(str::to_string)
                .ok_or_else(|| ReferenceError::ComponentNotFound(name.clone())),
            Reference::StateContent { state, path } => {
                let event = ctx.last_event(state)?;
                let not_found = || ReferenceError::ContentNotFound {
                    state: state.clone(),
                    path: path.clone(),
                };
                let body = event.body.as_ref().ok_or_else(not_found)?;
                let format = content::for_kind(body.kind)?;
                content::extract(format, &body.text, path)?.ok_or_else(not_found)
            }
            Reference::StateHeader { state, field } => {
                let event = ctx.last_event(state)?;
                event
                    .parameter(field)
                    .ok_or_else(|| ReferenceError::HeaderNotFound {
                        state: state.clone(),
                        field: field.clone(),
                    })
            }
        }
    }
}

/// Live state a reference can read from.
pub trait ReferenceContext: Sync {
    /// Pattern-wide constant.
    fn data(&self, name: &str) -> Option<&str>;

    /// Component address from the architecture model.
    fn component(&self, name: &str) -> Option<&str>;

    /// Last event captured by the state with the given label.
    fn last_event(&self, state: &str) -> Result<&Event, ReferenceError>;
}

/// Returns true if `text` contains a reference delimiter.
pub fn has_references(text: &str) -> bool {
    text.contains(DELIMITER)
}

/// Parses every reference in `text` without resolving it.
pub fn parse_all(text: &str) -> Result<Vec<Reference>, ReferenceError> {
    let mut refs = Vec::new();
    for segment in split(text)? {
        if let Segment::Reference(inner) = segment {
            refs.push(Reference::parse(inner)?);
        }
    }
    Ok(refs)
}

/// Substitutes every `$$...$$` occurrence in `text`.
pub fn resolve(text: &str, ctx: &dyn ReferenceContext) -> Result<String, ReferenceError> {
    if !has_references(text) {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    for segment in split(text)? {
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Reference(inner) => {
                let value = Reference::parse(inner)?.resolve(ctx)?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}

enum Segment<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

fn split(text: &str) -> Result<Vec<Segment<'_>>, ReferenceError> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(DELIMITER) {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        let after = &rest[open + DELIMITER.len()..];
        let close = after.find(DELIMITER).ok_or_else(|| ReferenceError::Malformed {
            reference: rest[open..].to_string(),
            reason: "unterminated reference".to_string(),
        })?;
        segments.push(Segment::Reference(&after[..close]));
        rest = &after[close + DELIMITER.len()..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}
