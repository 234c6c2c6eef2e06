//! JSONPath-like content paths.
//!
//! Supported syntax:
//!
//! - `$` - the document root (optional; `user.age` means `$.user.age`)
//! - `.name` / `['name']` - object member
//! - `[n]` - array element (0-based)
//! - `.*` / `[*]` - all members or elements
//! - `..name` - recursive descent

use crate::content::{ContentFormat, Node};
use crate::error::ContentError;
use serde_json::Value;

/// JSON body evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPath;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Member(String),
    Index(usize),
    Wildcard,
    Descendant(String),
    DescendantAll,
}

impl ContentFormat for JsonPath {
    fn name(&self) -> &'static str {
        "json"
    }

    fn select(&self, body: &str, path: &str) -> Result<Vec<Node>, ContentError> {
        let segments = parse(path)?;
        let root: Value =
            serde_json::from_str(body).map_err(|e| ContentError::MalformedBody {
                format: "json",
                reason: e.to_string(),
            })?;

        let mut current: Vec<&Value> = vec![&root];
        for segment in &segments {
            let mut next = Vec::new();
            for value in current {
                apply(segment, value, &mut next);
            }
            current = next;
        }

        Ok(current.into_iter().map(to_node).collect())
    }
}

fn apply<'a>(segment: &Segment, value: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        Segment::Member(name) => {
            if let Some(v) = value.as_object().and_then(|m| m.get(name)) {
                out.push(v);
            }
        }
        Segment::Index(i) => {
            if let Some(v) = value.as_array().and_then(|a| a.get(*i)) {
                out.push(v);
            }
        }
        Segment::Wildcard => match value {
            Value::Object(map) => out.extend(map.values()),
            Value::Array(items) => out.extend(items.iter()),
            _ => {}
        },
        Segment::Descendant(name) => {
            let mut all = Vec::new();
            descendants(value, &mut all);
            for v in all {
                if let Some(found) = v.as_object().and_then(|m| m.get(name)) {
                    out.push(found);
                }
            }
        }
        Segment::DescendantAll => {
            let mut all = Vec::new();
            descendants(value, &mut all);
            // `..*` selects everything below, not the node itself
            out.extend(all.into_iter().skip(1));
        }
    }
}

/// Collects `value` and everything beneath it, depth first.
fn descendants<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(value);
    match value {
        Value::Object(map) => map.values().for_each(|v| descendants(v, out)),
        Value::Array(items) => items.iter().for_each(|v| descendants(v, out)),
        _ => {}
    }
}

fn to_node(value: &Value) -> Node {
    let scalar = match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    };
    let children = match value {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    Node {
        value: Some(scalar),
        children,
    }
}

fn parse(path: &str) -> Result<Vec<Segment>, ContentError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(invalid(path, "empty path"));
    }

    let normalized = if trimmed.starts_with('$') {
        trimmed.to_string()
    } else if trimmed.starts_with('[') || trimmed.starts_with('.') {
        format!("${}", trimmed)
    } else {
        format!("$.{}", trimmed)
    };

    let mut parser = Parser::new(&normalized, path);
    parser.pos = 1;
    parser.parse_segments()
}

fn invalid(path: &str, reason: impl Into<String>) -> ContentError {
    ContentError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

struct Parser<'a> {
    input: &'a str,
    original: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, original: &'a str) -> Self {
        Self {
            input,
            original,
            pos: 0,
        }
    }

    fn parse_segments(&mut self) -> Result<Vec<Segment>, ContentError> {
        let mut segments = Vec::new();

        while let Some(c) = self.peek_char() {
            match c {
                '.' if self.peek_str("..") => {
                    self.pos += 2;
                    if self.peek_char() == Some('*') {
                        self.pos += 1;
                        segments.push(Segment::DescendantAll);
                    } else {
                        let name = self.parse_name()?;
                        segments.push(Segment::Descendant(name));
                    }
                }
                '.' => {
                    self.pos += 1;
                    if self.peek_char() == Some('*') {
                        self.pos += 1;
                        segments.push(Segment::Wildcard);
                    } else {
                        let name = self.parse_name()?;
                        segments.push(Segment::Member(name));
                    }
                }
                '[' => {
                    self.pos += 1;
                    segments.push(self.parse_bracket()?);
                }
                _ => {
                    return Err(invalid(
                        self.original,
                        format!("unexpected '{}' at offset {}", c, self.pos),
                    ))
                }
            }
        }

        Ok(segments)
    }

    fn parse_name(&mut self) -> Result<String, ContentError> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c == '.' || c == '[' || c == ']' {
                break;
            }
            self.pos += c.len_utf8();
        }
        let name = &self.input[start..self.pos];
        if name.is_empty() {
            return Err(invalid(self.original, "empty member name"));
        }
        Ok(name.to_string())
    }

    fn parse_bracket(&mut self) -> Result<Segment, ContentError> {
        let segment = match self.peek_char() {
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let start = self.pos;
                while let Some(c) = self.peek_char() {
                    if c == quote {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
                if self.peek_char() != Some(quote) {
                    return Err(invalid(self.original, "unterminated quoted name"));
                }
                let name = self.input[start..self.pos].to_string();
                self.pos += 1;
                Segment::Member(name)
            }
            Some(_) => {
                let start = self.pos;
                while let Some(c) = self.peek_char() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    self.pos += 1;
                }
                let digits = &self.input[start..self.pos];
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| invalid(self.original, "expected index, '*' or quoted name"))?;
                Segment::Index(index)
            }
            None => return Err(invalid(self.original, "unclosed '['")),
        };

        if self.peek_char() != Some(']') {
            return Err(invalid(self.original, "expected ']'"));
        }
        self.pos += 1;
        Ok(segment)
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }
}
