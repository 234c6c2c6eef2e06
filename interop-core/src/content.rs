//! Content path evaluation over message bodies.
//!
//! Two formats share one contract: [`XmlPath`](crate::xml_path::XmlPath) for
//! XPath-like expressions and [`JsonPath`](crate::json_path::JsonPath) for
//! JSONPath-like expressions. A format only has to select nodes; equality,
//! numeric ordering and child-field checks are implemented once here.

use crate::error::ContentError;
use crate::json_path::JsonPath;
use crate::xml_path::XmlPath;
use interop_protocol::ContentKind;
use std::cmp::Ordering;

/// A node selected by a content path, reduced to what guards need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Scalar value (text content, attribute value, JSON scalar or JSON text).
    pub value: Option<String>,
    /// Names of the node's child fields.
    pub children: Vec<String>,
}

/// A body format that can select nodes by path.
pub trait ContentFormat: Send + Sync {
    /// Format name used in error messages.
    fn name(&self) -> &'static str;

    /// Selects all nodes matching `path`, in document order.
    fn select(&self, body: &str, path: &str) -> Result<Vec<Node>, ContentError>;
}

/// Result of a value assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub matched: bool,
    /// The value found at the path, if any.
    pub actual: Option<String>,
}

/// Result of a child-field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildMatch {
    pub matched: bool,
    /// Child fields actually present at the path.
    pub siblings: Vec<String>,
}

static XML: XmlPath = XmlPath;
static JSON: JsonPath = JsonPath;

/// Returns the evaluator for a declared content kind.
pub fn for_kind(kind: ContentKind) -> Result<&'static dyn ContentFormat, ContentError> {
    match kind {
        ContentKind::Xml => Ok(&XML),
        ContentKind::Json => Ok(&JSON),
        ContentKind::Other => Err(ContentError::UnsupportedFormat(kind.to_string())),
    }
}

/// Returns the first value at `path`.
pub fn extract(
    format: &dyn ContentFormat,
    body: &str,
    path: &str,
) -> Result<Option<String>, ContentError> {
    Ok(format
        .select(body, path)?
        .into_iter()
        .find_map(|node| node.value))
}

/// Checks whether any value at `path` equals `expected`.
pub fn assert(
    format: &dyn ContentFormat,
    body: &str,
    path: &str,
    expected: &str,
    fold_case: bool,
) -> Result<PathMatch, ContentError> {
    let values: Vec<String> = format
        .select(body, path)?
        .into_iter()
        .filter_map(|node| node.value)
        .collect();

    if let Some(hit) = values.iter().find(|v| values_equal(v, expected, fold_case)) {
        return Ok(PathMatch {
            matched: true,
            actual: Some(hit.clone()),
        });
    }

    Ok(PathMatch {
        matched: false,
        actual: values.into_iter().next(),
    })
}

/// Compares the first value at `path` numerically against `expected`.
///
/// A missing or non-numeric value never matches.
pub fn compare(
    format: &dyn ContentFormat,
    body: &str,
    path: &str,
    expected: f64,
    wanted: Ordering,
) -> Result<PathMatch, ContentError> {
    let actual = extract(format, body, path)?;
    let matched = actual
        .as_deref()
        .and_then(parse_number)
        .and_then(|v| v.partial_cmp(&expected))
        .map(|ord| ord == wanted)
        .unwrap_or(false);

    Ok(PathMatch { matched, actual })
}

/// Checks whether a node at `path` has a child field named `child`.
pub fn contains(
    format: &dyn ContentFormat,
    body: &str,
    path: &str,
    child: &str,
) -> Result<ChildMatch, ContentError> {
    let nodes = format.select(body, path)?;
    let matched = nodes
        .iter()
        .any(|node| node.children.iter().any(|c| c == child));

    let mut siblings: Vec<String> = Vec::new();
    for node in nodes {
        for name in node.children {
            if !siblings.contains(&name) {
                siblings.push(name);
            }
        }
    }

    Ok(ChildMatch { matched, siblings })
}

/// Parses a trimmed decimal number.
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn values_equal(actual: &str, expected: &str, fold_case: bool) -> bool {
    if fold_case {
        actual.to_lowercase() == expected.to_lowercase()
    } else {
        actual == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_BODY: &str = r#"{"user":{"name":"Alice","age":21,"tags":["a","b"]}}"#;
    const XML_BODY: &str =
        r#"<response><user id="7"><name>Alice</name><age>21</age></user></response>"#;

    #[test]
    fn test_for_kind() {
        assert_eq!(for_kind(ContentKind::Json).unwrap().name(), "json");
        assert_eq!(for_kind(ContentKind::Xml).unwrap().name(), "xml");
        assert!(matches!(
            for_kind(ContentKind::Other),
            Err(ContentError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_assert_json() {
        let json = for_kind(ContentKind::Json).unwrap();
        let m = assert(json, JSON_BODY, "$.user.name", "alice", true).unwrap();
        assert!(m.matched);
        assert_eq!(m.actual.as_deref(), Some("Alice"));

        let m = assert(json, JSON_BODY, "$.user.name", "alice", false).unwrap();
        assert!(!m.matched);
        assert_eq!(m.actual.as_deref(), Some("Alice"));

        let m = assert(json, JSON_BODY, "$.user.missing", "x", true).unwrap();
        assert!(!m.matched);
        assert!(m.actual.is_none());
    }

    #[test]
    fn test_assert_xml() {
        let xml = for_kind(ContentKind::Xml).unwrap();
        assert!(assert(xml, XML_BODY, "/response/user/age", "21", false).unwrap().matched);
        assert!(assert(xml, XML_BODY, "//user/@id", "7", false).unwrap().matched);
    }

    #[test]
    fn test_compare_numeric() {
        let json = for_kind(ContentKind::Json).unwrap();
        let m = compare(json, JSON_BODY, "$.user.age", 18.0, Ordering::Greater).unwrap();
        assert!(m.matched);

        let m = compare(json, r#"{"user":{"age":15}}"#, "$.user.age", 18.0, Ordering::Greater)
            .unwrap();
        assert!(!m.matched);
        assert_eq!(m.actual.as_deref(), Some("15"));

        let m = compare(json, JSON_BODY, "$.user.age", 30.0, Ordering::Less).unwrap();
        assert!(m.matched);
    }

    #[test]
    fn test_compare_non_numeric_fails_without_error() {
        let json = for_kind(ContentKind::Json).unwrap();
        let m = compare(json, JSON_BODY, "$.user.name", 1.0, Ordering::Greater).unwrap();
        assert!(!m.matched);
        assert_eq!(m.actual.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_compare_malformed_path_errors() {
        let json = for_kind(ContentKind::Json).unwrap();
        let result = compare(json, JSON_BODY, "$.user[", 1.0, Ordering::Greater);
        assert!(matches!(result, Err(ContentError::InvalidPath { .. })));
    }

    #[test]
    fn test_contains_reports_siblings() {
        let json = for_kind(ContentKind::Json).unwrap();
        let m = contains(json, JSON_BODY, "$.user", "age").unwrap();
        assert!(m.matched);

        let m = contains(json, JSON_BODY, "$.user", "email").unwrap();
        assert!(!m.matched);
        let mut siblings = m.siblings.clone();
        siblings.sort();
        assert_eq!(siblings, vec!["age", "name", "tags"]);

        let xml = for_kind(ContentKind::Xml).unwrap();
        let m = contains(xml, XML_BODY, "/response/user", "name").unwrap();
        assert!(m.matched);
        assert_eq!(m.siblings, vec!["@id", "name", "age"]);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 21 "), Some(21.0));
        assert_eq!(parse_number("-1.5"), Some(-1.5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
