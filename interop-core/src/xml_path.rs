//! XPath-like content paths.
//!
//! Supported syntax:
//!
//! - `/a/b` - child steps from the document root (a leading `/` is optional)
//! - `//b` - descendant step
//! - `*` - any element
//! - `b[2]` - 1-based position among the matches under one parent
//! - `b[@id='7']` - attribute filter
//! - `@id` - attribute value (final step only)
//! - `text()` - direct text of the element (final step only)
//! - `.` - the context node itself
//!
//! Element names match on local name, ignoring namespaces.

use crate::content::{ContentFormat, Node};
use crate::error::ContentError;
use roxmltree::{Document, NodeId};

/// XML body evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Any,
    SelfNode,
    Text,
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    AttrEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicate: Option<Predicate>,
}

impl ContentFormat for XmlPath {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn select(&self, body: &str, path: &str) -> Result<Vec<Node>, ContentError> {
        let steps = parse(path)?;
        let doc = Document::parse(body).map_err(|e| ContentError::MalformedBody {
            format: "xml",
            reason: e.to_string(),
        })?;

        let mut current: Vec<roxmltree::Node> = vec![doc.root()];
        for step in &steps {
            match &step.test {
                NodeTest::Attribute(name) => {
                    let mut out = Vec::new();
                    for ctx in scope(&current, step.axis) {
                        for attr in ctx.attributes() {
                            if name == "*" || attr.name() == name {
                                out.push(Node {
                                    value: Some(attr.value().to_string()),
                                    children: Vec::new(),
                                });
                            }
                        }
                    }
                    return Ok(out);
                }
                NodeTest::Text => {
                    let out = scope(&current, step.axis)
                        .into_iter()
                        .filter(|n| n.is_element())
                        .map(|n| {
                            let text: String = n
                                .children()
                                .filter(|c| c.is_text())
                                .filter_map(|c| c.text())
                                .collect();
                            Node {
                                value: Some(text.trim().to_string()),
                                children: Vec::new(),
                            }
                        })
                        .collect();
                    return Ok(out);
                }
                NodeTest::SelfNode => {
                    current = scope(&current, step.axis);
                }
                NodeTest::Name(_) | NodeTest::Any => {
                    let mut next = Vec::new();
                    let mut seen: Vec<NodeId> = Vec::new();
                    for ctx in &current {
                        let candidates: Vec<roxmltree::Node> = match step.axis {
                            Axis::Child => ctx.children().filter(|n| n.is_element()).collect(),
                            Axis::Descendant => ctx
                                .descendants()
                                .skip(1)
                                .filter(|n| n.is_element())
                                .collect(),
                        };
                        let matching = candidates
                            .into_iter()
                            .filter(|n| matches_test(n, &step.test));
                        for node in apply_predicate(matching, step.predicate.as_ref()) {
                            if !seen.contains(&node.id()) {
                                seen.push(node.id());
                                next.push(node);
                            }
                        }
                    }
                    current = next;
                }
            }
        }

        Ok(current
            .into_iter()
            .filter(|n| n.is_element())
            .map(element_node)
            .collect())
    }
}

/// Context nodes for a terminal or self step.
fn scope<'a, 'i>(current: &[roxmltree::Node<'a, 'i>], axis: Axis) -> Vec<roxmltree::Node<'a, 'i>> {
    match axis {
        Axis::Child => current.to_vec(),
        Axis::Descendant => {
            let mut out: Vec<roxmltree::Node> = Vec::new();
            for ctx in current {
                for n in ctx.descendants().filter(|n| n.is_element() || n.is_root()) {
                    if !out.iter().any(|o| o.id() == n.id()) {
                        out.push(n);
                    }
                }
            }
            out
        }
    }
}

fn matches_test(node: &roxmltree::Node, test: &NodeTest) -> bool {
    match test {
        NodeTest::Name(name) => node.tag_name().name() == name,
        NodeTest::Any => true,
        _ => false,
    }
}

fn apply_predicate<'a, 'i>(
    nodes: impl Iterator<Item = roxmltree::Node<'a, 'i>>,
    predicate: Option<&Predicate>,
) -> Vec<roxmltree::Node<'a, 'i>> {
    match predicate {
        None => nodes.collect(),
        Some(Predicate::Position(pos)) => nodes.skip(pos - 1).take(1).collect(),
        Some(Predicate::AttrEquals(name, value)) => nodes
            .filter(|n| n.attribute(name.as_str()) == Some(value.as_str()))
            .collect(),
    }
}

fn element_node(node: roxmltree::Node) -> Node {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();

    let mut children: Vec<String> = node
        .attributes()
        .map(|a| format!("@{}", a.name()))
        .collect();
    children.extend(
        node.children()
            .filter(|c| c.is_element())
            .map(|c| c.tag_name().name().to_string()),
    );

    Node {
        value: Some(text.trim().to_string()),
        children,
    }
}

fn invalid(path: &str, reason: impl Into<String>) -> ContentError {
    ContentError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn parse(path: &str) -> Result<Vec<Step>, ContentError> {
    let input = path.trim();
    if input.is_empty() {
        return Err(invalid(path, "empty path"));
    }

    let mut steps: Vec<Step> = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        if let Some(last) = steps.last() {
            if matches!(last.test, NodeTest::Attribute(_) | NodeTest::Text) {
                return Err(invalid(path, "attribute and text() must be the last step"));
            }
        }

        let rest = &input[pos..];
        let axis = if rest.starts_with("//") {
            pos += 2;
            Axis::Descendant
        } else if rest.starts_with('/') {
            pos += 1;
            Axis::Child
        } else if pos == 0 {
            Axis::Child
        } else {
            return Err(invalid(path, format!("expected '/' at offset {}", pos)));
        };

        let start = pos;
        let mut depth = 0usize;
        for c in input[pos..].chars() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => break,
                _ => {}
            }
            pos += c.len_utf8();
        }

        let step = parse_step(path, &input[start..pos], axis)?;
        steps.push(step);
    }

    if steps.is_empty() {
        return Err(invalid(path, "no steps"));
    }
    Ok(steps)
}

fn parse_step(path: &str, text: &str, axis: Axis) -> Result<Step, ContentError> {
    if text.is_empty() {
        return Err(invalid(path, "empty step"));
    }

    let (head, predicate) = match text.find('[') {
        Some(open) => {
            if !text.ends_with(']') {
                return Err(invalid(path, format!("unclosed predicate in '{}'", text)));
            }
            let inner = &text[open + 1..text.len() - 1];
            (&text[..open], Some(parse_predicate(path, inner)?))
        }
        None => (text, None),
    };

    let test = match head {
        "." => NodeTest::SelfNode,
        "*" => NodeTest::Any,
        "text()" => NodeTest::Text,
        h if h.starts_with('@') => {
            let name = &h[1..];
            if name.is_empty() || !valid_name(name) && name != "*" {
                return Err(invalid(path, format!("invalid attribute name '{}'", name)));
            }
            NodeTest::Attribute(name.to_string())
        }
        h if valid_name(h) => NodeTest::Name(local_name(h).to_string()),
        h => return Err(invalid(path, format!("invalid step '{}'", h))),
    };

    if predicate.is_some() && !matches!(test, NodeTest::Name(_) | NodeTest::Any) {
        return Err(invalid(path, "predicates only apply to element steps"));
    }

    Ok(Step {
        axis,
        test,
        predicate,
    })
}

fn parse_predicate(path: &str, inner: &str) -> Result<Predicate, ContentError> {
    let inner = inner.trim();
    if let Ok(pos) = inner.parse::<usize>() {
        if pos == 0 {
            return Err(invalid(path, "positions start at 1"));
        }
        return Ok(Predicate::Position(pos));
    }

    if let Some(attr) = inner.strip_prefix('@') {
        if let Some((name, value)) = attr.split_once('=') {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')));
            if let Some(v) = unquoted {
                return Ok(Predicate::AttrEquals(name.trim().to_string(), v.to_string()));
            }
        }
    }

    Err(invalid(path, format!("unsupported predicate '[{}]'", inner)))
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        && !name.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"<?xml version="1.0"?>
<catalog xmlns:x="urn:x">
  <book id="b1" lang="en"><title>Rust</title><price>39.5</price></book>
  <book id="b2"><title>Protocols</title><price>12</price></book>
  <x:note>namespaced</x:note>
</catalog>"#;

    fn values(path: &str) -> Vec<String> {
        XmlPath
            .select(BODY, path)
            .unwrap()
            .into_iter()
            .filter_map(|n| n.value)
            .collect()
    }

    #[test]
    fn test_absolute_path() {
        assert_eq!(values("/catalog/book/title"), vec!["Rust", "Protocols"]);
        assert_eq!(values("catalog/book/price"), vec!["39.5", "12"]);
    }

    #[test]
    fn test_descendant() {
        assert_eq!(values("//title"), vec!["Rust", "Protocols"]);
        assert_eq!(values("/catalog//price"), vec!["39.5", "12"]);
    }

    #[test]
    fn test_position_predicate() {
        assert_eq!(values("/catalog/book[2]/title"), vec!["Protocols"]);
        assert!(values("/catalog/book[3]/title").is_empty());
    }

    #[test]
    fn test_attribute_predicate_and_value() {
        assert_eq!(values("//book[@id='b2']/price"), vec!["12"]);
        assert_eq!(values("/catalog/book/@id"), vec!["b1", "b2"]);
        assert_eq!(values("//book/@lang"), vec!["en"]);
    }

    #[test]
    fn test_text_and_wildcard() {
        assert_eq!(values("/catalog/book[1]/title/text()"), vec!["Rust"]);
        assert_eq!(values("/catalog/book[1]/*"), vec!["Rust", "39.5"]);
    }

    #[test]
    fn test_namespaced_element_matches_local_name() {
        assert_eq!(values("/catalog/note"), vec!["namespaced"]);
        assert_eq!(values("/catalog/x:note"), vec!["namespaced"]);
    }

    #[test]
    fn test_children_listing() {
        let nodes = XmlPath.select(BODY, "/catalog/book[1]").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].children, vec!["@id", "@lang", "title", "price"]);
    }

    #[test]
    fn test_invalid_paths() {
        for path in [
            "",
            "/catalog/",
            "/catalog/book[0]",
            "/catalog/book[",
            "/catalog/@id/title",
            "/catalog/book[last()]",
            "/cat alog",
        ] {
            let result = XmlPath.select(BODY, path);
            assert!(
                matches!(result, Err(ContentError::InvalidPath { .. })),
                "path {:?} should be rejected",
                path
            );
        }
    }

    #[test]
    fn test_malformed_body() {
        let result = XmlPath.select("<open>", "/open");
        assert!(matches!(result, Err(ContentError::MalformedBody { .. })));
    }
}
