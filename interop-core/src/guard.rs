//! Guard evaluation.
//!
//! A guard is a single declarative condition attached to a guarded
//! transition. Its label selects what is compared:
//!
//! - `NAME` - an event parameter (header, or the `status`/`method`/`path`
//!   pseudo-parameters; inside a loop also `counter`)
//! - `headers` / `parameters` - the event's whole parameter map; only
//!   `CONTAINS` is meaningful and tests key presence
//! - `content(PATH)` - a content path over the event body, dispatched to the
//!   XML or JSON evaluator by the body's declared kind
//!
//! The compare value may contain `$$...$$` references. They are resolved on
//! every evaluation so they can read events captured earlier in the run.

use crate::content;
use crate::error::GuardError;
use crate::reference::{self, ReferenceContext};
use interop_protocol::Event;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

impl Comparison {
    pub fn parse(s: &str) -> Result<Self, GuardError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EQUALS" | "==" => Ok(Comparison::Equals),
            "NOTEQUALS" | "!=" => Ok(Comparison::NotEquals),
            "CONTAINS" => Ok(Comparison::Contains),
            "GREATERTHAN" | ">" => Ok(Comparison::GreaterThan),
            "LESSTHAN" | "<" => Ok(Comparison::LessThan),
            _ => Err(GuardError::UnknownComparison(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Equals => "EQUALS",
            Comparison::NotEquals => "NOTEQUALS",
            Comparison::Contains => "CONTAINS",
            Comparison::GreaterThan => "GREATERTHAN",
            Comparison::LessThan => "LESSTHAN",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared data type of a guard. Only strings compare case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
}

impl DataType {
    pub fn parse(s: &str) -> Result<Self, GuardError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "string" | "str" => Ok(DataType::String),
            "integer" | "int" => Ok(DataType::Integer),
            "float" | "double" | "number" => Ok(DataType::Float),
            "boolean" | "bool" => Ok(DataType::Boolean),
            _ => Err(GuardError::UnknownDataType(s.to_string())),
        }
    }

    pub fn folds_case(&self) -> bool {
        matches!(self, DataType::String)
    }
}

/// What a guard label refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardTarget {
    /// A single named parameter.
    Parameter(String),
    /// The whole parameter map (key presence).
    ParameterMap,
    /// A content path over the body.
    Content(String),
}

impl GuardTarget {
    fn from_label(label: &str) -> Result<Self, GuardError> {
        let label = label.trim();
        let lower = label.to_ascii_lowercase();

        if lower.starts_with("content(") && label.ends_with(')') {
            let path = label["content(".len()..label.len() - 1].trim();
            if path.is_empty() {
                return Err(GuardError::Content(crate::error::ContentError::InvalidPath {
                    path: label.to_string(),
                    reason: "empty content path".to_string(),
                }));
            }
            return Ok(GuardTarget::Content(path.to_string()));
        }

        if lower == "headers" || lower == "parameters" {
            return Ok(GuardTarget::ParameterMap);
        }

        if label.is_empty() {
            return Err(GuardError::MissingParameter(String::new()));
        }
        Ok(GuardTarget::Parameter(label.to_string()))
    }
}

/// Outcome of a guard that evaluated without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Passed,
    /// Failed, with a diagnostic naming what was actually found.
    Failed(String),
}

impl GuardVerdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, GuardVerdict::Passed)
    }
}

/// Inputs a guard is evaluated against.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardInput<'a> {
    /// The event being tested.
    pub event: Option<&'a Event>,
    /// Loop counter, exposed as the `counter` parameter.
    pub counter: Option<u32>,
}

impl<'a> GuardInput<'a> {
    pub fn event(event: &'a Event) -> Self {
        Self {
            event: Some(event),
            counter: None,
        }
    }

    fn parameter(&self, name: &str) -> Option<String> {
        if let Some(counter) = self.counter {
            if name.eq_ignore_ascii_case("counter") {
                return Some(counter.to_string());
            }
        }
        self.event.and_then(|e| e.parameter(name))
    }
}

/// An executable guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    label: String,
    target: GuardTarget,
    comparison: Comparison,
    compare_to: String,
    data_type: DataType,
}

impl Guard {
    /// Creates a guard, rejecting operators its target cannot support.
    pub fn new(
        label: impl Into<String>,
        comparison: Comparison,
        compare_to: impl Into<String>,
        data_type: DataType,
    ) -> Result<Self, GuardError> {
        let label = label.into();
        let target = GuardTarget::from_label(&label)?;

        let supported = match &target {
            GuardTarget::Content(_) => true,
            GuardTarget::ParameterMap => comparison == Comparison::Contains,
            GuardTarget::Parameter(_) => !matches!(
                comparison,
                Comparison::GreaterThan | Comparison::LessThan
            ),
        };
        if !supported {
            return Err(GuardError::UnsupportedComparison {
                label,
                comparison: comparison.as_str(),
            });
        }

        Ok(Self {
            label,
            target,
            comparison,
            compare_to: compare_to.into(),
            data_type,
        })
    }

    /// Creates a guard from its textual parts.
    pub fn parse(
        label: &str,
        comparison: &str,
        compare_to: &str,
        data_type: Option<&str>,
    ) -> Result<Self, GuardError> {
        let comparison = Comparison::parse(comparison)?;
        let data_type = match data_type {
            Some(dt) => DataType::parse(dt)?,
            None => DataType::default(),
        };
        Self::new(label, comparison, compare_to, data_type)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target(&self) -> &GuardTarget {
        &self.target
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    /// The compare value as declared, references unresolved.
    pub fn compare_to(&self) -> &str {
        &self.compare_to
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Compares a parameter value against an already resolved value.
    pub fn compare(&self, candidate: &str, expected: &str) -> Result<bool, GuardError> {
        let fold = self.data_type.folds_case();
        match self.comparison {
            Comparison::Equals => Ok(text_equal(candidate, expected, fold)),
            Comparison::NotEquals => Ok(!text_equal(candidate, expected, fold)),
            Comparison::Contains => Ok(if fold {
                candidate.to_lowercase().contains(&expected.to_lowercase())
            } else {
                candidate.contains(expected)
            }),
            Comparison::GreaterThan | Comparison::LessThan => {
                Err(GuardError::UnsupportedComparison {
                    label: self.label.clone(),
                    comparison: self.comparison.as_str(),
                })
            }
        }
    }

    /// Evaluates the guard.
    ///
    /// `Err` means the guard could not be evaluated at all (unresolvable
    /// reference, missing parameter, malformed path); callers treat it as a
    /// failed guard.
    pub fn evaluate(
        &self,
        input: &GuardInput<'_>,
        refs: &dyn ReferenceContext,
    ) -> Result<GuardVerdict, GuardError> {
        let expected = reference::resolve(&self.compare_to, refs)?;

        match &self.target {
            GuardTarget::Parameter(name) => {
                let candidate = input
                    .parameter(name)
                    .ok_or_else(|| GuardError::MissingParameter(name.clone()))?;
                if self.compare(&candidate, &expected)? {
                    Ok(GuardVerdict::Passed)
                } else {
                    Ok(GuardVerdict::Failed(format!(
                        "'{}' {} '{}' but was '{}'",
                        name, self.comparison, expected, candidate
                    )))
                }
            }
            GuardTarget::ParameterMap => {
                let event = input
                    .event
                    .ok_or_else(|| GuardError::NoEvent(self.label.clone()))?;
                if event.has_parameter(&expected) {
                    Ok(GuardVerdict::Passed)
                } else {
                    Ok(GuardVerdict::Failed(format!(
                        "no parameter '{}' (present: {})",
                        expected,
                        event.parameter_names().join(", ")
                    )))
                }
            }
            GuardTarget::Content(path) => self.evaluate_content(input, path, &expected),
        }
    }

    fn evaluate_content(
        &self,
        input: &GuardInput<'_>,
        path: &str,
        expected: &str,
    ) -> Result<GuardVerdict, GuardError> {
        let event = input
            .event
            .ok_or_else(|| GuardError::NoEvent(self.label.clone()))?;
        let body = event
            .body
            .as_ref()
            .ok_or_else(|| GuardError::MissingBody(self.label.clone()))?;
        let format = content::for_kind(body.kind)?;
        let fold = self.data_type.folds_case();

        let verdict = match self.comparison {
            Comparison::Equals | Comparison::NotEquals => {
                let m = content::assert(format, &body.text, path, expected, fold)?;
                let want_match = self.comparison == Comparison::Equals;
                if m.matched == want_match {
                    GuardVerdict::Passed
                } else {
                    GuardVerdict::Failed(format!(
                        "content '{}' {} '{}' but was {}",
                        path,
                        self.comparison,
                        expected,
                        describe(m.actual.as_deref())
                    ))
                }
            }
            Comparison::Contains => {
                let m = content::contains(format, &body.text, path, expected)?;
                if m.matched {
                    GuardVerdict::Passed
                } else {
                    GuardVerdict::Failed(format!(
                        "content '{}' has no field '{}' (present: {})",
                        path,
                        expected,
                        m.siblings.join(", ")
                    ))
                }
            }
            Comparison::GreaterThan | Comparison::LessThan => {
                let target = content::parse_number(expected)
                    .ok_or_else(|| GuardError::NonNumericTarget(expected.to_string()))?;
                let wanted = if self.comparison == Comparison::GreaterThan {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
                let m = content::compare(format, &body.text, path, target, wanted)?;
                if m.matched {
                    GuardVerdict::Passed
                } else {
                    GuardVerdict::Failed(format!(
                        "content '{}' {} {} but was {}",
                        path,
                        self.comparison,
                        expected,
                        describe(m.actual.as_deref())
                    ))
                }
            }
        };

        Ok(verdict)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} '{}'", self.label, self.comparison, self.compare_to)
    }
}

fn text_equal(a: &str, b: &str, fold: bool) -> bool {
    if fold {
        a.to_lowercase() == b.to_lowercase()
    } else {
        a == b
    }
}

fn describe(actual: Option<&str>) -> String {
    match actual {
        Some(v) => format!("'{}'", v),
        None => "nothing".to_string(),
    }
}
