//! Pattern descriptors and their translation into executable states.
//!
//! Patterns are written in YAML or JSON:
//!
//! ```yaml
//! name: login
//! data:
//!   user: alice
//! components:
//!   server: http://127.0.0.1:8080
//! states:
//!   - label: send
//!     type: TRIGGERSTART
//!     transitions:
//!       - kind: trigger
//!         target: check
//!         message:
//!           method: POST
//!           url: $$component.server$$
//!           path: /login
//!           body: '{"user":"$$data.user$$"}'
//!           content_type: json
//!   - label: check
//!     type: NORMAL
//!     transitions:
//!       - kind: guarded
//!         target: done
//!         guards:
//!           - { param: status, op: EQUALS, value: 200 }
//!   - label: done
//!     type: END
//! ```
//!
//! Descriptors hold strings only. [`Pattern::build`] is the one-way
//! translation into validated [`State`]s with executable guards and messages.

use crate::error::CoreError;
use crate::guard::Guard;
use crate::reference::{self, Reference};
use crate::state::{State, StateTable, StateType, Transition};
use interop_protocol::{Headers, MessageSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// A pattern as written by its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDescriptor {
    pub name: String,

    /// Label of the start state; checked against the state types when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,

    /// Pattern-wide constants, read through `$$data.NAME$$`.
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    pub data: BTreeMap<String, String>,

    /// Component addresses, read through `$$component.NAME$$`.
    #[serde(default)]
    pub components: BTreeMap<String, String>,

    pub states: Vec<StateDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDescriptor {
    pub label: String,

    #[serde(rename = "type")]
    pub state_type: String,

    #[serde(default)]
    pub transitions: Vec<TransitionDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
}

/// A transition, tagged by its `kind` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransitionDescriptor {
    Guarded {
        target: String,
        #[serde(default)]
        guards: Vec<GuardDescriptor>,
    },
    Trigger {
        target: String,
        message: MessageDescriptor,
    },
}

impl TransitionDescriptor {
    pub fn target(&self) -> &str {
        match self {
            TransitionDescriptor::Guarded { target, .. } => target,
            TransitionDescriptor::Trigger { target, .. } => target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDescriptor {
    pub param: String,
    pub op: String,
    #[serde(deserialize_with = "deserialize_scalar")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "deserialize_scalar_map")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Accepts strings, numbers and booleans, so `value: 200` works in YAML.
fn deserialize_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct ScalarVisitor;

    impl<'de> Visitor<'de> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string, number or boolean")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}

fn deserialize_scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Scalar(#[serde(deserialize_with = "deserialize_scalar")] String);

    let raw: BTreeMap<String, Scalar> = BTreeMap::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
}

impl PatternDescriptor {
    pub fn from_json_str(s: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Loads a descriptor, choosing the format by file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(CoreError::invalid_pattern(format!(
                "unsupported pattern file '{}' (expected .json, .yaml or .yml)",
                path.display()
            ))),
        }
    }
}

/// Constants and the architecture model shared by every state of a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternData {
    constants: HashMap<String, String>,
    components: HashMap<String, String>,
}

impl PatternData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn with_component(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.components.insert(name.into(), address.into());
        self
    }

    pub fn constant(&self, name: &str) -> Option<&str> {
        self.constants.get(name).map(String::as_str)
    }

    pub fn component(&self, name: &str) -> Option<&str> {
        self.components.get(name).map(String::as_str)
    }
}

/// A validated, executable pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    name: String,
    first: String,
    states: StateTable,
    data: PatternData,
    checksum: Option<String>,
}

impl Pattern {
    /// Translates a descriptor into executable states.
    pub fn build(descriptor: &PatternDescriptor) -> Result<Self, CoreError> {
        let data = PatternData {
            constants: descriptor.data.clone().into_iter().collect(),
            components: descriptor.components.clone().into_iter().collect(),
        };

        let mut states = StateTable::new();
        for sd in &descriptor.states {
            states.insert(build_state(sd)?)?;
        }

        let mut pattern = Self::from_parts(descriptor.name.clone(), states, data)?;

        if let Some(first) = &descriptor.first {
            if !first.trim().eq_ignore_ascii_case(&pattern.first) {
                return Err(CoreError::invalid_pattern(format!(
                    "first state '{}' is not the start state '{}'",
                    first, pattern.first
                )));
            }
        }

        for sd in &descriptor.states {
            check_state_references(sd, &pattern)?;
        }

        let json_bytes = serde_json::to_vec(descriptor)?;
        pattern.checksum = Some(format!("{:08x}", crc32c::crc32c(&json_bytes)));

        debug!(
            pattern = %pattern.name,
            states = pattern.states.len(),
            "Built pattern"
        );
        Ok(pattern)
    }

    /// Assembles a pattern from already built states.
    pub fn from_parts(
        name: impl Into<String>,
        states: StateTable,
        data: PatternData,
    ) -> Result<Self, CoreError> {
        let first = states.validate()?;
        Ok(Self {
            name: name.into(),
            first,
            states,
            data,
            checksum: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Label of the start state.
    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn states(&self) -> &StateTable {
        &self.states
    }

    pub fn data(&self) -> &PatternData {
        &self.data
    }

    /// CRC32C of the descriptor this pattern was built from.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn into_parts(self) -> (String, StateTable, PatternData) {
        (self.first, self.states, self.data)
    }
}

fn build_state(sd: &StateDescriptor) -> Result<State, CoreError> {
    let state_type = StateType::parse(&sd.state_type)?;
    let mut state = State::new(sd.label.trim(), state_type)
        .with_annotations(sd.report.clone(), sd.success.clone());

    for td in &sd.transitions {
        let transition = match td {
            TransitionDescriptor::Guarded { target, guards } => {
                let guards = guards
                    .iter()
                    .map(|g| Guard::parse(&g.param, &g.op, &g.value, g.data_type.as_deref()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| CoreError::InvalidGuard {
                        state: sd.label.clone(),
                        source,
                    })?;
                Transition::guarded(target.trim(), guards)
            }
            TransitionDescriptor::Trigger { target, message } => {
                let headers: Headers = message.headers.clone().into_iter().collect();
                let spec = MessageSpec::new(
                    &message.method,
                    message.url.clone(),
                    message.path.clone(),
                    headers,
                    message.body.clone(),
                    message.content_type.as_deref(),
                )
                .map_err(|source| CoreError::InvalidMessage {
                    state: sd.label.clone(),
                    source,
                })?;
                Transition::triggering(target.trim(), spec)
            }
        };
        state = state.with_transition(transition);
    }

    Ok(state)
}

/// Rejects references that can never resolve: unknown constants,
/// components or states. Captured content is only known at run time.
fn check_state_references(sd: &StateDescriptor, pattern: &Pattern) -> Result<(), CoreError> {
    let mut texts: Vec<&str> = Vec::new();
    for td in &sd.transitions {
        match td {
            TransitionDescriptor::Guarded { guards, .. } => {
                texts.extend(guards.iter().map(|g| g.value.as_str()));
            }
            TransitionDescriptor::Trigger { message, .. } => {
                texts.push(&message.url);
                texts.push(&message.path);
                texts.extend(message.headers.values().map(String::as_str));
                if let Some(body) = &message.body {
                    texts.push(body);
                }
            }
        }
    }

    for text in texts {
        let refs = reference::parse_all(text).map_err(|e| {
            CoreError::invalid_pattern(format!("state '{}': {}", sd.label, e))
        })?;
        for r in refs {
            let missing = match &r {
                Reference::Data(name) => pattern
                    .data
                    .constant(name)
                    .is_none()
                    .then(|| format!("data field does not exist: {}", name)),
                Reference::Component(name) => pattern
                    .data
                    .component(name)
                    .is_none()
                    .then(|| format!("component does not exist: {}", name)),
                Reference::StateContent { state, .. } | Reference::StateHeader { state, .. } => {
                    (!pattern.states.contains(state))
                        .then(|| format!("referenced state does not exist: {}", state))
                }
            };
            if let Some(reason) = missing {
                return Err(CoreError::invalid_pattern(format!(
                    "state '{}': {}",
                    sd.label, reason
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TransitionKind;
    use std::io::Write;

    const LOGIN_YAML: &str = r#"
name: login
data:
  user: alice
  expected: 200
components:
  server: http://127.0.0.1:8080
states:
  - label: send
    type: TRIGGERSTART
    transitions:
      - kind: trigger
        target: check
        message:
          method: post
          url: $$component.server$$
          path: /login
          headers:
            X-Attempt: 1
          body: '{"user":"$$data.user$$"}'
          content_type: json
  - label: check
    type: NORMAL
    transitions:
      - kind: guarded
        target: done
        guards:
          - { param: status, op: EQUALS, value: $$data.expected$$ }
      - kind: guarded
        target: rejected
        guards:
          - { param: status, op: "!=", value: 200 }
  - label: done
    type: END
    report: logged in
  - label: rejected
    type: END
    success: "false"
"#;

    #[test]
    fn test_build_from_yaml() {
        let descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        let pattern = Pattern::build(&descriptor).unwrap();

        assert_eq!(pattern.name(), "login");
        assert_eq!(pattern.first(), "send");
        assert_eq!(pattern.states().len(), 4);
        assert_eq!(pattern.data().constant("expected"), Some("200"));
        assert_eq!(
            pattern.data().component("server"),
            Some("http://127.0.0.1:8080")
        );

        let send = pattern.states().get("send").unwrap();
        let message = send.trigger().unwrap().message().unwrap();
        assert_eq!(message.headers.get("x-attempt"), Some("1"));
        assert_eq!(message.headers.get("content-type"), Some("application/json"));

        let check = pattern.states().get("check").unwrap();
        match &check.transitions()[1].kind {
            TransitionKind::Guarded(guards) => assert_eq!(guards[0].compare_to(), "200"),
            TransitionKind::Triggering(_) => panic!("expected guarded transition"),
        }

        assert!(!pattern.states().get("rejected").unwrap().is_successful_end());
    }

    #[test]
    fn test_checksum_is_stable_and_content_sensitive() {
        let descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        let a = Pattern::build(&descriptor).unwrap();
        let b = Pattern::build(&descriptor).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().unwrap().len(), 8);

        let mut changed = descriptor.clone();
        changed.data.insert("user".to_string(), "bob".to_string());
        let c = Pattern::build(&changed).unwrap();
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_json_descriptor() {
        let json = r#"{
            "name": "ping",
            "states": [
                {"label": "wait", "type": "START", "transitions": [
                    {"kind": "guarded", "target": "done", "guards": [
                        {"param": "method", "op": "==", "value": "GET"}
                    ]}
                ]},
                {"label": "done", "type": "END"}
            ]
        }"#;
        let descriptor = PatternDescriptor::from_json_str(json).unwrap();
        let pattern = Pattern::build(&descriptor).unwrap();
        assert_eq!(pattern.first(), "wait");
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("login.yaml");
        let mut file = std::fs::File::create(&yaml_path).unwrap();
        file.write_all(LOGIN_YAML.as_bytes()).unwrap();
        let descriptor = PatternDescriptor::load(&yaml_path).unwrap();
        assert_eq!(descriptor.name, "login");

        let json_path = dir.path().join("login.json");
        std::fs::write(&json_path, serde_json::to_string(&descriptor).unwrap()).unwrap();
        assert_eq!(PatternDescriptor::load(&json_path).unwrap(), descriptor);

        let txt_path = dir.path().join("login.txt");
        std::fs::write(&txt_path, LOGIN_YAML).unwrap();
        assert!(matches!(
            PatternDescriptor::load(&txt_path),
            Err(CoreError::InvalidPattern { .. })
        ));

        assert!(matches!(
            PatternDescriptor::load(dir.path().join("missing.yaml")),
            Err(CoreError::Io(_))
        ));
    }

    #[test]
    fn test_unknown_transition_kind_rejected() {
        let yaml = r#"
name: bad
states:
  - label: go
    type: START
    transitions:
      - kind: maybe
        target: done
  - label: done
    type: END
"#;
        assert!(matches!(
            PatternDescriptor::from_yaml_str(yaml),
            Err(CoreError::Yaml(_))
        ));
    }

    #[test]
    fn test_invalid_guard_and_message_fail_fast() {
        let mut descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        if let TransitionDescriptor::Guarded { guards, .. } = &mut descriptor.states[1].transitions[0] {
            guards[0].op = "ROUGHLY".to_string();
        }
        assert!(matches!(
            Pattern::build(&descriptor),
            Err(CoreError::InvalidGuard { .. })
        ));

        let mut descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        if let TransitionDescriptor::Trigger { message, .. } = &mut descriptor.states[0].transitions[0] {
            message.method = "PATCH".to_string();
        }
        let err = Pattern::build(&descriptor).unwrap_err();
        assert!(matches!(err, CoreError::InvalidMessage { .. }));
        assert!(err.to_string().contains("'send'"));
    }

    #[test]
    fn test_unresolvable_references_rejected() {
        let mut descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        descriptor.data.remove("user");
        let err = Pattern::build(&descriptor).unwrap_err();
        assert!(err.to_string().contains("data field does not exist: user"));

        let mut descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        descriptor.components.clear();
        assert!(Pattern::build(&descriptor).is_err());

        let mut descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        if let TransitionDescriptor::Guarded { guards, .. } = &mut descriptor.states[1].transitions[0] {
            guards[0].value = "$$ghost|headers|status$$".to_string();
        }
        assert!(Pattern::build(&descriptor).is_err());
    }

    #[test]
    fn test_first_must_match_start() {
        let mut descriptor = PatternDescriptor::from_yaml_str(LOGIN_YAML).unwrap();
        descriptor.first = Some("SEND".to_string());
        assert!(Pattern::build(&descriptor).is_ok());

        descriptor.first = Some("check".to_string());
        assert!(matches!(
            Pattern::build(&descriptor),
            Err(CoreError::InvalidPattern { .. })
        ));
    }
}
