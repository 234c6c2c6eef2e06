//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via INTEROP_CONFIG or --config)
//! 3. Environment variables

use interop_core::{MachineConfig, DEFAULT_QUEUE_CAPACITY};
use interop_protocol::TransportConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound listener configuration.
    pub listener: ListenerConfig,
    /// Machine run configuration.
    pub runner: RunnerConfig,
    /// Outbound transport configuration.
    pub transport: TransportSettings,
}

impl Config {
    /// Loads configuration from `path` (or INTEROP_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("INTEROP_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(&|name| std::env::var(name).ok());
    }

    /// Applies `INTEROP_*` overrides looked up through `var`.
    pub fn apply_overrides<F>(&mut self, var: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.listener.apply_overrides(var);
        self.runner.apply_overrides(var);
        self.transport.apply_overrides(var);
    }

    /// Checks values serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runner.queue_capacity must be at least 1".to_string(),
            ));
        }
        if !(100..=599).contains(&self.listener.response_status) {
            return Err(ConfigError::ValidationError(format!(
                "listener.response_status {} is not an HTTP status",
                self.listener.response_status
            )));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Inbound listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Accept inbound messages for the running machine.
    pub enabled: bool,
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Status returned to the peer once its message is queued.
    pub response_status: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8088)),
            response_status: 200,
        }
    }
}

impl ListenerConfig {
    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: &F) {
        if let Some(enabled) = var("INTEROP_LISTENER_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }

        if let Some(addr) = var("INTEROP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(status) = var("INTEROP_RESPONSE_STATUS") {
            if let Ok(code) = status.parse() {
                self.response_status = code;
            }
        }
    }
}

/// Machine run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Capacity of the inbound event queue.
    pub queue_capacity: usize,
    /// Upper bound on waiting for an inbound event in seconds (0 = wait forever).
    pub event_timeout_secs: u64,
    /// Start in single-step mode.
    pub step_mode: bool,
    /// Stream the report while the run progresses.
    pub realtime_report: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_timeout_secs: 0,
            step_mode: false,
            realtime_report: true,
        }
    }
}

impl RunnerConfig {
    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: &F) {
        if let Some(capacity) = var("INTEROP_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }

        if let Some(timeout) = var("INTEROP_EVENT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.event_timeout_secs = secs;
            }
        }

        if let Some(step) = var("INTEROP_STEP_MODE") {
            self.step_mode = step == "1" || step.to_lowercase() == "true";
        }

        if let Some(realtime) = var("INTEROP_REALTIME_REPORT") {
            self.realtime_report = realtime == "1" || realtime.to_lowercase() == "true";
        }
    }

    /// Returns the event timeout, `None` when disabled.
    pub fn event_timeout(&self) -> Option<Duration> {
        (self.event_timeout_secs > 0).then(|| Duration::from_secs(self.event_timeout_secs))
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            queue_capacity: self.queue_capacity,
            event_timeout: self.event_timeout(),
            step_mode: self.step_mode,
        }
    }
}

/// Outbound transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Request/response round trip timeout in seconds.
    pub request_timeout_secs: u64,
    /// User-Agent sent with every outbound request.
    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            request_timeout_secs: defaults.request_timeout.as_secs(),
            user_agent: defaults.user_agent,
        }
    }
}

impl TransportSettings {
    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: &F) {
        if let Some(timeout) = var("INTEROP_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.request_timeout_secs = secs;
            }
        }

        if let Some(agent) = var("INTEROP_USER_AGENT") {
            if !agent.is_empty() {
                self.user_agent = agent;
            }
        }
    }

    /// Returns request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: self.request_timeout(),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.listener.enabled);
        assert_eq!(config.listener.bind_addr.port(), 8088);
        assert_eq!(config.runner.queue_capacity, 50);
        assert_eq!(config.runner.event_timeout(), None);
        assert_eq!(config.transport.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.listener.bind_addr, config.listener.bind_addr);
        assert_eq!(parsed.transport.user_agent, config.transport.user_agent);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interop.yaml");
        std::fs::write(
            &path,
            "listener:\n  bind_addr: \"0.0.0.0:9100\"\nrunner:\n  event_timeout_secs: 5\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listener.bind_addr.port(), 9100);
        assert_eq!(config.listener.response_status, 200);
        assert_eq!(config.runner.event_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.runner.queue_capacity, 50);

        let machine = config.runner.machine_config();
        assert_eq!(machine.event_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yaml");

        let mut config = Config::default();
        config.runner.step_mode = true;
        config.transport.request_timeout_secs = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert!(loaded.runner.step_mode);
        assert_eq!(
            loaded.transport.to_transport_config().request_timeout,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/interop.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "listener:\n  bind_addr: \"not an address\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.runner.queue_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.listener.response_status = 42;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("INTEROP_RESPONSE_STATUS", "202"),
            ("INTEROP_STEP_MODE", "true"),
            ("INTEROP_LISTENER_ENABLED", "0"),
            ("INTEROP_EVENT_TIMEOUT", "not a number"),
            ("INTEROP_BIND", "0.0.0.0:9200"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(&|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.listener.response_status, 202);
        assert!(config.runner.step_mode);
        assert!(!config.listener.enabled);
        assert_eq!(config.listener.bind_addr.port(), 9200);
        // unparsable values keep the default
        assert_eq!(config.runner.event_timeout(), None);
    }
}
