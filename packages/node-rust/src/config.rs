//! Node configuration.
//!
//! Loaded from JSON; every field has a default so partial files are valid.
//! Each provider gets its own [`ProviderConfig`] section keyed by scheme.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique identifier for this node.
    pub node_id: String,
    /// How long the registry waits for a channel to open. 0 waits forever.
    pub open_timeout_ms: u64,
    /// Attach the metrics observer to every channel the registry builds.
    pub metrics: bool,
    pub log: LogConfig,
    /// Provider sections, keyed by scheme.
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", uuid::Uuid::new_v4()),
            open_timeout_ms: 10_000,
            metrics: true,
            log: LogConfig::default(),
            providers: HashMap::new(),
        }
    }
}

impl NodeConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `json` is not a valid configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Configuration section for `scheme`, empty if absent.
    #[must_use]
    pub fn provider(&self, scheme: &str) -> ProviderConfig {
        self.providers.get(scheme).cloned().unwrap_or_default()
    }

    /// `None` when channels may take as long as they need to open.
    #[must_use]
    pub fn open_timeout(&self) -> Option<Duration> {
        (self.open_timeout_ms > 0).then(|| Duration::from_millis(self.open_timeout_ms))
    }
}

/// Logging configuration consumed by [`init_tracing`](crate::telemetry::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Free-form settings for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderConfig(serde_json::Map<String, serde_json::Value>);

impl ProviderConfig {
    /// Looks up a value by dotted path, e.g. `"buffer.capacity"`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Value at `path` converted to `T`, or `default` if missing or of the
    /// wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path)
            .and_then(|value| T::deserialize(value).ok())
            .unwrap_or(default)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }
}
