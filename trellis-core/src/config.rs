//! Runtime Configuration
//!
//! All timing and sizing knobs of the runtime live in [`RuntimeConfig`].
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sizing and timing for sessions, workers, and update delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Inactivity window after which a session store is evicted.
    pub session_ttl_ms: u64,

    /// Maximum number of live session stores before LRU eviction.
    pub session_capacity: usize,

    /// Period of the background flusher.
    pub flush_interval_ms: u64,

    /// Upper bound on waiting for one push to be delivered.
    pub push_timeout_ms: u64,

    /// Upper bound on waiting for a flusher thread to exit.
    pub flusher_join_timeout_ms: u64,

    /// Worker count used when a task does not set its own.
    pub default_max_workers: usize,

    /// Name prefix for worker and flusher threads.
    pub worker_thread_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: 1_800_000,
            session_capacity: 1000,
            flush_interval_ms: 200,
            push_timeout_ms: 5000,
            flusher_join_timeout_ms: 1000,
            default_max_workers: 4,
            worker_thread_prefix: "trellis-bg".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a subsystem outright.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl_ms == 0 {
            return Err(ConfigError::Zero("session_ttl_ms"));
        }
        if self.session_capacity == 0 {
            return Err(ConfigError::Zero("session_capacity"));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Zero("flush_interval_ms"));
        }
        if self.push_timeout_ms == 0 {
            return Err(ConfigError::Zero("push_timeout_ms"));
        }
        if self.default_max_workers == 0 {
            return Err(ConfigError::Zero("default_max_workers"));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn flusher_join_timeout(&self) -> Duration {
        Duration::from_millis(self.flusher_join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.session_ttl(), Duration::from_secs(1800));
        assert_eq!(config.session_capacity, 1000);
        assert_eq!(config.flush_interval(), Duration::from_millis(200));
        assert_eq!(config.push_timeout(), Duration::from_secs(5));
        assert_eq!(config.flusher_join_timeout(), Duration::from_secs(1));
        assert_eq!(config.default_max_workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{"flush_interval_ms": 50}"#).unwrap();
        assert_eq!(config.flush_interval(), Duration::from_millis(50));
        assert_eq!(config.session_capacity, 1000);
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = RuntimeConfig::from_json(r#"{"session_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero("session_capacity")));

        let err = RuntimeConfig::from_json(r#"{"default_max_workers": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Zero("default_max_workers")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = RuntimeConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
