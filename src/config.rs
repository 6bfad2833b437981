//! Engine configuration
//!
//! Policy constants (GC grace window, order-stamp suffix length, checksum
//! mode) live here instead of at call sites so deployments can tune them.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default grace window before an expired pointer may be collected (10 minutes)
pub const DEFAULT_GC_GRACE_MS: u64 = 10 * 60 * 1000;

/// Default number of random characters appended by `between`
pub const DEFAULT_STAMP_SUFFIX_LEN: usize = 16;

/// Tunables for the sync engine
///
/// # Example
///
/// ```rust
/// use richsync_core::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "gc_grace_ms": 60000 }"#).unwrap();
/// assert_eq!(config.gc_grace().as_secs(), 60);
/// assert_eq!(config.stamp_suffix_len, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a pointer survives after its target was tombstoned
    pub gc_grace_ms: u64,

    /// Length of the random suffix appended to generated order stamps
    pub stamp_suffix_len: usize,

    /// Prefix every checksum token with its value type
    pub checksum_type_safe: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_grace_ms: DEFAULT_GC_GRACE_MS,
            stamp_suffix_len: DEFAULT_STAMP_SUFFIX_LEN,
            checksum_type_safe: true,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field is within its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stamp_suffix_len == 0 {
            return Err(ConfigError::Invalid {
                field: "stamp_suffix_len",
                reason: "must be at least 1".to_string(),
            });
        }
        let in_range = i64::try_from(self.gc_grace_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .is_some();
        if !in_range {
            return Err(ConfigError::Invalid {
                field: "gc_grace_ms",
                reason: format!("{} ms is out of range", self.gc_grace_ms),
            });
        }
        Ok(())
    }

    /// Grace window as a [`Duration`]
    pub fn gc_grace(&self) -> Duration {
        Duration::from_millis(self.gc_grace_ms)
    }

    /// Grace window as a [`chrono::Duration`] for date arithmetic
    pub(crate) fn gc_grace_chrono(&self) -> chrono::Duration {
        i64::try_from(self.gc_grace_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.gc_grace(), Duration::from_secs(600));
        assert_eq!(config.stamp_suffix_len, 16);
        assert!(config.checksum_type_safe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"stamp_suffix_len": 8}"#).unwrap();
        assert_eq!(config.stamp_suffix_len, 8);
        assert_eq!(config.gc_grace_ms, DEFAULT_GC_GRACE_MS);
    }

    #[test]
    fn test_rejects_zero_suffix() {
        let err = EngineConfig::from_json(r#"{"stamp_suffix_len": 0}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "stamp_suffix_len",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
