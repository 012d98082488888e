use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::ConfigError, planner::ChunkLimits, retry::RetryPolicy};

const MIB: u64 = 1024 * 1024;

/// Limits and call policy for one pipeline invocation.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes:
///
/// ```toml
/// max_chunk_bytes = 20971520
/// max_chunk_secs = 300.0
/// call_timeout_secs = 60.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_chunk_bytes: u64,
    pub min_chunk_secs: f64,
    pub max_chunk_secs: f64,
    pub max_asset_bytes: u64,
    pub max_asset_secs: f64,
    /// Used to estimate the duration when probing cannot report one.
    pub assumed_bitrate_bps: u64,
    pub call_timeout_secs: f64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 24 * MIB,
            min_chunk_secs: 30.0,
            max_chunk_secs: 600.0,
            max_asset_bytes: 25 * MIB,
            max_asset_secs: 1500.0,
            assumed_bitrate_bps: 128_000,
            call_timeout_secs: 45.0,
            max_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_chunk_bytes == 0 || self.max_asset_bytes == 0 {
            return Err(ConfigError::Invalid("byte limits must be > 0".into()));
        }
        for (name, value) in [
            ("min_chunk_secs", self.min_chunk_secs),
            ("max_chunk_secs", self.max_chunk_secs),
            ("max_asset_secs", self.max_asset_secs),
            ("call_timeout_secs", self.call_timeout_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0, got {value}")));
            }
        }
        if Duration::try_from_secs_f64(self.call_timeout_secs).is_err() {
            return Err(ConfigError::Invalid(format!(
                "call_timeout_secs is out of range: {}",
                self.call_timeout_secs
            )));
        }
        if self.min_chunk_secs > self.max_chunk_secs {
            return Err(ConfigError::Invalid(format!(
                "min_chunk_secs ({}) exceeds max_chunk_secs ({})",
                self.min_chunk_secs, self.max_chunk_secs
            )));
        }
        if self.assumed_bitrate_bps == 0 {
            return Err(ConfigError::Invalid("assumed_bitrate_bps must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be >= 1".into()));
        }
        Ok(())
    }

    pub fn limits(&self) -> ChunkLimits {
        ChunkLimits {
            max_chunk_bytes: self.max_chunk_bytes,
            min_chunk_secs: self.min_chunk_secs,
            max_chunk_secs: self.max_chunk_secs,
            assumed_bitrate_bps: self.assumed_bitrate_bps,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            call_timeout: Duration::try_from_secs_f64(self.call_timeout_secs)
                .unwrap_or(Duration::MAX),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max_chunk_secs = 120.0
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.max_chunk_secs, 120.0);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_chunk_bytes, PipelineConfig::default().max_chunk_bytes);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn rejects_inverted_chunk_durations() {
        let err = PipelineConfig::from_toml_str(
            r#"
            min_chunk_secs = 90.0
            max_chunk_secs = 60.0
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_timeouts_beyond_duration_range() {
        let err = PipelineConfig::from_toml_str("call_timeout_secs = 1e30").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = PipelineConfig {
            call_timeout_secs: 1e30,
            ..PipelineConfig::default()
        };
        assert_eq!(config.retry_policy().call_timeout, Duration::MAX);
    }

    #[test]
    fn rejects_unknown_types() {
        let err = PipelineConfig::from_toml_str("max_chunk_bytes = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = PipelineConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
