use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Tuning knobs for the reflection engine and the voice wrapper.
///
/// Loaded from a TOML file; every field falls back to its default.
///
/// ```toml
/// enabled = true
/// delay_precision = 4
/// change_frequency = 2
/// teardown_timeout_ms = 1000
/// base_sample_rate = 22050
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Master switch for reflection synthesis
    pub enabled: bool,
    /// Lag tolerance, in 1/1024ths of a second of source playback
    pub delay_precision: u32,
    /// Rate nudge applied when a reflection drifts, in 1/128ths
    pub change_frequency: u32,
    /// How long teardown waits for the service thread
    pub teardown_timeout_ms: u64,
    /// Nominal source rate a packet's frequency factor scales
    pub base_sample_rate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_precision: 4,
            change_frequency: 2,
            teardown_timeout_ms: 1000,
            base_sample_rate: 22050,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Config {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.change_frequency >= 128 {
            return Err(ConfigError::Invalid(format!(
                "change_frequency must be below 128, got {}",
                self.change_frequency
            )));
        }
        if self.base_sample_rate == 0 {
            return Err(ConfigError::Invalid("base_sample_rate must be non-zero".into()));
        }
        Ok(())
    }

    pub fn teardown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn to_toml_string(&self) -> String {
        // Plain struct of scalars, serialization cannot fail
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
