//! Guard configuration loaded from TOML

use crate::compression::CompressionLevel;
use crate::error::GuardError;
use crate::error::Result;
use crate::retention::RetentionPolicy;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// Top-level configuration, `~/.deepguard/config.toml`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Checkpoint cadence and payload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Take a checkpoint every `interval` levels of depth
    #[serde(default = "default_interval")]
    pub interval: usize,

    /// Depths at which a checkpoint is always taken
    #[serde(default)]
    pub depth_thresholds: Vec<usize>,

    #[serde(default)]
    pub compression_level: CompressionLevel,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            depth_thresholds: Vec::new(),
            compression_level: CompressionLevel::Balanced,
        }
    }
}

const fn default_interval() -> usize {
    10
}

/// Loop detection thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Number of recent frames kept per context
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// A loop is detected when occurrences exceed this
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: usize,

    /// An emergency checkpoint is recommended when occurrences exceed this
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            repetition_threshold: default_repetition_threshold(),
            emergency_threshold: default_emergency_threshold(),
        }
    }
}

const fn default_window_size() -> usize {
    100
}

const fn default_repetition_threshold() -> usize {
    10
}

const fn default_emergency_threshold() -> usize {
    5
}

/// Checkpoint store backend selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

impl GuardConfig {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|p| p.join(".deepguard/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".deepguard/config.toml"))
    }

    /// Load configuration from the default location, falling back to defaults
    /// when no file exists
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Load a configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save this configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GuardError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.interval == 0 {
            return Err(GuardError::InvalidConfig(
                "checkpoint interval must be at least 1".to_string(),
            ));
        }

        if self.monitor.window_size == 0 {
            return Err(GuardError::InvalidConfig(
                "monitor window size must be at least 1".to_string(),
            ));
        }

        if self.monitor.emergency_threshold >= self.monitor.repetition_threshold {
            return Err(GuardError::InvalidConfig(format!(
                "emergency threshold ({}) must be below repetition threshold ({})",
                self.monitor.emergency_threshold, self.monitor.repetition_threshold
            )));
        }

        if self.retention.max_checkpoints == Some(0) {
            return Err(GuardError::InvalidConfig(
                "retention must keep at least one checkpoint".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let config = GuardConfig::default();
        assert_eq!(config.monitor.window_size, 100);
        assert_eq!(config.monitor.repetition_threshold, 10);
        assert_eq!(config.monitor.emergency_threshold, 5);
        assert_eq!(config.checkpoint.interval, 10);
        assert_eq!(config.store, StoreConfig::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = GuardConfig::from_toml(
            r#"
            [checkpoint]
            interval = 4
            depth_thresholds = [50, 500]
            compression_level = "maximum"

            [monitor]
            repetition_threshold = 20

            [store]
            backend = "file"
            path = "/tmp/deepguard"
            "#,
        )
        .unwrap();

        assert_eq!(config.checkpoint.interval, 4);
        assert_eq!(config.checkpoint.depth_thresholds, vec![50, 500]);
        assert_eq!(config.checkpoint.compression_level, CompressionLevel::Maximum);
        assert_eq!(config.monitor.repetition_threshold, 20);
        assert_eq!(config.monitor.emergency_threshold, 5);
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from("/tmp/deepguard")
            }
        );
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = GuardConfig::from_toml(
            r#"
            [monitor]
            repetition_threshold = 5
            emergency_threshold = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let mut config = GuardConfig::default();
        config.checkpoint.interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = GuardConfig::default();
        config.retention.max_checkpoints = Some(8);
        config.to_file(&path).unwrap();

        let loaded = GuardConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
