//! Configuration for a scheduler instance.
//!
//! Loaded from TOML. Every field has a default, so an empty document (or no
//! file at all) gives the stock tuning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TimingError;
use crate::segment::Segment;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimingConfig {
    /// Seconds of realtime between two `SlowUpdate` passes.
    #[serde(default = "default_slow_update_interval")]
    pub slow_update_interval: f64,

    /// Number of `update` calls between two compaction passes.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u32,

    /// Base growth step of a full slot table.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Initial slot capacity per segment.
    #[serde(default)]
    pub capacity: CapacityConfig,

    /// Log a warning when a wait request is rejected.
    #[serde(default = "default_warn_on_wait_issue")]
    pub warn_on_wait_issue: bool,

    /// Step a coroutine once at scheduling time when its segment is idle.
    #[serde(default)]
    pub prewarm: bool,
}

/// Initial slot capacity of each segment table
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CapacityConfig {
    #[serde(default = "default_update_capacity")]
    pub update: usize,
    #[serde(default = "default_fixed_update_capacity")]
    pub fixed_update: usize,
    #[serde(default = "default_late_update_capacity")]
    pub late_update: usize,
    #[serde(default = "default_slow_update_capacity")]
    pub slow_update: usize,
}

fn default_slow_update_interval() -> f64 {
    1.0 / 7.0
}

fn default_maintenance_interval() -> u32 {
    64
}

fn default_chunk_size() -> usize {
    64
}

fn default_warn_on_wait_issue() -> bool {
    true
}

fn default_update_capacity() -> usize {
    256
}

fn default_fixed_update_capacity() -> usize {
    64
}

fn default_late_update_capacity() -> usize {
    8
}

fn default_slow_update_capacity() -> usize {
    64
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            slow_update_interval: default_slow_update_interval(),
            maintenance_interval: default_maintenance_interval(),
            chunk_size: default_chunk_size(),
            capacity: CapacityConfig::default(),
            warn_on_wait_issue: default_warn_on_wait_issue(),
            prewarm: false,
        }
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            update: default_update_capacity(),
            fixed_update: default_fixed_update_capacity(),
            late_update: default_late_update_capacity(),
            slow_update: default_slow_update_capacity(),
        }
    }
}

impl CapacityConfig {
    pub fn for_segment(&self, segment: Segment) -> usize {
        match segment {
            Segment::Update => self.update,
            Segment::FixedUpdate => self.fixed_update,
            Segment::LateUpdate => self.late_update,
            Segment::SlowUpdate => self.slow_update,
        }
    }
}

impl TimingConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, TimingError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, TimingError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| TimingError::config_io(path, err))?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, TimingError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("no timing config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TimingConfig::default();
        assert_eq!(config.maintenance_interval, 64);
        assert_eq!(config.chunk_size, 64);
        assert!((config.slow_update_interval - 1.0 / 7.0).abs() < 1e-12);
        assert_eq!(config.capacity.for_segment(Segment::Update), 256);
        assert_eq!(config.capacity.for_segment(Segment::FixedUpdate), 64);
        assert_eq!(config.capacity.for_segment(Segment::LateUpdate), 8);
        assert_eq!(config.capacity.for_segment(Segment::SlowUpdate), 64);
        assert!(config.warn_on_wait_issue);
        assert!(!config.prewarm);
    }

    #[test]
    fn test_config_empty_document_is_default() {
        let config = TimingConfig::from_toml_str("").unwrap();
        assert_eq!(config, TimingConfig::default());
    }

    #[test]
    fn test_config_partial_override() {
        let config = TimingConfig::from_toml_str(
            r#"
slow_update_interval = 0.5
prewarm = true

[capacity]
late_update = 32
"#,
        )
        .unwrap();

        assert_eq!(config.slow_update_interval, 0.5);
        assert!(config.prewarm);
        assert_eq!(config.capacity.late_update, 32);
        assert_eq!(config.capacity.update, 256);
        assert_eq!(config.chunk_size, 64);
    }

    #[test]
    fn test_config_rejects_bad_types() {
        let err = TimingConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, TimingError::Config(_)));
    }
}
