//! Configuration for the comparator and the capability detector

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KubeError, Result};

/// Default interval between two capability detection passes
pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_secs(30);

/// Capability detector configuration
///
/// ```yaml
/// interval: 1m
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    /// Time between two detection passes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_DETECTION_INTERVAL,
        }
    }
}

impl DetectorConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }

    /// Parse the configuration from YAML (or JSON)
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DetectorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(KubeError::InvalidConfig(
                "detection interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Structural comparator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComparatorConfig {
    /// Ignore `metadata.finalizers`, which the finalizer manager maintains on live objects
    pub ignore_finalizers: bool,

    /// Treat fields holding the API server default as unset
    pub ignore_server_defaults: bool,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            ignore_finalizers: true,
            ignore_server_defaults: true,
        }
    }
}
