use crate::error::ConfigError;
use crate::filter::FilterConfig;
use crate::pose::{HandednessPolicy, LateralFusion, PoseEstimator};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub staleness_timeout_ms: u64,
    pub change_threshold: i32,
    pub tick_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Unbounded discovery when absent.
    pub scan_timeout_ms: Option<u64>,
    pub reconnect: bool,
    pub lateral_fusion: LateralFusion,
    pub handedness: HandednessPolicy,
    pub lateral_frame_rotation_deg: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            staleness_timeout_ms: 700,
            change_threshold: 3,
            tick_interval_ms: 300,
            shutdown_grace_ms: 1000,
            scan_timeout_ms: None,
            reconnect: true,
            lateral_fusion: LateralFusion::Mean,
            handedness: HandednessPolicy::Reported,
            lateral_frame_rotation_deg: 260.0,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<PipelineConfig, ConfigError> {
        let data = std::fs::read(path)?;
        let config = serde_json::from_slice::<PipelineConfig>(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be positive",
            });
        }
        if self.change_threshold <= 0 {
            return Err(ConfigError::Invalid {
                field: "change_threshold",
                reason: "must be positive",
            });
        }
        if !self.lateral_frame_rotation_deg.is_finite() {
            return Err(ConfigError::Invalid {
                field: "lateral_frame_rotation_deg",
                reason: "must be a finite angle",
            });
        }
        Ok(())
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            staleness_timeout: Duration::from_millis(self.staleness_timeout_ms),
            change_threshold: self.change_threshold,
        }
    }

    pub fn estimator(&self) -> PoseEstimator {
        PoseEstimator::new(
            self.lateral_fusion,
            self.handedness,
            self.lateral_frame_rotation_deg,
        )
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout_ms.map(Duration::from_millis)
    }
}
