//! Appliance configuration and its validation.
//! Thresholds and timings are validated once, at configuration time, and the
//! typed forms are immutable afterwards; replacing them is a discrete
//! reconfiguration command, never in-place mutation.

use crate::types::{
    DEFAULT_COMPLETE_TIMEOUT_SECS, DEFAULT_DEBOUNCE_SECS, DEFAULT_OFF_THRESHOLD_W,
    DEFAULT_RUNNING_THRESHOLD_W,
};
use anyhow::{anyhow, Result};
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Power thresholds splitting the signal into OFF / IDLE / RUNNING bands.
/// Invariant: `running_threshold > off_threshold >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerThresholds {
    off_threshold: f32,
    running_threshold: f32,
}

impl PowerThresholds {
    pub fn new(off_threshold: f32, running_threshold: f32) -> Result<Self> {
        if !off_threshold.is_finite() || !running_threshold.is_finite() {
            return Err(anyhow!(
                "thresholds must be finite (off={}, running={})",
                off_threshold,
                running_threshold
            ));
        }
        if off_threshold < 0.0 {
            return Err(anyhow!(
                "off_threshold must be >= 0 W, got {:.2}",
                off_threshold
            ));
        }
        if running_threshold <= off_threshold {
            return Err(anyhow!(
                "running_threshold ({:.2} W) must be greater than off_threshold ({:.2} W)",
                running_threshold,
                off_threshold
            ));
        }
        Ok(Self {
            off_threshold,
            running_threshold,
        })
    }

    pub fn off_threshold(&self) -> f32 {
        self.off_threshold
    }

    pub fn running_threshold(&self) -> f32 {
        self.running_threshold
    }
}

/// Debounce and completion intervals for one appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub debounce_time: Duration,
    pub complete_timeout: Duration,
}

impl TimingConfig {
    pub fn from_secs(debounce_secs: u64, complete_timeout_secs: u64) -> Self {
        Self {
            debounce_time: Duration::from_secs(debounce_secs),
            complete_timeout: Duration::from_secs(complete_timeout_secs),
        }
    }
}

/// User-facing appliance configuration, as it arrives from the integration
/// layer. `power_sensor` names the external power-measurement source; several
/// appliances may share one sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceConfig {
    pub name: String,
    pub power_sensor: String,
    pub off_threshold: f32,
    pub running_threshold: f32,
    pub debounce_secs: u64,
    pub complete_timeout_secs: u64,
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            power_sensor: String::new(),
            off_threshold: DEFAULT_OFF_THRESHOLD_W,
            running_threshold: DEFAULT_RUNNING_THRESHOLD_W,
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
            complete_timeout_secs: DEFAULT_COMPLETE_TIMEOUT_SECS,
        }
    }
}

impl ApplianceConfig {
    /// Validate the whole config, returning the typed thresholds. Violations
    /// are rejected with a descriptive error, never clamped.
    pub fn validate(&self) -> Result<PowerThresholds> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("appliance name must not be empty"));
        }
        if self.power_sensor.trim().is_empty() {
            return Err(anyhow!(
                "appliance '{}' has no power sensor configured",
                self.name
            ));
        }
        PowerThresholds::new(self.off_threshold, self.running_threshold)
    }

    pub fn timing(&self) -> TimingConfig {
        TimingConfig::from_secs(self.debounce_secs, self.complete_timeout_secs)
    }

    /// Stable machine id derived from the display name.
    pub fn appliance_id(&self) -> String {
        appliance_id(&self.name)
    }
}

pub fn appliance_id(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}
