use embassy_time::{Duration, Instant};
use serde::{Deserialize, Serialize};

/// Instantaneous threshold classification of a power sample, before
/// debouncing. Unavailable/invalid samples have no raw class at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawClass {
    Off,
    Idle,
    Running,
}

/// Debounced appliance state. `Complete` is a one-shot annotation layered on
/// `Idle` after a finished duty cycle, never a direct classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplianceState {
    Off,
    Idle,
    Running,
    Complete,
}

impl ApplianceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplianceState::Off => "off",
            ApplianceState::Idle => "idle",
            ApplianceState::Running => "running",
            ApplianceState::Complete => "complete",
        }
    }

    /// The raw class this state classifies as; `Complete` sits on top of
    /// `Idle` for debounce purposes.
    pub fn raw_class(&self) -> RawClass {
        match self {
            ApplianceState::Off => RawClass::Off,
            ApplianceState::Idle | ApplianceState::Complete => RawClass::Idle,
            ApplianceState::Running => RawClass::Running,
        }
    }
}

/// One observation of the monitored power signal. `None` marks an
/// unavailable reading (sensor dropout, non-numeric source state).
#[derive(Debug, Clone, Copy)]
pub struct PowerSample {
    pub value: Option<f32>,
    pub observed_at: Instant,
}

impl PowerSample {
    pub fn watts(value: f32, observed_at: Instant) -> Self {
        Self {
            value: Some(value),
            observed_at,
        }
    }

    pub fn unavailable(observed_at: Instant) -> Self {
        Self {
            value: None,
            observed_at,
        }
    }
}

/// A confirmed state change, the sole discrete output of a machine.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEvent {
    pub appliance_id: String,
    pub from: ApplianceState,
    pub to: ApplianceState,
    pub at: Instant,
}

/// Continuous read-only projection of one appliance machine, shaped for
/// downstream consumers (UI, sensor entities).
#[derive(Debug, Clone, Serialize)]
pub struct ApplianceSnapshot {
    pub appliance_id: String,
    pub state: ApplianceState,
    pub power_w: Option<f32>,
    pub time_in_state_secs: u64,
    pub is_running: bool,
    pub is_complete: bool,
}

impl ApplianceSnapshot {
    pub fn time_in_state(&self) -> Duration {
        Duration::from_secs(self.time_in_state_secs)
    }
}

pub const DEFAULT_OFF_THRESHOLD_W: f32 = 5.0;
pub const DEFAULT_RUNNING_THRESHOLD_W: f32 = 50.0;
pub const DEFAULT_DEBOUNCE_SECS: u64 = 60;
pub const DEFAULT_COMPLETE_TIMEOUT_SECS: u64 = 300;
