//! Instantaneous threshold classification of a power reading.
//! Pure and history-free; debouncing happens downstream.

use crate::config::PowerThresholds;
use crate::types::RawClass;

/// Classify a power reading against the configured thresholds.
///
/// Returns `None` for unavailable, negative or non-finite readings; such
/// samples carry no evidence and must not start or reset a debounce window.
pub fn classify(value: Option<f32>, thresholds: &PowerThresholds) -> Option<RawClass> {
    let watts = value?;
    if !watts.is_finite() || watts < 0.0 {
        return None;
    }

    if watts <= thresholds.off_threshold() {
        Some(RawClass::Off)
    } else if watts >= thresholds.running_threshold() {
        Some(RawClass::Running)
    } else {
        Some(RawClass::Idle)
    }
}
