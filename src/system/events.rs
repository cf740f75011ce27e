//! Events the monitor publishes to downstream consumers (UI, automation,
//! notification layers). Discrete transitions and continuous snapshots travel
//! on the same channel so consumers see them in causal order.

use crate::types::{ApplianceSnapshot, TransitionEvent};

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A debounce-confirmed state change, including cycle completion.
    Transition(TransitionEvent),
    /// Refreshed projection of one appliance, published after each processed
    /// sample.
    Snapshot(ApplianceSnapshot),
    ApplianceAdded { appliance_id: String },
    ApplianceRemoved { appliance_id: String },
    ConfigReplaced { appliance_id: String },
}
