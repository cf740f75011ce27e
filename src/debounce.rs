//! Dwell-time debouncing of raw classifications.
//! A raw class must persist for the configured dwell before it may force a
//! state transition; a single noisy sample never does.

use crate::types::RawClass;
use embassy_time::{Duration, Instant};
use log::debug;

/// Outcome of feeding one defined raw class into the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The raw class survived the dwell; the caller may transition.
    Confirmed(RawClass),
    /// A change is pending but has not dwelled long enough yet.
    Pending,
    /// The raw class matches the current state; nothing to do.
    Steady,
}

pub struct DebounceFilter {
    dwell: Duration,
    pending: Option<(RawClass, Instant)>,
}

impl DebounceFilter {
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            pending: None,
        }
    }

    /// Feed one defined raw class observed at `at`, given the current state's
    /// underlying raw class. Samples must arrive in order; the caller
    /// guarantees per-appliance ordering.
    ///
    /// A toggle between two non-current classes restarts the window each
    /// time: evidence never accumulates across different target classes.
    pub fn observe(&mut self, raw: RawClass, current: RawClass, at: Instant) -> Verdict {
        if raw == current {
            if self.pending.take().is_some() {
                debug!("debounce: signal returned to {:?}, pending change dropped", current);
            }
            return Verdict::Steady;
        }

        let since = match self.pending {
            Some((class, since)) if class == raw => since,
            _ => {
                debug!("debounce: pending {:?} -> {:?}", current, raw);
                self.pending = Some((raw, at));
                at
            }
        };

        if at.duration_since(since) >= self.dwell {
            self.pending = None;
            Verdict::Confirmed(raw)
        } else {
            Verdict::Pending
        }
    }

    /// Drop any pending evidence (reconfiguration, machine reset).
    pub fn reset(&mut self, dwell: Duration) {
        self.dwell = dwell;
        self.pending = None;
    }

    pub fn pending(&self) -> Option<(RawClass, Instant)> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    #[test]
    fn test_single_sample_does_not_confirm() {
        let mut filter = DebounceFilter::new(Duration::from_secs(60));
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(0)),
            Verdict::Pending
        );
        assert!(filter.pending().is_some());
    }

    #[test]
    fn test_confirms_after_dwell() {
        let mut filter = DebounceFilter::new(Duration::from_secs(60));
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(0)),
            Verdict::Pending
        );
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(30)),
            Verdict::Pending
        );
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(60)),
            Verdict::Confirmed(RawClass::Running)
        );
        assert!(filter.pending().is_none());
    }

    #[test]
    fn test_return_to_current_clears_pending() {
        let mut filter = DebounceFilter::new(Duration::from_secs(60));
        filter.observe(RawClass::Running, RawClass::Off, at(0));
        assert_eq!(
            filter.observe(RawClass::Off, RawClass::Off, at(1)),
            Verdict::Steady
        );
        assert!(filter.pending().is_none());
        // The earlier excursion left no evidence behind.
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(2)),
            Verdict::Pending
        );
    }

    #[test]
    fn test_flapping_restarts_window() {
        let mut filter = DebounceFilter::new(Duration::from_secs(10));
        filter.observe(RawClass::Running, RawClass::Off, at(0));
        filter.observe(RawClass::Idle, RawClass::Off, at(5));
        filter.observe(RawClass::Running, RawClass::Off, at(9));
        // 9s since the Running window restarted at t=9, not t=0.
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(18)),
            Verdict::Pending
        );
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(19)),
            Verdict::Confirmed(RawClass::Running)
        );
    }

    #[test]
    fn test_zero_dwell_confirms_immediately() {
        let mut filter = DebounceFilter::new(Duration::from_secs(0));
        assert_eq!(
            filter.observe(RawClass::Idle, RawClass::Off, at(0)),
            Verdict::Confirmed(RawClass::Idle)
        );
    }

    #[test]
    fn test_reset_drops_evidence() {
        let mut filter = DebounceFilter::new(Duration::from_secs(60));
        filter.observe(RawClass::Running, RawClass::Off, at(0));
        filter.reset(Duration::from_secs(60));
        assert!(filter.pending().is_none());
        assert_eq!(
            filter.observe(RawClass::Running, RawClass::Off, at(59)),
            Verdict::Pending
        );
    }
}
