//! Per-appliance power state machine.
//! States: OFF, IDLE, RUNNING; COMPLETE is a one-shot annotation layered on
//! IDLE when a duty cycle (RUNNING -> IDLE, sustained) finishes.

use crate::classifier::classify;
use crate::config::{ApplianceConfig, PowerThresholds, TimingConfig};
use crate::debounce::{DebounceFilter, Verdict};
use crate::types::{ApplianceSnapshot, ApplianceState, PowerSample, RawClass, TransitionEvent};
use anyhow::Result;
use embassy_time::{Duration, Instant};
use log::{debug, info, warn};
use statig::prelude::*;

/// Input events to the state machine: debounce-confirmed raw classes and the
/// completion deadline elapsing.
#[derive(Debug, Clone)]
pub enum MachineInput {
    Confirmed(RawClass),
    CompletionElapsed { at: Instant },
}

/// Shared context for the state machine.
#[derive(Debug)]
pub struct MachineContext {
    appliance_id: String,
    /// Timestamp of the input currently being handled.
    now: Instant,
    state_entered_at: Instant,
    completion_deadline: Option<Instant>,
    complete_timeout: Duration,
    /// One-shot COMPLETE annotation; cleared by the next processed sample.
    cycle_complete: bool,
    outputs: heapless::Vec<TransitionEvent, 2>,
}

impl MachineContext {
    fn emit(&mut self, from: ApplianceState, to: ApplianceState, at: Instant) {
        let _ = self.outputs.push(TransitionEvent {
            appliance_id: self.appliance_id.clone(),
            from,
            to,
            at,
        });
    }

    fn disarm(&mut self) {
        if self.completion_deadline.take().is_some() {
            debug!(
                "appliance {}: completion timer disarmed",
                self.appliance_id
            );
        }
    }
}

#[derive(Debug, Default)]
pub struct PowerStateMachine;

#[state_machine(
    initial = "State::off()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl PowerStateMachine {
    /// OFF - no measurable draw.
    #[state]
    fn off(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Confirmed(RawClass::Idle) => {
                context.emit(ApplianceState::Off, ApplianceState::Idle, context.now);
                context.state_entered_at = context.now;
                Transition(State::idle())
            }
            MachineInput::Confirmed(RawClass::Running) => {
                context.disarm();
                context.emit(ApplianceState::Off, ApplianceState::Running, context.now);
                context.state_entered_at = context.now;
                Transition(State::running())
            }
            MachineInput::Confirmed(RawClass::Off) => Handled,
            MachineInput::CompletionElapsed { .. } => {
                debug!(
                    "appliance {}: stale completion fire while off, ignored",
                    context.appliance_id
                );
                Handled
            }
        }
    }

    /// IDLE - drawing standby power; a completion deadline may be pending.
    #[state]
    fn idle(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Confirmed(RawClass::Off) => {
                context.disarm();
                // Leaving IDLE drops the COMPLETE annotation with it.
                context.cycle_complete = false;
                context.emit(ApplianceState::Idle, ApplianceState::Off, context.now);
                context.state_entered_at = context.now;
                Transition(State::off())
            }
            MachineInput::Confirmed(RawClass::Running) => {
                context.disarm();
                context.cycle_complete = false;
                context.emit(ApplianceState::Idle, ApplianceState::Running, context.now);
                context.state_entered_at = context.now;
                Transition(State::running())
            }
            MachineInput::Confirmed(RawClass::Idle) => Handled,
            MachineInput::CompletionElapsed { at } => {
                // The signal stayed below the running threshold for the whole
                // timeout: the duty cycle is done. COMPLETE annotates IDLE,
                // so no state change and no entry-time reset.
                context.completion_deadline = None;
                context.cycle_complete = true;
                context.emit(ApplianceState::Idle, ApplianceState::Complete, *at);
                info!("appliance {}: duty cycle complete", context.appliance_id);
                Handled
            }
        }
    }

    /// RUNNING - actively drawing cycle power.
    #[state]
    fn running(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Confirmed(RawClass::Idle) => {
                // Leaving RUNNING for IDLE arms the completion timer. Arming
                // always starts from a disarmed state.
                debug_assert!(context.completion_deadline.is_none());
                context.completion_deadline = Some(context.now + context.complete_timeout);
                context.emit(ApplianceState::Running, ApplianceState::Idle, context.now);
                context.state_entered_at = context.now;
                Transition(State::idle())
            }
            MachineInput::Confirmed(RawClass::Off) => {
                // Abrupt stop; no completion is signaled.
                context.emit(ApplianceState::Running, ApplianceState::Off, context.now);
                context.state_entered_at = context.now;
                Transition(State::off())
            }
            MachineInput::Confirmed(RawClass::Running) => Handled,
            MachineInput::CompletionElapsed { .. } => {
                debug!(
                    "appliance {}: stale completion fire while running, ignored",
                    context.appliance_id
                );
                Handled
            }
        }
    }

    fn on_transition(&mut self, source: &State, target: &State) {
        debug!("power state transition: {:?} -> {:?}", source, target);
    }

    fn state_to_appliance_state(state: &State) -> ApplianceState {
        match state {
            State::Off {} => ApplianceState::Off,
            State::Idle {} => ApplianceState::Idle,
            State::Running {} => ApplianceState::Running,
        }
    }
}

/// One monitored appliance: classifier thresholds, debounce filter, the
/// state machine and its timing bookkeeping. Owned exclusively by the
/// registry; machines never share mutable state.
pub struct ApplianceMachine {
    id: String,
    sensor_id: String,
    thresholds: PowerThresholds,
    timing: TimingConfig,
    machine: StateMachine<PowerStateMachine>,
    context: MachineContext,
    debounce: DebounceFilter,
    last_sample: Option<PowerSample>,
    last_power: Option<f32>,
}

impl ApplianceMachine {
    pub fn new(
        id: String,
        sensor_id: String,
        thresholds: PowerThresholds,
        timing: TimingConfig,
        created_at: Instant,
    ) -> Self {
        Self {
            context: MachineContext {
                appliance_id: id.clone(),
                now: created_at,
                state_entered_at: created_at,
                completion_deadline: None,
                complete_timeout: timing.complete_timeout,
                cycle_complete: false,
                outputs: heapless::Vec::new(),
            },
            machine: PowerStateMachine::default().state_machine(),
            debounce: DebounceFilter::new(timing.debounce_time),
            id,
            sensor_id,
            thresholds,
            timing,
            last_sample: None,
            last_power: None,
        }
    }

    pub fn from_config(config: &ApplianceConfig, created_at: Instant) -> Result<Self> {
        let thresholds = config.validate()?;
        Ok(Self::new(
            config.appliance_id(),
            config.power_sensor.clone(),
            thresholds,
            config.timing(),
            created_at,
        ))
    }

    /// Process one sample, in arrival order. Returns the transition events it
    /// caused: a completion deadline that elapsed before `observed_at` fires
    /// first, then at most one debounce-confirmed transition.
    pub fn handle_sample(&mut self, sample: PowerSample) -> heapless::Vec<TransitionEvent, 2> {
        self.context.outputs.clear();
        // The COMPLETE annotation is one-shot; any later report reverts to IDLE.
        self.context.cycle_complete = false;

        if let Some(deadline) = self.context.completion_deadline {
            if sample.observed_at >= deadline {
                self.fire_completion(deadline);
            }
        }

        self.last_sample = Some(sample);
        if let Some(watts) = sample.value {
            if watts.is_finite() && watts >= 0.0 {
                self.last_power = Some(watts);
            }
        }

        let Some(raw) = classify(sample.value, &self.thresholds) else {
            warn!(
                "appliance {}: undefined power reading {:?}, ignoring",
                self.id, sample.value
            );
            return std::mem::take(&mut self.context.outputs);
        };

        // A single above-running reading voids a pending completion: the
        // cycle only completes if the signal stays below the running
        // threshold for the whole timeout.
        if raw == RawClass::Running {
            self.context.disarm();
        }

        let current = self.underlying_raw_class();
        if let Verdict::Confirmed(class) = self.debounce.observe(raw, current, sample.observed_at)
        {
            self.context.now = sample.observed_at;
            let input = MachineInput::Confirmed(class);
            let _ = self.machine.handle_with_context(&input, &mut self.context);
        }

        std::mem::take(&mut self.context.outputs)
    }

    /// Fire the completion timer if its deadline has elapsed by `now`.
    /// Called from the owning execution context, so firing and sample
    /// processing never race.
    pub fn check_completion(&mut self, now: Instant) -> Option<TransitionEvent> {
        let deadline = self.context.completion_deadline?;
        if now < deadline {
            return None;
        }
        self.context.outputs.clear();
        self.fire_completion(deadline);
        let mut outputs = std::mem::take(&mut self.context.outputs);
        outputs.pop()
    }

    fn fire_completion(&mut self, deadline: Instant) {
        self.context.now = deadline;
        let input = MachineInput::CompletionElapsed { at: deadline };
        let _ = self.machine.handle_with_context(&input, &mut self.context);
    }

    /// Atomically replace thresholds and timing. All in-flight evidence is
    /// dropped: pending debounce, armed completion deadline, the COMPLETE
    /// annotation. Classification restarts from the next sample. No event is
    /// emitted.
    pub fn reconfigure(&mut self, thresholds: PowerThresholds, timing: TimingConfig) {
        self.thresholds = thresholds;
        self.timing = timing;
        self.context.complete_timeout = timing.complete_timeout;
        self.context.completion_deadline = None;
        self.context.cycle_complete = false;
        self.debounce.reset(timing.debounce_time);
        info!(
            "appliance {}: reconfigured (off={:.1}W running={:.1}W), evidence reset",
            self.id,
            thresholds.off_threshold(),
            thresholds.running_threshold()
        );
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn state(&self) -> ApplianceState {
        if self.context.cycle_complete {
            ApplianceState::Complete
        } else {
            PowerStateMachine::state_to_appliance_state(self.machine.state())
        }
    }

    fn underlying_raw_class(&self) -> RawClass {
        PowerStateMachine::state_to_appliance_state(self.machine.state()).raw_class()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ApplianceState::Running
    }

    pub fn is_complete(&self) -> bool {
        self.context.cycle_complete
    }

    /// Last known power reading; unavailable samples keep the previous value.
    pub fn power(&self) -> Option<f32> {
        self.last_power
    }

    pub fn last_sample(&self) -> Option<PowerSample> {
        self.last_sample
    }

    pub fn state_entered_at(&self) -> Instant {
        self.context.state_entered_at
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.duration_since(self.context.state_entered_at)
    }

    pub fn completion_deadline(&self) -> Option<Instant> {
        self.context.completion_deadline
    }

    pub fn snapshot(&self, now: Instant) -> ApplianceSnapshot {
        ApplianceSnapshot {
            appliance_id: self.id.clone(),
            state: self.state(),
            power_w: self.last_power,
            time_in_state_secs: self.time_in_state(now).as_secs(),
            is_running: self.is_running(),
            is_complete: self.is_complete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> ApplianceMachine {
        ApplianceMachine::new(
            "dishwasher".to_string(),
            "sensor.dishwasher_power".to_string(),
            PowerThresholds::new(5.0, 50.0).unwrap(),
            TimingConfig::from_secs(60, 300),
            Instant::from_secs(0),
        )
    }

    fn watts(secs: u64, value: f32) -> PowerSample {
        PowerSample::watts(value, Instant::from_secs(secs))
    }

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    #[test]
    fn test_starts_off() {
        let mut m = machine();
        assert_eq!(m.state(), ApplianceState::Off);
        assert!(m.handle_sample(watts(0, 2.0)).is_empty());
        assert_eq!(m.state(), ApplianceState::Off);
    }

    #[test]
    fn test_full_duty_cycle() {
        let mut m = machine();
        assert!(m.handle_sample(watts(0, 2.0)).is_empty());

        // Steady 80W; debounce confirms RUNNING after 60s of dwell.
        assert!(m.handle_sample(watts(5, 80.0)).is_empty());
        assert!(m.handle_sample(watts(35, 80.0)).is_empty());
        let events = m.handle_sample(watts(65, 80.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, ApplianceState::Off);
        assert_eq!(events[0].to, ApplianceState::Running);
        assert_eq!(events[0].at, at(65));
        assert!(m.is_running());

        // Cycle winds down to standby draw.
        assert!(m.handle_sample(watts(70, 10.0)).is_empty());
        let events = m.handle_sample(watts(130, 10.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, ApplianceState::Running);
        assert_eq!(events[0].to, ApplianceState::Idle);
        assert_eq!(m.completion_deadline(), Some(at(430)));

        // Signal stays below the running threshold for the whole timeout.
        assert!(m.handle_sample(watts(200, 10.0)).is_empty());
        assert!(m.check_completion(at(429)).is_none());
        let complete = m.check_completion(at(430)).unwrap();
        assert_eq!(complete.from, ApplianceState::Idle);
        assert_eq!(complete.to, ApplianceState::Complete);
        assert_eq!(complete.at, at(430));
        assert!(m.is_complete());
        assert_eq!(m.state(), ApplianceState::Complete);
        assert!(m.completion_deadline().is_none());

        // The annotation is one-shot: the next sample reverts to IDLE
        // without another event.
        assert!(m.handle_sample(watts(440, 10.0)).is_empty());
        assert!(!m.is_complete());
        assert_eq!(m.state(), ApplianceState::Idle);
    }

    #[test]
    fn test_short_excursion_does_not_transition() {
        let mut m = machine();
        m.handle_sample(watts(0, 2.0));
        // 1-second spike above the running threshold.
        assert!(m.handle_sample(watts(10, 80.0)).is_empty());
        assert!(m.handle_sample(watts(11, 2.0)).is_empty());
        assert_eq!(m.state(), ApplianceState::Off);
        // And the dropped spike left no evidence behind.
        assert!(m.handle_sample(watts(70, 80.0)).is_empty());
        assert_eq!(m.state(), ApplianceState::Off);
    }

    #[test]
    fn test_same_class_samples_are_idempotent() {
        let mut m = machine();
        m.handle_sample(watts(10, 2.0));
        m.handle_sample(watts(20, 2.0));
        assert_eq!(m.state_entered_at(), at(0));
        assert_eq!(m.time_in_state(at(20)), Duration::from_secs(20));
    }

    #[test]
    fn test_unavailable_samples_leave_evidence_intact() {
        let mut m = machine();
        assert!(m.handle_sample(watts(5, 80.0)).is_empty());
        // Sensor dropout mid-debounce.
        assert!(m.handle_sample(PowerSample::unavailable(at(30))).is_empty());
        assert!(m
            .handle_sample(PowerSample::watts(-2.0, at(40)))
            .is_empty());
        assert_eq!(m.state(), ApplianceState::Off);
        // The pending RUNNING record from t=5 still counts.
        let events = m.handle_sample(watts(65, 80.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, ApplianceState::Running);
        // Last-known power survives the dropout.
        assert_eq!(m.power(), Some(80.0));
    }

    #[test]
    fn test_running_to_off_skips_completion() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        assert!(m.is_running());

        // Appliance yanked from power: straight to OFF, no cycle completion.
        m.handle_sample(watts(100, 0.0));
        let events = m.handle_sample(watts(160, 0.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, ApplianceState::Running);
        assert_eq!(events[0].to, ApplianceState::Off);
        assert!(m.completion_deadline().is_none());
        assert!(m.check_completion(at(1000)).is_none());
    }

    #[test]
    fn test_running_sample_suppresses_completion() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        m.handle_sample(watts(70, 10.0));
        m.handle_sample(watts(130, 10.0));
        assert_eq!(m.completion_deadline(), Some(at(430)));

        // A single raw RUNNING reading before the deadline voids the cycle.
        assert!(m.handle_sample(watts(300, 80.0)).is_empty());
        assert!(m.completion_deadline().is_none());
        assert!(m.check_completion(at(430)).is_none());

        // Debounce still governs the IDLE -> RUNNING transition itself.
        let events = m.handle_sample(watts(360, 80.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, ApplianceState::Idle);
        assert_eq!(events[0].to, ApplianceState::Running);
        assert!(!m.is_complete());
    }

    #[test]
    fn test_completion_fires_before_late_sample() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        m.handle_sample(watts(70, 10.0));
        m.handle_sample(watts(130, 10.0));
        assert_eq!(m.completion_deadline(), Some(at(430)));

        // No timer wake happened; the next sample arrives past the deadline.
        let events = m.handle_sample(watts(500, 10.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, ApplianceState::Complete);
        assert_eq!(events[0].at, at(430));
        assert!(m.is_complete());
    }

    #[test]
    fn test_late_completion_and_off_confirm_on_same_sample() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        m.handle_sample(watts(70, 10.0));
        m.handle_sample(watts(130, 10.0));
        assert_eq!(m.completion_deadline(), Some(at(430)));

        // Pending OFF from before the deadline; the sample that confirms it
        // arrives after the deadline has already elapsed.
        assert!(m.handle_sample(watts(400, 2.0)).is_empty());
        let events = m.handle_sample(watts(460, 2.0));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].to, ApplianceState::Complete);
        assert_eq!(events[0].at, at(430));
        assert_eq!(events[1].from, ApplianceState::Idle);
        assert_eq!(events[1].to, ApplianceState::Off);
        assert_eq!(events[1].at, at(460));
        // COMPLETE annotates IDLE only; the machine is OFF now.
        assert_eq!(m.state(), ApplianceState::Off);
        assert!(!m.is_complete());
        let snap = m.snapshot(at(460));
        assert_eq!(snap.state, ApplianceState::Off);
        assert!(!snap.is_complete);
    }

    #[test]
    fn test_idle_to_off_disarms_completion() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        m.handle_sample(watts(70, 10.0));
        m.handle_sample(watts(130, 10.0));
        assert!(m.completion_deadline().is_some());

        m.handle_sample(watts(140, 2.0));
        let events = m.handle_sample(watts(200, 2.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, ApplianceState::Idle);
        assert_eq!(events[0].to, ApplianceState::Off);
        assert!(m.completion_deadline().is_none());
        assert!(m.check_completion(at(430)).is_none());
    }

    #[test]
    fn test_reconfigure_resets_evidence() {
        let mut m = machine();
        // Mid-debounce towards RUNNING.
        m.handle_sample(watts(5, 80.0));
        m.reconfigure(
            PowerThresholds::new(5.0, 100.0).unwrap(),
            TimingConfig::from_secs(60, 300),
        );
        // No spurious event, and the pending record is gone; 80W now
        // classifies as IDLE under the new thresholds.
        assert!(m.handle_sample(watts(10, 80.0)).is_empty());
        let events = m.handle_sample(watts(70, 80.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, ApplianceState::Idle);
    }

    #[test]
    fn test_reconfigure_disarms_completion() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        m.handle_sample(watts(70, 10.0));
        m.handle_sample(watts(130, 10.0));
        assert!(m.completion_deadline().is_some());

        m.reconfigure(
            PowerThresholds::new(5.0, 50.0).unwrap(),
            TimingConfig::from_secs(60, 300),
        );
        assert!(m.completion_deadline().is_none());
        assert!(m.check_completion(at(1000)).is_none());
    }

    #[test]
    fn test_snapshot_projections() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));

        let snap = m.snapshot(at(90));
        assert_eq!(snap.appliance_id, "dishwasher");
        assert_eq!(snap.state, ApplianceState::Running);
        assert_eq!(snap.power_w, Some(80.0));
        assert_eq!(snap.time_in_state_secs, 30);
        assert!(snap.is_running);
        assert!(!snap.is_complete);
    }

    #[test]
    fn test_complete_keeps_idle_entry_time() {
        let mut m = machine();
        m.handle_sample(watts(0, 80.0));
        m.handle_sample(watts(60, 80.0));
        m.handle_sample(watts(70, 10.0));
        m.handle_sample(watts(130, 10.0));
        m.check_completion(at(430)).unwrap();
        // COMPLETE annotates IDLE; time in state keeps counting from the
        // RUNNING -> IDLE transition at t=130.
        assert_eq!(m.state_entered_at(), at(130));
        assert_eq!(m.time_in_state(at(430)), Duration::from_secs(300));
    }

    #[test]
    fn test_zero_debounce_transitions_immediately() {
        let mut m = ApplianceMachine::new(
            "kettle".to_string(),
            "sensor.kettle_power".to_string(),
            PowerThresholds::new(5.0, 50.0).unwrap(),
            TimingConfig::from_secs(0, 300),
            Instant::from_secs(0),
        );
        let events = m.handle_sample(watts(1, 80.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, ApplianceState::Running);
    }
}
