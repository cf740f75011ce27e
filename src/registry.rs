//! Registry of appliance machines and sensor fan-out.
//! One power sensor may feed several appliances; each appliance machine is
//! owned exclusively by the registry and updated in sample order.

use crate::config::{ApplianceConfig, PowerThresholds, TimingConfig};
use crate::machine::ApplianceMachine;
use crate::types::{ApplianceSnapshot, PowerSample, TransitionEvent};
use anyhow::{anyhow, Result};
use embassy_time::Instant;
use log::info;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownAppliance(String),
    UnknownSensor(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownAppliance(id) => write!(f, "unknown appliance '{}'", id),
            RegistryError::UnknownSensor(sensor) => write!(f, "unknown power sensor '{}'", sensor),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Events produced by one fan-out or completion sweep across the registry.
/// Growable: the batch scales with the number of registered machines, and
/// transition events must never be dropped.
pub type EventBatch = Vec<TransitionEvent>;

#[derive(Default)]
pub struct ApplianceRegistry {
    // BTreeMap keeps sweeps and snapshots in stable id order.
    machines: BTreeMap<String, ApplianceMachine>,
    sensor_index: BTreeMap<String, Vec<String>>,
}

impl ApplianceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a new appliance. Fails on invalid config or a
    /// duplicate id; returns the derived appliance id.
    pub fn add(&mut self, config: ApplianceConfig, now: Instant) -> Result<String> {
        let machine = ApplianceMachine::from_config(&config, now)?;
        let id = machine.id().to_string();
        if self.machines.contains_key(&id) {
            return Err(anyhow!("appliance '{}' is already registered", id));
        }

        self.sensor_index
            .entry(machine.sensor_id().to_string())
            .or_default()
            .push(id.clone());
        info!(
            "registered appliance '{}' on sensor '{}'",
            id,
            machine.sensor_id()
        );
        self.machines.insert(id.clone(), machine);
        Ok(id)
    }

    pub fn remove(&mut self, appliance_id: &str) -> Result<(), RegistryError> {
        let machine = self
            .machines
            .remove(appliance_id)
            .ok_or_else(|| RegistryError::UnknownAppliance(appliance_id.to_string()))?;

        let sensor = machine.sensor_id().to_string();
        if let Some(ids) = self.sensor_index.get_mut(&sensor) {
            ids.retain(|id| id != appliance_id);
            if ids.is_empty() {
                self.sensor_index.remove(&sensor);
            }
        }
        info!("removed appliance '{}'", appliance_id);
        Ok(())
    }

    /// Feed one sample to a single appliance machine.
    pub fn handle_sample(
        &mut self,
        appliance_id: &str,
        sample: PowerSample,
    ) -> Result<heapless::Vec<TransitionEvent, 2>, RegistryError> {
        let machine = self
            .machines
            .get_mut(appliance_id)
            .ok_or_else(|| RegistryError::UnknownAppliance(appliance_id.to_string()))?;
        Ok(machine.handle_sample(sample))
    }

    /// Fan one sensor reading out to every appliance fed by that sensor,
    /// in registration order. Machines stay isolated: each applies its own
    /// thresholds and debounce to the shared reading.
    pub fn handle_sensor_sample(
        &mut self,
        sensor_id: &str,
        sample: PowerSample,
    ) -> Result<EventBatch, RegistryError> {
        let ids = self
            .sensor_index
            .get(sensor_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSensor(sensor_id.to_string()))?;

        let mut events = EventBatch::new();
        for id in &ids {
            if let Some(machine) = self.machines.get_mut(id) {
                events.extend(machine.handle_sample(sample));
            }
        }
        Ok(events)
    }

    pub fn reconfigure(
        &mut self,
        appliance_id: &str,
        thresholds: PowerThresholds,
        timing: TimingConfig,
    ) -> Result<(), RegistryError> {
        let machine = self
            .machines
            .get_mut(appliance_id)
            .ok_or_else(|| RegistryError::UnknownAppliance(appliance_id.to_string()))?;
        machine.reconfigure(thresholds, timing);
        Ok(())
    }

    /// Fire every completion deadline that has elapsed by `now`.
    pub fn check_completions(&mut self, now: Instant) -> EventBatch {
        let mut events = EventBatch::new();
        for machine in self.machines.values_mut() {
            if let Some(event) = machine.check_completion(now) {
                events.push(event);
            }
        }
        events
    }

    /// Earliest armed completion deadline across all machines, for timer
    /// scheduling.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.machines
            .values()
            .filter_map(|m| m.completion_deadline())
            .min()
    }

    pub fn snapshot(
        &self,
        appliance_id: &str,
        now: Instant,
    ) -> Result<ApplianceSnapshot, RegistryError> {
        let machine = self
            .machines
            .get(appliance_id)
            .ok_or_else(|| RegistryError::UnknownAppliance(appliance_id.to_string()))?;
        Ok(machine.snapshot(now))
    }

    pub fn snapshots(&self, now: Instant) -> Vec<ApplianceSnapshot> {
        self.machines.values().map(|m| m.snapshot(now)).collect()
    }

    pub fn appliance_ids(&self) -> Vec<String> {
        self.machines.keys().cloned().collect()
    }

    pub fn appliances_for_sensor(&self, sensor_id: &str) -> &[String] {
        self.sensor_index
            .get(sensor_id)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
