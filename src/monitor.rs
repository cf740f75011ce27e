//! Appliance monitor: the single control loop that owns the registry.
//! Samples, management commands and completion-timer wakes are multiplexed
//! with Embassy select, so all state mutation is serialized without locks.

use crate::config::{ApplianceConfig, PowerThresholds, TimingConfig};
use crate::registry::ApplianceRegistry;
use crate::system::events::MonitorEvent;
use crate::types::PowerSample;
use anyhow::Result;
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant, Timer};
use log::{info, warn};
use std::sync::Arc;

/// One reading from an external power sensor, addressed by sensor id.
#[derive(Debug, Clone)]
pub struct SensorSample {
    pub sensor_id: String,
    pub sample: PowerSample,
}

/// Runtime management of the appliance set.
#[derive(Debug, Clone)]
pub enum MonitorCommand {
    AddAppliance(ApplianceConfig),
    RemoveAppliance {
        appliance_id: String,
    },
    Reconfigure {
        appliance_id: String,
        thresholds: PowerThresholds,
        timing: TimingConfig,
    },
}

pub type SampleChannel = Channel<CriticalSectionRawMutex, SensorSample, 16>;
pub type CommandChannel = Channel<CriticalSectionRawMutex, MonitorCommand, 5>;
pub type MonitorEventChannel = Channel<CriticalSectionRawMutex, MonitorEvent, 32>;

pub struct ApplianceMonitor {
    registry: ApplianceRegistry,
    sample_channel: Arc<SampleChannel>,
    command_channel: Arc<CommandChannel>,
    event_channel: Arc<MonitorEventChannel>,
}

impl ApplianceMonitor {
    pub fn new() -> Self {
        Self {
            registry: ApplianceRegistry::new(),
            sample_channel: Arc::new(Channel::new()),
            command_channel: Arc::new(Channel::new()),
            event_channel: Arc::new(Channel::new()),
        }
    }

    /// Register an appliance before the loop starts. Once running, use
    /// `MonitorCommand::AddAppliance` instead.
    pub fn add_appliance(&mut self, config: ApplianceConfig) -> Result<String> {
        self.registry.add(config, Instant::now())
    }

    pub fn sample_channel(&self) -> Arc<SampleChannel> {
        Arc::clone(&self.sample_channel)
    }

    pub fn command_channel(&self) -> Arc<CommandChannel> {
        Arc::clone(&self.command_channel)
    }

    pub fn event_channel(&self) -> Arc<MonitorEventChannel> {
        Arc::clone(&self.event_channel)
    }

    pub fn registry(&self) -> &ApplianceRegistry {
        &self.registry
    }

    /// Main control loop. Never returns; meant to run as its own task.
    pub async fn run(&mut self) {
        info!(
            "appliance monitor started with {} appliance(s)",
            self.registry.len()
        );

        loop {
            let sample_fut = self.sample_channel.receive();
            let command_fut = self.command_channel.receive();
            let wake_fut = self.completion_wake();

            match select(select(sample_fut, command_fut), wake_fut).await {
                Either::First(Either::First(sample)) => {
                    self.handle_sensor_sample(sample).await;
                }
                Either::First(Either::Second(command)) => {
                    self.handle_command(command).await;
                }
                Either::Second(()) => {
                    self.handle_completion_wake().await;
                }
            }
        }
    }

    /// Sleep until the earliest armed completion deadline. With nothing
    /// armed this is a park, not a poll: any sample or command re-enters the
    /// select and re-evaluates the deadline, and if the fallback timer ever
    /// expires the resulting sweep finds no deadlines and does nothing.
    fn completion_wake(&self) -> Timer {
        match self.registry.next_deadline() {
            Some(deadline) => Timer::at(deadline),
            None => Timer::after(Duration::from_secs(3600)),
        }
    }

    async fn handle_sensor_sample(&mut self, sample: SensorSample) {
        let now = Instant::now();
        match self
            .registry
            .handle_sensor_sample(&sample.sensor_id, sample.sample)
        {
            Ok(events) => {
                for event in events {
                    info!(
                        "appliance {}: {} -> {}",
                        event.appliance_id,
                        event.from.as_str(),
                        event.to.as_str()
                    );
                    self.event_channel
                        .send(MonitorEvent::Transition(event))
                        .await;
                }
                // Refresh the projection of every appliance on this sensor.
                for id in self.registry.appliances_for_sensor(&sample.sensor_id) {
                    if let Ok(snapshot) = self.registry.snapshot(id, now) {
                        self.event_channel
                            .send(MonitorEvent::Snapshot(snapshot))
                            .await;
                    }
                }
            }
            Err(err) => {
                warn!("dropped sample from '{}': {}", sample.sensor_id, err);
            }
        }
    }

    async fn handle_command(&mut self, command: MonitorCommand) {
        let now = Instant::now();
        match command {
            MonitorCommand::AddAppliance(config) => match self.registry.add(config, now) {
                Ok(appliance_id) => {
                    self.event_channel
                        .send(MonitorEvent::ApplianceAdded { appliance_id })
                        .await;
                }
                Err(err) => warn!("add appliance failed: {:#}", err),
            },
            MonitorCommand::RemoveAppliance { appliance_id } => {
                match self.registry.remove(&appliance_id) {
                    Ok(()) => {
                        self.event_channel
                            .send(MonitorEvent::ApplianceRemoved { appliance_id })
                            .await;
                    }
                    Err(err) => warn!("remove appliance failed: {}", err),
                }
            }
            MonitorCommand::Reconfigure {
                appliance_id,
                thresholds,
                timing,
            } => match self.registry.reconfigure(&appliance_id, thresholds, timing) {
                Ok(()) => {
                    self.event_channel
                        .send(MonitorEvent::ConfigReplaced { appliance_id })
                        .await;
                }
                Err(err) => warn!("reconfigure failed: {}", err),
            },
        }
    }

    async fn handle_completion_wake(&mut self) {
        let now = Instant::now();
        for event in self.registry.check_completions(now) {
            info!(
                "appliance {}: {} -> {}",
                event.appliance_id,
                event.from.as_str(),
                event.to.as_str()
            );
            self.event_channel
                .send(MonitorEvent::Transition(event))
                .await;
        }
    }
}

impl Default for ApplianceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
