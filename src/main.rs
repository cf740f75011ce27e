//! Demo binary: one simulated dishwasher on a power sensor, with the monitor
//! loop and a scripted duty-cycle profile. Run with RUST_LOG=debug for the
//! classifier and debounce internals.

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use log::info;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wattmon::config::ApplianceConfig;
use wattmon::system::events::MonitorEvent;
use wattmon::{ApplianceMonitor, PowerSample, SampleChannel, SensorSample};

const DEMO_SENSOR: &str = "sensor.dishwasher_power";

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    init_tracing();
    info!("starting appliance power monitor demo");

    let mut monitor = ApplianceMonitor::new();
    monitor
        .add_appliance(ApplianceConfig {
            name: "Dishwasher".to_string(),
            power_sensor: DEMO_SENSOR.to_string(),
            // Scaled-down timings so a full cycle plays out in under a minute.
            debounce_secs: 3,
            complete_timeout_secs: 10,
            ..ApplianceConfig::default()
        })
        .unwrap();

    let samples = monitor.sample_channel();
    let events = monitor.event_channel();

    spawner.spawn(monitor_task(monitor)).unwrap();
    spawner.spawn(sensor_task(samples)).unwrap();

    loop {
        match events.receive().await {
            MonitorEvent::Transition(event) => {
                info!(
                    "event: {} changed {} -> {}",
                    event.appliance_id,
                    event.from.as_str(),
                    event.to.as_str()
                );
            }
            MonitorEvent::Snapshot(snapshot) => {
                log::debug!(
                    "snapshot: {}",
                    serde_json::to_string(&snapshot).unwrap_or_default()
                );
            }
            other => info!("event: {:?}", other),
        }
    }
}

#[embassy_executor::task]
async fn monitor_task(mut monitor: ApplianceMonitor) {
    monitor.run().await;
}

/// Feeds a looping dishwasher power profile: off, heat-up, wash, standby
/// tail (long enough for the completion timer to fire), then off again.
#[embassy_executor::task]
async fn sensor_task(samples: Arc<SampleChannel>) {
    let profile: &[(u64, f32)] = &[
        (5, 0.5),     // off
        (10, 1800.0), // heating element
        (10, 120.0),  // wash motor
        (18, 12.0),   // standby tail; completion fires 10s in
        (5, 0.5),     // back to off
    ];

    loop {
        for &(hold_secs, watts) in profile {
            let until = Instant::now() + Duration::from_secs(hold_secs);
            while Instant::now() < until {
                samples
                    .send(SensorSample {
                        sensor_id: DEMO_SENSOR.to_string(),
                        sample: PowerSample::watts(watts, Instant::now()),
                    })
                    .await;
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}
