//! # Sensor Sampling
//!
//! Periodic tasks that keep the sensor fields of [`SharedState`] current.
//! Each field has its own task and is that task's only writer.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::state::SharedState;
use crate::frame::payload::SensorSnapshot;

pub const TEMPERATURE_PERIOD: Duration = Duration::from_millis(750);
pub const HUMIDITY_PERIOD: Duration = Duration::from_millis(2000);
pub const PH_PERIOD: Duration = Duration::from_millis(2000);

/// pH sensor power-on settle time before a reading
pub const PH_SETTLE: Duration = Duration::from_millis(1000);

/// Source of sensor readings; `None` is a failed read
pub trait SensorSource: Send + Sync {
    fn temperature(&self) -> Option<f32>;
    fn humidity(&self) -> Option<f32>;
    fn ph(&self) -> Option<f32>;
}

/// Sensor source returning fixed values
#[derive(Debug, Clone, Copy)]
pub struct FixedSensors {
    reading: SensorSnapshot,
}

impl FixedSensors {
    pub fn new(reading: SensorSnapshot) -> Self {
        Self { reading }
    }
}

impl SensorSource for FixedSensors {
    fn temperature(&self) -> Option<f32> {
        Some(self.reading.temperature)
    }

    fn humidity(&self) -> Option<f32> {
        Some(self.reading.humidity)
    }

    fn ph(&self) -> Option<f32> {
        Some(self.reading.ph)
    }
}

#[derive(Debug, Clone, Copy)]
enum Quantity {
    Temperature,
    Humidity,
    Ph,
}

/// Spawn one sampling task per sensor field
pub fn spawn_sensor_tasks(
    source: Arc<dyn SensorSource>,
    state: Arc<SharedState>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    [
        (Quantity::Temperature, TEMPERATURE_PERIOD),
        (Quantity::Humidity, HUMIDITY_PERIOD),
        (Quantity::Ph, PH_PERIOD),
    ]
    .into_iter()
    .map(|(quantity, period)| {
        tokio::spawn(sample(
            quantity,
            period,
            source.clone(),
            state.clone(),
            shutdown.clone(),
        ))
    })
    .collect()
}

async fn sample(
    quantity: Quantity,
    period: Duration,
    source: Arc<dyn SensorSource>,
    state: Arc<SharedState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let value = match quantity {
                    Quantity::Temperature => source.temperature(),
                    Quantity::Humidity => source.humidity(),
                    Quantity::Ph => {
                        sleep(PH_SETTLE).await;
                        source.ph()
                    }
                };

                // A failed read keeps the previous value
                match value {
                    Some(value) => {
                        match quantity {
                            Quantity::Temperature => state.set_temperature(value),
                            Quantity::Humidity => state.set_humidity(value),
                            Quantity::Ph => state.set_ph(value),
                        }
                        debug!(?quantity, value, "Sensor sampled");
                    }
                    None => warn!(?quantity, "Sensor read failed"),
                }
            }

            _ = shutdown.changed() => break,
        }
    }
}
