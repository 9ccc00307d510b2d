//! Simulated hardware for running the agent without a Raspberry Pi.

use super::{ClimateSensor, DigitalInput, DigitalOutput, Reading, SensorError};
use log::info;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;

/// A shared digital line.
///
/// Clones share the same level, so one handle can be given to the agent as
/// an input or output while another drives or inspects it.
#[derive(Clone)]
pub struct SimulatedPin {
    name: &'static str,
    level: Arc<AtomicBool>,
    writes: Arc<AtomicU32>,
}

impl SimulatedPin {
    pub fn new(name: &'static str, initial: bool) -> Self {
        Self {
            name,
            level: Arc::new(AtomicBool::new(initial)),
            writes: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn get(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    pub fn set(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }

    /// Flip the level and return the new one.
    pub fn toggle(&self) -> bool {
        !self.level.fetch_xor(true, Ordering::SeqCst)
    }

    /// Number of writes made through [`DigitalOutput::set_level`].
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl DigitalInput for SimulatedPin {
    fn is_high(&self) -> bool {
        self.get()
    }
}

impl DigitalOutput for SimulatedPin {
    fn set_level(&mut self, high: bool) {
        let old = self.level.swap(high, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        if old != high {
            info!("[Sim] {} pin driven {}", self.name, if high { "high" } else { "low" });
        }
    }
}

/// Climate sensor doing a bounded random walk around room conditions.
pub struct SimulatedClimateSensor {
    temperature: f32,
    humidity: f32,
    failure_rate: f64,
}

impl SimulatedClimateSensor {
    pub fn new() -> Self {
        Self {
            temperature: 21.0,
            humidity: 45.0,
            failure_rate: 0.1,
        }
    }

    /// Probability in `0.0..=1.0` that a read fails with a transient error.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }
}

impl Default for SimulatedClimateSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClimateSensor for SimulatedClimateSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(self.failure_rate) {
            return Err(SensorError::Timeout("start transmission"));
        }

        self.temperature = (self.temperature + rng.gen_range(-0.3f32..=0.3)).clamp(15.0, 30.0);
        self.humidity = (self.humidity + rng.gen_range(-1.0f32..=1.0)).clamp(20.0, 80.0);

        Ok(Reading {
            temperature: self.temperature,
            humidity: Some(self.humidity),
        })
    }
}

/// Spawn a task that toggles the simulated switch every `period`.
///
/// Lets the switch edge publishing be observed without hardware. The task
/// ends when `shutdown` is cancelled.
pub fn run_switch_simulation(
    switch: SimulatedPin,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        // First tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let closed = switch.toggle();
                    info!("[Sim] Switch toggled to: {}", if closed { "closed" } else { "open" });
                }
            }
        }
    })
}
