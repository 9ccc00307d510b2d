//! The polling control loop.
//!
//! Each iteration reads the climate sensor when its sample deadline has
//! passed, publishes switch edges, then idles briefly. The loop never reads
//! or writes the LED; that belongs to [`crate::command`].

use crate::config::{MIN_SAMPLE_INTERVAL, TimingConfig};
use crate::hardware::{ClimateSensor, DigitalInput, Reading};
use crate::mqtt::{BrokerLink, topics};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Format a measurement with one decimal place, as published.
pub fn format_measurement(value: f32) -> String {
    format!("{:.1}", value)
}

/// When the next sensor read may happen.
#[derive(Debug, Clone, Copy)]
pub struct SampleSchedule {
    next_deadline: Instant,
    interval: Duration,
}

impl SampleSchedule {
    /// First read is due at `now`. Intervals shorter than the sensor's
    /// minimum re-read time are raised to it.
    pub fn new(interval: Duration, now: Instant) -> Self {
        if interval < MIN_SAMPLE_INTERVAL {
            warn!(
                "Sample interval {:?} below sensor minimum, using {:?}",
                interval, MIN_SAMPLE_INTERVAL
            );
        }
        Self {
            next_deadline: now,
            interval: interval.max(MIN_SAMPLE_INTERVAL),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline
    }

    /// Push the deadline one interval past `now`. Called after every
    /// attempt, failed or not.
    pub fn advance(&mut self, now: Instant) {
        self.next_deadline = now + self.interval;
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Last switch level seen by the loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchState {
    last_level: Option<bool>,
}

impl SwitchState {
    /// Record `level` and report whether it differs from the previous one.
    /// The very first observation always counts as a change.
    pub fn observe(&mut self, level: bool) -> bool {
        let changed = self.last_level != Some(level);
        self.last_level = Some(level);
        changed
    }

    pub fn last_level(&self) -> Option<bool> {
        self.last_level
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ShuttingDown,
}

/// Owns the sensor, the switch and the publishing side of the broker link
/// for the life of the process.
pub struct ControlLoop<S, I, B> {
    sensor: S,
    switch: I,
    broker: B,
    schedule: SampleSchedule,
    switch_state: SwitchState,
    idle: Duration,
    debounce: Duration,
    state: LoopState,
}

impl<S, I, B> ControlLoop<S, I, B>
where
    S: ClimateSensor,
    I: DigitalInput,
    B: BrokerLink,
{
    pub fn new(sensor: S, switch: I, broker: B, timing: &TimingConfig) -> Self {
        Self {
            sensor,
            switch,
            broker,
            schedule: SampleSchedule::new(timing.sample_interval(), Instant::now()),
            switch_state: SwitchState::default(),
            idle: timing.idle(),
            debounce: timing.debounce(),
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn schedule(&self) -> &SampleSchedule {
        &self.schedule
    }

    pub fn switch_state(&self) -> &SwitchState {
        &self.switch_state
    }

    /// Iterate until `shutdown` is cancelled.
    ///
    /// Every pause is raced against the token, so cancellation ends the
    /// loop without waiting out the current sleep.
    pub async fn run(&mut self, shutdown: &CancellationToken) {
        info!("Control loop running");
        while self.state == LoopState::Running {
            self.iterate(shutdown).await;
            if self.state == LoopState::Running {
                self.pause(self.idle, shutdown).await;
            }
        }
        info!("Control loop stopped");
    }

    /// One pass: sample gate, then switch edge detection (with debounce).
    pub async fn iterate(&mut self, shutdown: &CancellationToken) {
        if self.schedule.is_due(Instant::now()) {
            self.sample();
        }

        let level = self.switch.is_high();
        if self.switch_state.observe(level) {
            if level {
                info!("Switch is closed");
            } else {
                info!("Switch is open");
            }
            let payload = if level { topics::ON } else { topics::OFF };
            self.publish(topics::SWITCH, payload);
            // Debounce holds the whole loop, sampling included
            self.pause(self.debounce, shutdown).await;
        }
    }

    fn sample(&mut self) {
        debug!("Starting sensor read");
        match self.sensor.read() {
            Ok(Reading {
                temperature,
                humidity: Some(humidity),
            }) => {
                let temperature = format_measurement(temperature);
                let humidity = format_measurement(humidity);
                info!(
                    "Readings: Temperature {} *C, Humidity {}%",
                    temperature, humidity
                );
                self.publish(topics::TEMPERATURE, &temperature);
                self.publish(topics::HUMIDITY, &humidity);
            }
            Ok(Reading {
                temperature,
                humidity: None,
            }) => {
                error!(
                    "Error reading sensor: no humidity value (temperature {:.1} *C)",
                    temperature
                );
            }
            Err(e) => {
                warn!("Sensor read failed: {}", e);
            }
        }
        self.schedule.advance(Instant::now());
    }

    /// Queue a publish without waiting. While the broker is unreachable the
    /// request queue fills up and further publishes are dropped.
    fn publish(&self, topic: &str, payload: &str) {
        if let Err(e) = self.broker.publish(topic, payload) {
            warn!("Dropped publish to {}: {}", topic, e);
        }
    }

    async fn pause(&mut self, duration: Duration, shutdown: &CancellationToken) {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, leaving control loop");
                self.state = LoopState::ShuttingDown;
            }
            _ = tokio::time::sleep(duration) => {}
        }
    }
}
