//! Pin and sensor abstractions.
//!
//! The control loop and the command handler only see these traits, so the
//! same code drives Raspberry Pi GPIO (feature `rpi`) or simulated hardware.

pub mod dht22;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod simulation;

use crate::config::Config;
use crate::error::Result;
use thiserror::Error;

/// One temperature/humidity measurement.
///
/// The sensor can deliver a temperature without a usable humidity value, in
/// which case `humidity` is `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub humidity: Option<f32>,
}

/// Transient sensor failures. None of these are fatal; the next scheduled
/// read simply tries again.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("timed out waiting for the sensor to {0}")]
    Timeout(&'static str),

    #[error("checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("sensor read too soon after the previous one")]
    NotReady,
}

/// A digital input line.
pub trait DigitalInput: Send {
    /// Current level of the line, `true` when high.
    fn is_high(&self) -> bool;
}

/// A digital output line.
pub trait DigitalOutput: Send {
    fn set_level(&mut self, high: bool);
}

/// A combined temperature and humidity sensor.
pub trait ClimateSensor: Send {
    /// Perform one read. May block for a few milliseconds.
    fn read(&mut self) -> std::result::Result<Reading, SensorError>;
}

impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn set_level(&mut self, high: bool) {
        (**self).set_level(high)
    }
}

impl<T: ClimateSensor + ?Sized> ClimateSensor for Box<T> {
    fn read(&mut self) -> std::result::Result<Reading, SensorError> {
        (**self).read()
    }
}

/// The three devices the agent talks to.
pub struct Hardware {
    pub sensor: Box<dyn ClimateSensor>,
    pub switch: Box<dyn DigitalInput>,
    pub led: Box<dyn DigitalOutput>,
    /// Handle on the simulated switch, present only when simulating.
    pub simulated_switch: Option<simulation::SimulatedPin>,
}

impl Hardware {
    /// Open the hardware described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        if config.simulate_hardware() {
            log::info!("Using simulated hardware");
            return Ok(Self::simulated());
        }
        Self::open_gpio(config)
    }

    /// Simulated sensor, switch and LED.
    pub fn simulated() -> Self {
        let switch = simulation::SimulatedPin::new("switch", false);
        Self {
            sensor: Box::new(simulation::SimulatedClimateSensor::new()),
            switch: Box::new(switch.clone()),
            led: Box::new(simulation::SimulatedPin::new("led", false)),
            simulated_switch: Some(switch),
        }
    }

    #[cfg(feature = "rpi")]
    fn open_gpio(config: &Config) -> Result<Self> {
        let gpio = rppal::gpio::Gpio::new()?;
        log::info!(
            "Opening GPIO: sensor=BCM{} switch=BCM{} led=BCM{}",
            config.pins.sensor_pin,
            config.pins.switch_pin,
            config.pins.led_pin
        );
        Ok(Self {
            sensor: Box::new(rpi::RpiDht22::open(&gpio, config.pins.sensor_pin)?),
            switch: Box::new(rpi::RpiInput::open(&gpio, config.pins.switch_pin)?),
            led: Box::new(rpi::RpiOutput::open(&gpio, config.pins.led_pin)?),
            simulated_switch: None,
        })
    }

    #[cfg(not(feature = "rpi"))]
    fn open_gpio(_config: &Config) -> Result<Self> {
        Err(crate::error::AgentError::GpioError(
            "built without the `rpi` feature".to_string(),
        ))
    }
}
