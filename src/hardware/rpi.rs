//! Raspberry Pi GPIO backend built on `rppal`.

use super::dht22::{self, FRAME_LEN};
use super::{ClimateSensor, DigitalInput, DigitalOutput, Reading, SensorError};
use crate::config::MIN_SAMPLE_INTERVAL;
use crate::error::Result;
use rppal::gpio::{Gpio, InputPin, IoPin, Level, Mode, OutputPin};
use std::time::{Duration, Instant};

/// Host holds the line low this long to wake the sensor.
const START_LOW: Duration = Duration::from_millis(18);
/// Then releases it for this long before listening.
const START_HIGH: Duration = Duration::from_micros(40);
/// Longest any single level lasts during a transmission.
const EDGE_TIMEOUT: Duration = Duration::from_micros(120);
/// A high pulse longer than this encodes a one bit.
const ONE_THRESHOLD: Duration = Duration::from_micros(45);

pub struct RpiInput {
    pin: InputPin,
}

impl RpiInput {
    pub fn open(gpio: &Gpio, bcm: u8) -> Result<Self> {
        Ok(Self {
            pin: gpio.get(bcm)?.into_input(),
        })
    }
}

impl DigitalInput for RpiInput {
    fn is_high(&self) -> bool {
        self.pin.is_high()
    }
}

pub struct RpiOutput {
    pin: OutputPin,
}

impl RpiOutput {
    pub fn open(gpio: &Gpio, bcm: u8) -> Result<Self> {
        let mut pin = gpio.get(bcm)?.into_output_low();
        // Leave the LED where the last command put it when we exit
        pin.set_reset_on_drop(false);
        Ok(Self { pin })
    }
}

impl DigitalOutput for RpiOutput {
    fn set_level(&mut self, high: bool) {
        self.pin.write(if high { Level::High } else { Level::Low });
    }
}

/// Bit-banged DHT22 on a single bidirectional pin.
///
/// Linux scheduling can stretch any of the pulses below, so timeouts and
/// checksum mismatches are expected now and then and surface as
/// [`SensorError`]s for the caller to retry later.
pub struct RpiDht22 {
    pin: IoPin,
    last_read: Option<Instant>,
}

impl RpiDht22 {
    pub fn open(gpio: &Gpio, bcm: u8) -> Result<Self> {
        let mut pin = gpio.get(bcm)?.into_io(Mode::Input);
        pin.set_reset_on_drop(false);
        Ok(Self {
            pin,
            last_read: None,
        })
    }

    /// Spin until the line leaves `level`, returning how long it stayed there.
    fn wait_while(
        &self,
        level: Level,
        what: &'static str,
    ) -> std::result::Result<Duration, SensorError> {
        let start = Instant::now();
        while self.pin.read() == level {
            if start.elapsed() > EDGE_TIMEOUT {
                return Err(SensorError::Timeout(what));
            }
        }
        Ok(start.elapsed())
    }

    fn spin(duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            std::hint::spin_loop();
        }
    }

    fn receive(&mut self) -> std::result::Result<[u8; FRAME_LEN], SensorError> {
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        std::thread::sleep(START_LOW);
        self.pin.set_high();
        Self::spin(START_HIGH);
        self.pin.set_mode(Mode::Input);

        // Sensor answers with ~80us low then ~80us high
        self.wait_while(Level::High, "acknowledge start")?;
        self.wait_while(Level::Low, "finish response low")?;
        self.wait_while(Level::High, "finish response high")?;

        let mut bits = [false; FRAME_LEN * 8];
        for bit in bits.iter_mut() {
            self.wait_while(Level::Low, "start data bit")?;
            *bit = self.wait_while(Level::High, "end data bit")? > ONE_THRESHOLD;
        }
        Ok(dht22::pack_bits(&bits))
    }
}

impl ClimateSensor for RpiDht22 {
    fn read(&mut self) -> std::result::Result<Reading, SensorError> {
        if let Some(last) = self.last_read
            && last.elapsed() < MIN_SAMPLE_INTERVAL
        {
            return Err(SensorError::NotReady);
        }
        self.last_read = Some(Instant::now());

        let frame = self.receive();
        // Release the line so the pull-up holds it idle
        self.pin.set_mode(Mode::Input);
        dht22::decode_frame(frame?)
    }
}
