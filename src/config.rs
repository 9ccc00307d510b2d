//! Agent configuration.
//!
//! Every setting is a command-line flag with an environment variable
//! fallback, so the agent can be configured from a systemd unit or a shell.

use crate::error::{AgentError, Result};
use clap::{Args, Parser};
use std::time::Duration;

/// Minimum time the DHT22 needs between two reads.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// rumqttc refuses keep-alive intervals below this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "iiot-agent")]
#[command(about = "Publishes DHT22 and switch readings over MQTT and drives an LED from commands")]
pub struct Config {
    #[command(flatten)]
    pub mqtt: MqttConfig,

    #[command(flatten)]
    pub timing: TimingConfig,

    #[command(flatten)]
    pub pins: PinConfig,
}

#[derive(Args, Debug, Clone)]
pub struct MqttConfig {
    /// Broker host name or address
    #[arg(long, env = "MQTT_BROKER_HOST", default_value = "192.168.0.4")]
    pub broker_host: String,

    /// Broker TCP port
    #[arg(long, env = "MQTT_BROKER_PORT", default_value_t = 1883)]
    pub broker_port: u16,

    /// Client identifier presented to the broker
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "iiot-agent")]
    pub client_id: String,

    /// Keep-alive interval in seconds
    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS", default_value_t = 60)]
    pub keep_alive_secs: u64,

    /// How long to wait for the broker to acknowledge the first connection
    #[arg(long, env = "MQTT_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct TimingConfig {
    /// Seconds between temperature/humidity reads (at least 2)
    #[arg(long, env = "SAMPLE_INTERVAL_SECS", default_value_t = 5)]
    pub sample_interval_secs: u64,

    /// Pause between loop iterations in milliseconds
    #[arg(long, env = "LOOP_IDLE_MS", default_value_t = 100)]
    pub idle_ms: u64,

    /// Pause after publishing a switch change in milliseconds
    #[arg(long, env = "SWITCH_DEBOUNCE_MS", default_value_t = 500)]
    pub debounce_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PinConfig {
    /// BCM pin the DHT22 data line is wired to
    #[arg(long, env = "DHT_SENSOR_PIN", default_value_t = 4)]
    pub sensor_pin: u8,

    /// BCM pin of the switch input
    #[arg(long, env = "SWITCH_PIN", default_value_t = 27)]
    pub switch_pin: u8,

    /// BCM pin of the LED output
    #[arg(long, env = "LED_PIN", default_value_t = 17)]
    pub led_pin: u8,

    /// Use simulated hardware instead of GPIO
    #[arg(long, env = "SIMULATE_HARDWARE")]
    pub simulate: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "192.168.0.4".to_string(),
            broker_port: 1883,
            client_id: "iiot-agent".to_string(),
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 5,
            idle_ms: 100,
            debounce_ms: 500,
        }
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            sensor_pin: 4,
            switch_pin: 27,
            led_pin: 17,
            simulate: false,
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl TimingConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Whether the hardware layer should be simulated.
    ///
    /// Builds without the `rpi` feature have no GPIO backend and always simulate.
    pub fn simulate_hardware(&self) -> bool {
        self.pins.simulate || !cfg!(feature = "rpi")
    }

    /// Reject settings the control loop cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.timing.sample_interval() < MIN_SAMPLE_INTERVAL {
            return Err(AgentError::InvalidConfig(format!(
                "sample interval must be at least {}s, got {}s",
                MIN_SAMPLE_INTERVAL.as_secs(),
                self.timing.sample_interval_secs
            )));
        }
        if self.timing.idle_ms == 0 || self.timing.idle_ms >= 1000 {
            return Err(AgentError::InvalidConfig(format!(
                "idle pause must be between 1 and 999 ms, got {}",
                self.timing.idle_ms
            )));
        }
        if self.mqtt.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(AgentError::InvalidConfig(format!(
                "keep-alive must be at least {}s, got {}s",
                MIN_KEEP_ALIVE_SECS, self.mqtt.keep_alive_secs
            )));
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "connect timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
