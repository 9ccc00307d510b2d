//! Topic names shared with the rest of the installation.

pub const TEMPERATURE: &str = "sensorData/temperature";
pub const HUMIDITY: &str = "sensorData/humidity";
pub const SWITCH: &str = "sensorData/switch";

/// Inbound LED commands.
pub const LED_COMMAND: &str = "cmd/ledState";

/// Payload for a closed switch or a lit LED.
pub const ON: &str = "on";
pub const OFF: &str = "off";
