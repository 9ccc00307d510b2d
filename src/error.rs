use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to connect to MQTT broker: {0}")]
    ConnectFailed(String),

    #[error("MQTT broker did not acknowledge the connection within {0:?}")]
    ConnectTimeout(Duration),

    #[error("MQTT worker stopped before the connection was established")]
    WorkerStopped,

    #[error("MQTT request queue is full")]
    RequestQueueFull,

    #[error("MQTT client request failed: {0}")]
    ClientError(#[from] rumqttc::ClientError),

    #[error("GPIO error: {0}")]
    GpioError(String),
}

#[cfg(feature = "rpi")]
impl From<rppal::gpio::Error> for AgentError {
    fn from(e: rppal::gpio::Error) -> Self {
        AgentError::GpioError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
