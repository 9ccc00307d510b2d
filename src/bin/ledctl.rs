//! Send one LED command to the agent through the broker.
//!
//! Usage:
//!   cargo run --bin ledctl -- on
//!   cargo run --bin ledctl -- off
//!   cargo run --bin ledctl -- send <payload>
//!
//! Connects with the same broker settings as the agent, publishes to
//! `cmd/ledState` and disconnects. The publish is queued ahead of the
//! DISCONNECT, so stopping the session flushes it.

use clap::{Parser, Subcommand};
use iiot_agent::config::MqttConfig;
use iiot_agent::mqtt::{BrokerLink, MessageHandler, MqttClient, topics};
use log::{error, info};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ledctl")]
#[command(about = "Publish an LED command for the IIoT agent")]
struct Cli {
    #[command(flatten)]
    mqtt: MqttConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn the LED on
    On,
    /// Turn the LED off
    Off,
    /// Publish an arbitrary payload (anything but "on" turns the LED off)
    Send { payload: String },
}

impl Commands {
    fn payload(&self) -> &str {
        match self {
            Commands::On => topics::ON,
            Commands::Off => topics::OFF,
            Commands::Send { payload } => payload,
        }
    }
}

/// ledctl only publishes.
struct Discard;

impl MessageHandler for Discard {
    fn handle(&mut self, _topic: &str, _payload: &[u8]) {}
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut mqtt = cli.mqtt;
    // Must not take over the agent's session
    mqtt.client_id = format!("{}-ledctl", mqtt.client_id);

    let session = match MqttClient::new(&mqtt)
        .connect(
            Vec::new(),
            Discard,
            mqtt.connect_timeout(),
            CancellationToken::new(),
        )
        .await
    {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let payload = cli.command.payload();
    let result = BrokerLink::publish(&session.client(), topics::LED_COMMAND, payload);
    session.stop().await;

    match result {
        Ok(()) => {
            info!("Sent {:?} to {}", payload, topics::LED_COMMAND);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to publish: {}", e);
            ExitCode::FAILURE
        }
    }
}
