use clap::Parser;
use iiot_agent::command::LedCommandHandler;
use iiot_agent::config::Config;
use iiot_agent::control::ControlLoop;
use iiot_agent::error::Result;
use iiot_agent::hardware::Hardware;
use iiot_agent::hardware::simulation::run_switch_simulation;
use iiot_agent::mqtt::{MqttClient, topics};
use log::{error, info};
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How often the simulated switch flips when running without hardware.
const SWITCH_SIMULATION_PERIOD: Duration = Duration::from_secs(30);

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();
    info!("Starting IIoT agent");

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{} (keep-alive {}s)",
        config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.keep_alive_secs
    );
    info!("  Sample interval: {}s", config.timing.sample_interval_secs);
    info!(
        "  Pins: sensor=BCM{} switch=BCM{} led=BCM{}",
        config.pins.sensor_pin, config.pins.switch_pin, config.pins.led_pin
    );

    let hardware = Hardware::open(&config)?;
    let shutdown = CancellationToken::new();

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let session = MqttClient::new(&config.mqtt)
        .connect(
            vec![topics::LED_COMMAND.to_string()],
            LedCommandHandler::new(hardware.led),
            config.mqtt.connect_timeout(),
            shutdown.clone(),
        )
        .await?;

    let signals = tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));
    let simulation = hardware
        .simulated_switch
        .map(|switch| run_switch_simulation(switch, SWITCH_SIMULATION_PERIOD, shutdown.clone()));

    info!("IIoT agent is running, press Ctrl+C to exit");
    let mut control = ControlLoop::new(
        hardware.sensor,
        hardware.switch,
        session.client(),
        &config.timing,
    );
    control.run(&shutdown).await;

    info!("Stopping MQTT worker");
    session.stop().await;
    signals.abort();
    if let Some(simulation) = simulation {
        let _ = simulation.await;
    }

    info!("IIoT agent stopped");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C, or SIGTERM on Unix.
async fn wait_for_shutdown_signal(shutdown: CancellationToken) {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!("Failed to listen for terminate signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    shutdown.cancel();
}
