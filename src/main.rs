//! IoT telemetry publisher - Main Entry Point

use iot_telemetry::config::{SensorSource, TelemetryConfig};
use iot_telemetry::credential::{
    CachingIssuer, CredentialIssuer, CredentialParams, CredentialSource, SystemClock,
};
use iot_telemetry::observability::{init_default_logging, metrics::metrics};
use iot_telemetry::publisher::{
    BackoffPolicy, ConnectionManager, ConnectionSettings, PublishCoordinator,
};
use iot_telemetry::sensor::{GpioSensor, Sensor, SimulatedSensor};
use iot_telemetry::transport::{mqtt::MqttTransport, Message};
use iot_telemetry::TelemetryRunner;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{signal, sync::watch};
use tracing::{error, info};

/// Sensor telemetry publisher for cloud MQTT bridges
#[derive(Parser)]
#[command(name = "iot-telemetry")]
#[command(about = "Publish sensor samples over JWT-authenticated MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sampling loop
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Mint one session token and print its validity window
    Token {
        /// Print the signed token itself
        #[arg(long)]
        reveal: bool,
    },
    /// Run a single publish cycle with a literal payload
    Publish {
        /// Message body
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting iot-telemetry v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_telemetry(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Token { reveal } => handle_token_command(&config, reveal),
        Commands::Publish { payload } => publish_payload(&config, payload).await,
    };

    info!(counters = ?metrics().snapshot(), "Publishing counters");

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<TelemetryConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(TelemetryConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["telemetry.toml", "config/telemetry.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(TelemetryConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create telemetry.toml".into())
        }
    }
}

fn build_credentials(config: &TelemetryConfig) -> Arc<dyn CredentialSource> {
    let issuer = CredentialIssuer::new(CredentialParams::from_config(config));
    if config.credential.cache {
        Arc::new(CachingIssuer::new(
            issuer,
            Arc::new(SystemClock),
            chrono::Duration::seconds(config.credential.refresh_margin_secs as i64),
        ))
    } else {
        Arc::new(issuer)
    }
}

fn build_coordinator(
    config: &TelemetryConfig,
    shutdown: watch::Receiver<bool>,
) -> PublishCoordinator<MqttTransport> {
    let manager = ConnectionManager::new(
        MqttTransport::new(),
        build_credentials(config),
        ConnectionSettings::from_config(config),
        BackoffPolicy::from(&config.backoff),
    )
    .with_shutdown(shutdown);

    PublishCoordinator::new(manager).configured(config)
}

/// Flip the returned flag on SIGINT or SIGTERM
fn listen_for_shutdown() -> std::io::Result<watch::Receiver<bool>> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        let _ = tx.send(true);
    });

    Ok(rx)
}

async fn run_telemetry(config: TelemetryConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        device_id = %config.device.device_id,
        client_id = %config.client_id(),
        "Telemetry publisher starting"
    );

    let shutdown = listen_for_shutdown()?;
    let coordinator = build_coordinator(&config, shutdown.clone());

    match config.sampling.source {
        SensorSource::Gpio => {
            let sensor = GpioSensor::open(config.sampling.gpio_pin)?;
            sample_until_shutdown(coordinator, sensor, &config, shutdown).await
        }
        SensorSource::Simulated => {
            let sensor = SimulatedSensor::new(config.sampling.gpio_pin);
            sample_until_shutdown(coordinator, sensor, &config, shutdown).await
        }
    }
}

async fn sample_until_shutdown<S: Sensor>(
    coordinator: PublishCoordinator<MqttTransport>,
    sensor: S,
    config: &TelemetryConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut runner = TelemetryRunner::from_config(coordinator, sensor, config);
    runner.run(shutdown).await?;
    Ok(())
}

fn handle_config_command(
    config: &TelemetryConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration valid for device: {}", config.device.device_id);
        println!("Client ID: {}", config.client_id());
        println!("Events topic: {}", config.events_topic());
    }

    Ok(())
}

fn handle_token_command(
    config: &TelemetryConfig,
    reveal: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let credential = build_credentials(config).issue()?;

    println!("Algorithm: {}", config.device.algorithm);
    println!("Audience: {}", config.audience());
    println!("Issued at: {}", credential.issued_at());
    println!("Expires at: {}", credential.expires_at());
    if reveal {
        println!("Token: {}", credential.token());
    }

    Ok(())
}

async fn publish_payload(
    config: &TelemetryConfig,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = listen_for_shutdown()?;
    let coordinator = build_coordinator(config, shutdown);
    let message = Message::new(config.events_topic(), payload.into_bytes());

    let receipt = coordinator.publish_once(&message).await?;
    println!(
        "Delivered to {} (packet {}, {} ms)",
        receipt.topic,
        receipt.token,
        receipt.latency.as_millis()
    );

    Ok(())
}
