//! Fleet device simulator - main entry point

use clap::{Parser, Subcommand};
use fleet_device_agent::config::DeviceConfig;
use fleet_device_agent::device::{Session, SessionExit};
use fleet_device_agent::observability::init_default_logging;
use fleet_device_agent::transport::mqtt::MqttClient;
use fleet_device_agent::transport::{ConnectionState, Transport};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["device.toml", "config/device.toml"];

/// Simulated fleet device syncing its shadow and running jobs over MQTT
#[derive(Parser)]
#[command(name = "fleet-device")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Thing name, overrides the configuration file
    #[arg(short, long, env = "THING_NAME")]
    thing: Option<String>,

    /// Broker URL, overrides the configuration file
    #[arg(short, long, env = "MQTT_ENDPOINT")]
    endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the device (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging(cli.verbose);

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };
    process::exit(code);
}

fn load_configuration(cli: &Cli) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    let path = cli.config.clone().or_else(|| {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    });

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            DeviceConfig::load_from_file(Path::new(&path))?
        }
        None => {
            let Some(thing) = cli.thing.as_deref() else {
                return Err(
                    "no configuration file found; pass --config or at least --thing".into(),
                );
            };
            info!("No configuration file, using local defaults");
            DeviceConfig::local(thing)
        }
    };

    if let Some(thing) = &cli.thing {
        config.device.name = thing.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.mqtt.broker_url = endpoint.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_device(config: DeviceConfig) -> i32 {
    info!(
        thing_name = %config.device.name,
        broker = %config.mqtt.broker_url,
        "Starting fleet device v{}",
        env!("CARGO_PKG_VERSION")
    );

    let transport = match MqttClient::new(&config.device.name, config.mqtt.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Invalid MQTT settings: {}", e);
            return 1;
        }
    };

    let mut session = Session::new(config, transport.clone());
    if let Err(e) = session.start().await {
        error!("Device failed to start: {}", e);
        session.shutdown().await;
        return 1;
    }

    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Could not install signal handlers: {}", e);
            session.shutdown().await;
            return 1;
        }
    };

    let exit = tokio::select! {
        exit = session.run() => exit,
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
            SessionExit { code: 0, reason: "interrupted".to_string() }
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            SessionExit { code: 0, reason: "terminated".to_string() }
        }
        reason = wait_for_permanent_disconnect(transport.as_ref()) => {
            error!("MQTT connection permanently lost, shutting down device...");
            SessionExit { code: 1, reason }
        }
    };

    session.shutdown().await;
    if exit.code == 0 {
        info!(reason = %exit.reason, "Device stopped");
    } else {
        warn!(code = exit.code, reason = %exit.reason, "Device stopped");
    }
    exit.code
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> i32 {
    if show {
        match toml::to_string_pretty(config) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                error!("Could not render configuration: {}", e);
                return 1;
            }
        }
    }

    info!("Configuration validation complete");
    0
}

/// Resolve once the client gives up reconnecting
async fn wait_for_permanent_disconnect(transport: &MqttClient) -> String {
    loop {
        if let ConnectionState::PermanentlyDisconnected(reason) = transport.connection_state() {
            return reason;
        }
        sleep(Duration::from_millis(100)).await;
    }
}
