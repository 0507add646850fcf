//! Pill box relay - main entry point
//!
//! Runs the supervised broker connection and dosing schedule, or sends a
//! single command to the device and exits.

use pillbox_relay::config::{RelayConfig, DEFAULT_CONFIG_PATHS};
use pillbox_relay::observability::{
    health::HealthServer, init_default_logging, init_logging, metrics, LogFormat,
};
use pillbox_relay::protocol::Command;
use pillbox_relay::relay::{
    CommandRelay, CommandSubmitter, ConnectionSupervisor, LoggingNotificationSink, SubmitOutcome,
    SupervisorSettings,
};
use pillbox_relay::schedule::ScheduleEvaluator;
use pillbox_relay::transport::mqtt::{ConnectionState, HealthMonitor, MqttClient};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

/// MQTT relay for ESP32 pill box controllers
#[derive(Parser)]
#[command(name = "pillbox-relay")]
#[command(about = "MQTT command relay and connection supervisor for ESP32 pill boxes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until SIGINT/SIGTERM
    Run {
        /// Serve /health, /ready, /live and /metrics on this port
        #[arg(long, env = "HEALTH_PORT")]
        health_port: Option<u16>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Send one command to the device and exit
    Send {
        #[command(subcommand)]
        action: SendAction,
    },
}

#[derive(Subcommand)]
enum SendAction {
    /// Switch a box LED on or off
    Led {
        #[arg(long)]
        pin: u8,
        #[arg(long, value_enum)]
        state: LedArg,
    },
    /// Set a box's dosing period
    Period {
        #[arg(long)]
        pin: u8,
        /// Period in seconds
        #[arg(long, default_value_t = 60)]
        period: u32,
    },
    /// Reset a box's device-side timer
    Reset {
        #[arg(long)]
        pin: u8,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LedArg {
    On,
    Off,
}

impl SendAction {
    fn into_command(self) -> Command {
        match self {
            SendAction::Led { pin, state } => Command::SetLed {
                pin,
                on: matches!(state, LedArg::On),
            },
            SendAction::Period { pin, period } => Command::SetPeriod {
                pin,
                seconds: period,
            },
            SendAction::Reset { pin } => Command::Reset { pin },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting pillbox-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { health_port } => run_relay(config, health_port).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Send { action } => send_command(config, action.into_command()).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    let level = match verbose {
        0 => {
            init_default_logging();
            return;
        }
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    init_logging(level, format, false);
}

fn load_configuration(path: Option<&Path>) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        info!("Loading configuration from {}", path.display());
        return Ok(RelayConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let candidate = Path::new(candidate);
        if candidate.exists() {
            info!("Loading configuration from {}", candidate.display());
            return Ok(RelayConfig::load_from_file(candidate)?);
        }
    }

    Err(format!(
        "No configuration file found (tried {}); pass --config",
        DEFAULT_CONFIG_PATHS.join(", ")
    )
    .into())
}

fn spawn_supervisor(config: &RelayConfig) -> Result<ConnectionSupervisor, Box<dyn std::error::Error>> {
    let settings = SupervisorSettings::from_config(&config.mqtt)?;
    info!(
        client_id = %settings.options.client_id,
        broker = %config.mqtt.broker_url,
        "Connection supervisor created"
    );
    Ok(ConnectionSupervisor::spawn(
        MqttClient::new(),
        settings,
        Arc::new(LoggingNotificationSink),
    ))
}

async fn run_relay(
    config: RelayConfig,
    health_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let supervisor = spawn_supervisor(&config)?;

    if let Some(port) = health_port {
        let server = Arc::new(HealthServer::new(
            supervisor.client_id(),
            port,
            supervisor.status_receiver(),
        ));
        tokio::spawn(server.start());
    }

    match supervisor.start().await {
        ConnectionState::Connected => info!("Connected to broker"),
        state => warn!(state = %state, "Initial connect failed; retrying in the background"),
    }

    let relay = CommandRelay::new(supervisor.clone());
    let evaluator = Arc::new(ScheduleEvaluator::from_config(relay, &config.boxes));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_task = tokio::spawn(sync_periods_on_connect(
        Arc::clone(&evaluator),
        supervisor.status_receiver(),
        shutdown_rx.clone(),
    ));
    let schedule_task = {
        let evaluator = Arc::clone(&evaluator);
        let interval = Duration::from_secs(config.schedule.tick_interval_secs);
        tokio::spawn(async move { evaluator.run(interval, shutdown_rx).await })
    };

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Relay is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = schedule_task.await {
        warn!("Schedule task ended abnormally: {}", e);
    }
    sync_task.abort();

    if let Ok(health) = supervisor.health_metrics().await {
        info!(
            quality = ?HealthMonitor::assess_connection_quality(&health),
            reconnects = health.reconnects_scheduled,
            "Connection summary"
        );
    }

    supervisor.stop().await;
    info!(
        commands = ?metrics().snapshot().commands,
        "Relay stopped"
    );
    Ok(())
}

/// Push dosing periods to the device every time the connection comes up
async fn sync_periods_on_connect<S: CommandSubmitter>(
    evaluator: Arc<ScheduleEvaluator<S>>,
    mut status: watch::Receiver<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let connected = *status.borrow_and_update() == ConnectionState::Connected;
        if connected {
            evaluator.sync_periods().await;
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn send_command(
    config: RelayConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let supervisor = spawn_supervisor(&config)?;

    let result = match supervisor.start().await {
        ConnectionState::Connected => {
            let relay = CommandRelay::new(supervisor.clone());
            match relay.submit(command).await {
                SubmitOutcome::Published => {
                    info!(kind = command.kind(), pin = command.pin(), "Command sent");
                    Ok(())
                }
                SubmitOutcome::Dropped => Err("Command was not delivered".into()),
            }
        }
        state => Err(format!("Could not connect to broker (state: {state})").into()),
    };

    supervisor.stop().await;
    result
}

fn handle_config_command(
    config: &RelayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    if config.mqtt.username_env.is_some() {
        match config.require_credentials() {
            Ok(credentials) => info!(username = %credentials.username, "Broker credentials found"),
            Err(e) => warn!("Broker credentials unavailable: {}", e),
        }
    }

    info!(boxes = config.boxes.len(), "Configuration validation complete");
    Ok(())
}
