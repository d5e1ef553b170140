//! # OCPP Simulator CLI
//!
//! Runs a station fleet from a configuration file, or a single dedicated
//! worker unit fed with startup messages.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ocpp_cp::StationOptions;
use ocpp_simulator::{
    config::{LogFormat, SimulatorConfig, WorkerStrategyKind},
    run_dedicated_unit, FleetStarter, Simulator, StationRegistry, WorkerData, WorkerEvent,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "ocpp-simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the station fleet
    Start(StartArgs),
    /// Generate a default configuration file
    Config(ConfigArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
    /// Run one dedicated worker unit
    Worker(WorkerArgs),
    /// Show version information
    Version,
}

#[derive(Args)]
struct StartArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "simulator.toml")]
    config: PathBuf,

    /// Override the UI server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the worker pool size
    #[arg(long)]
    pool_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "OCPP_SIMULATOR_LOG")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Output file path
    #[arg(short, long, default_value = "simulator.toml")]
    output: PathBuf,

    /// Station template file
    #[arg(short, long, default_value = "templates/station.json")]
    template: String,

    /// Number of stations built from the template
    #[arg(short = 'n', long, default_value = "1")]
    stations: usize,

    /// Worker strategy (pool, dedicated)
    #[arg(short, long, default_value = "pool")]
    worker: String,
}

#[derive(Args)]
struct ValidateArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Args)]
struct WorkerArgs {
    /// Startup payload, e.g. {"index":1,"templateFile":"station.json"}
    #[arg(short, long)]
    data: Option<String>,

    /// Configuration file for OCPP options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => start_command(args).await,
        Commands::Config(args) => config_command(args),
        Commands::Validate(args) => validate_command(args),
        Commands::Worker(args) => worker_command(args).await,
        Commands::Version => version_command(),
    }
}

fn load_config(path: &Path) -> Result<SimulatorConfig> {
    if path.exists() {
        info!("Loading configuration from: {}", path.display());
        Ok(SimulatorConfig::from_file(path)?)
    } else {
        warn!("Configuration file not found, using defaults");
        Ok(SimulatorConfig::default())
    }
}

async fn start_command(args: StartArgs) -> Result<()> {
    let mut config = if args.config.exists() {
        SimulatorConfig::from_file(&args.config)?
    } else {
        SimulatorConfig::default()
    };

    let level = args.log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(
        &level,
        args.json_logs || config.logging.format == LogFormat::Json,
    )?;
    info!("Starting OCPP fleet simulator");
    if !args.config.exists() {
        warn!(
            "Configuration file {} not found, using defaults",
            args.config.display()
        );
    }

    if let Some(port) = args.port {
        config.ui_server.port = port;
    }
    if let Some(pool_size) = args.pool_size {
        config.worker.pool_size = pool_size;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    info!("Configuration:");
    for entry in &config.stations {
        info!("  {} x{}", entry.file, entry.number_of_stations);
    }
    info!("  Worker: {:?}", config.worker_strategy());
    if config.ui_server.enabled {
        info!(
            "  UI Server: {}:{}",
            config.ui_server.bind_address, config.ui_server.port
        );
    }

    Simulator::new(config)?.run().await?;
    info!("Simulator stopped");
    Ok(())
}

fn config_command(args: ConfigArgs) -> Result<()> {
    let mut config = SimulatorConfig::default();
    config.stations[0].file = args.template;
    config.stations[0].number_of_stations = args.stations;
    config.worker.strategy = match args.worker.as_str() {
        "pool" => WorkerStrategyKind::Pool,
        "dedicated" => WorkerStrategyKind::Dedicated,
        other => anyhow::bail!("Unknown worker strategy '{}'", other),
    };

    config.to_file(&args.output)?;

    println!("Configuration file generated: {}", args.output.display());
    println!("Edit this file to customize your simulator settings.");
    println!();
    println!("Key settings:");
    println!("  stations[0].file: {}", config.stations[0].file);
    println!(
        "  stations[0].number_of_stations: {}",
        config.stations[0].number_of_stations
    );
    println!("  worker.strategy: {}", args.worker);
    println!("  ui_server.port: {}", config.ui_server.port);

    Ok(())
}

fn validate_command(args: ValidateArgs) -> Result<()> {
    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    println!("Validating configuration: {}", args.config.display());

    let config = SimulatorConfig::from_file(&args.config)?;

    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Configuration summary:");
            println!("  Stations: {}", config.total_stations());
            for entry in &config.stations {
                println!("    - {} x{}", entry.file, entry.number_of_stations);
            }
            println!("  Worker: {:?}", config.worker_strategy());
            println!("  Request Timeout: {}s", config.ocpp.request_timeout_secs);
            println!("  Statistics: {}", config.statistics.enabled);
            println!("  UI Port: {}", config.ui_server.port);
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// One dedicated unit: optional launch payload, then JSON worker messages
/// from stdin, one per line.
async fn worker_command(args: WorkerArgs) -> Result<()> {
    init_logging(&args.log_level, false)?;

    let options = match &args.config {
        Some(path) => load_config(path)?.station_options(),
        None => StationOptions::default(),
    };
    let initial = args
        .data
        .as_deref()
        .map(serde_json::from_str::<WorkerData>)
        .transpose()?;

    let registry = Arc::new(StationRegistry::new());
    let (control, _) = broadcast::channel(16);
    let starter = Arc::new(FleetStarter::new(options, registry, control, None));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if inbound_tx.send(line).is_err() {
                break;
            }
        }
    });
    tokio::spawn(run_dedicated_unit(starter, initial, inbound_rx, events_tx));

    report_worker_events(events_rx, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    info!("Worker stopped");
    Ok(())
}

/// Log unit events until `shutdown` resolves. Stations keep running after
/// the unit stops producing events, e.g. once stdin reaches EOF.
async fn report_worker_events(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            event = events.recv() => match event {
                Some(WorkerEvent::StationStarted { hash_id, .. }) => {
                    info!("Station {} running", hash_id)
                }
                Some(WorkerEvent::StationFailed { error: message, .. }) => {
                    error!("Station start failed: {}", message)
                }
                None => break,
            },
        }
    }
    info!("No more startup messages, running until interrupted");
    shutdown.await;
}

fn version_command() -> Result<()> {
    println!("OCPP Simulator {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Features:");
    println!("  - OCPP 1.6J and 2.0.1 charging station simulation");
    println!("  - Template-based station fleets");
    println!("  - Pool and dedicated worker strategies");
    println!("  - WebSocket control channel (ui0.0.1)");
    println!("  - Prometheus statistics");

    Ok(())
}

fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    if json_logs {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    Ok(())
}
