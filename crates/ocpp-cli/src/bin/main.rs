//! # OCPP CLI Application
//!
//! Operator tool driving a running simulator over its control channel.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::*;
use ocpp_cli::UiClient;
use ocpp_messages::{ProcedureAck, ResponseStatus, StationSummary};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ocpp-cli")]
#[command(about = "OCPP CLI - Control a running charging station simulator")]
#[command(version, author)]
struct Cli {
    /// Simulator control channel URL
    #[arg(short, long, global = true, default_value = "ws://127.0.0.1:8080", env = "OCPP_SIMULATOR_URL")]
    url: String,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the simulated charging stations
    List(ListArgs),
    /// Start a transaction on a station connector
    StartTransaction(StartTransactionArgs),
    /// Stop the transaction on a station connector
    StopTransaction(StopTransactionArgs),
}

#[derive(Args)]
struct ListArgs {
    /// Print raw JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StartTransactionArgs {
    /// Station hash id
    #[arg(long)]
    hash_id: String,

    #[arg(short, long, default_value = "1")]
    connector: u32,

    /// RFID tag presented for the transaction
    #[arg(short, long)]
    id_tag: String,
}

#[derive(Args)]
struct StopTransactionArgs {
    /// Station hash id
    #[arg(long)]
    hash_id: String,

    #[arg(short, long, default_value = "1")]
    connector: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let client = UiClient::connect(&cli.url).await?;
    match cli.command {
        Commands::List(args) => {
            let stations = client.list_charging_stations().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stations)?);
            } else {
                print_stations(&stations);
            }
        }
        Commands::StartTransaction(args) => {
            let ack = client
                .start_transaction(&args.hash_id, args.connector, &args.id_tag)
                .await?;
            print_ack("StartTransaction", &ack);
        }
        Commands::StopTransaction(args) => {
            let ack = client
                .stop_transaction(&args.hash_id, args.connector)
                .await?;
            print_ack("StopTransaction", &ack);
        }
    }
    Ok(())
}

fn print_stations(stations: &[StationSummary]) {
    if stations.is_empty() {
        println!("{}", "No stations running".yellow());
        return;
    }
    println!("{}", "🔌 Charging Stations".bold().blue());
    println!("{}", "═".repeat(60).blue());
    for station in stations {
        let link = if station.connected {
            "online".green()
        } else {
            "offline".red()
        };
        println!(
            "{} #{} [{}] {} {}",
            station.hash_id.bold(),
            station.index,
            station.ocpp_version,
            station.registration.cyan(),
            link
        );
        for connector in &station.connectors {
            let transaction = connector
                .transaction_id
                .map(|id| format!(" tx {}", id))
                .unwrap_or_default();
            println!(
                "    connector {}: {}{}",
                connector.connector_id, connector.status, transaction
            );
        }
    }
}

fn print_ack(procedure: &str, ack: &ProcedureAck) {
    match ack.status {
        ResponseStatus::Success => println!("✓ {} {}", procedure, "accepted".green()),
        ResponseStatus::Failure => println!(
            "✗ {} {}: {}",
            procedure,
            "failed".red(),
            ack.reason.as_deref().unwrap_or("no reason given")
        ),
    }
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
