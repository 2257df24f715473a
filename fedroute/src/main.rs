use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use routing::config::Config;
use routing::harvest::Harvester;

#[derive(Parser)]
#[command(about = "Federated routing service for seismological data centers")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "fedroute.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the query API
    Serve,
    /// Run one harvest: pull peer documents, rebuild the station cache and
    /// persist the snapshot
    Harvest,
}

fn init_tracing(verbosity: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(verbosity.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("could not load {}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.service.verbosity.as_deref());

    match cli.command {
        CliCommand::Serve => {
            tracing::info!("starting routing service on {}:{}", config.listener.host, config.listener.port);
            if let Err(err) = routing::run(config).await {
                tracing::error!("service failed: {err}");
                return ExitCode::FAILURE;
            }
        }
        CliCommand::Harvest => {
            let harvester = Harvester::new(&config.service);
            match harvester.run().await {
                Ok(snapshot) => tracing::info!(
                    "harvested {} stream keys from {} data centers",
                    snapshot.routing.len(),
                    snapshot.datacenters.len()
                ),
                Err(err) => {
                    tracing::error!("harvest failed: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
