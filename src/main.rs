// ABOUTME: Entry point for the kiana binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs storage lifecycle commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kiana::{App, KianaConfig};

#[derive(Parser)]
#[command(name = "kiana", about = "Storage host for the kiana chat bot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open storage and hold it until interrupted.
    Serve,
    /// Import a legacy nickname JSON file into the labels table.
    ImportLegacy {
        /// Path to the legacy nicknames.json file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kiana=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = KianaConfig::from_env().context("loading configuration")?;
    let cwd = std::env::current_dir().context("resolving working directory")?;
    let db_path = KianaConfig::db_path(&cwd);

    let app = App::init(config, &db_path)
        .await
        .context("initializing storage")?;

    match cli.command {
        Command::Serve => {
            tracing::info!("kiana storage serving, press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
        }
        Command::ImportLegacy { path } => {
            let report = app.import_legacy(&path).await.context("importing legacy labels")?;
            println!(
                "claimed {}, already present {}, conflicts {}, invalid {}",
                report.claimed, report.already_present, report.conflicts, report.invalid
            );
        }
    }

    app.shutdown().await.context("shutting down storage")?;
    Ok(())
}
