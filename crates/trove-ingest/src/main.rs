//! Trove Ingest - content-sniffing data ingestion tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use trove_common::logging::{init_logging, LogConfig, LogLevel};
use trove_ingest::{EntityGraph, IngestConfig, Ingestor, Store};

#[derive(Parser, Debug)]
#[command(name = "trove-ingest")]
#[command(author, version, about = "Ingest downloaded files into the trove entity graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one or more URLs (http(s), file:// or a local path)
    Ingest {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print the entity tree
    Tree {
        /// Entity to start from (defaults to the configured root)
        #[arg(short, long)]
        root: Option<String>,

        /// Show facts under each entity
        #[arg(short, long)]
        facts: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("trove-ingest")
        .build()
        .merge_env()?;
    init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Invalid ingestion configuration")?;

    match cli.command {
        Command::Ingest { urls } => {
            let ingestor = Ingestor::from_config(config)?;

            let cancel = ingestor.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing current file");
                    cancel.cancel();
                }
            });

            for url in urls {
                if ingestor.cancellation_token().is_cancelled() {
                    break;
                }
                let report = ingestor.ingest(&url).await?;
                println!("{}", serde_json::to_string(&report)?);
            }
        },
        Command::Tree { root, facts } => {
            let graph = EntityGraph::new(Store::open(&config.database_path)?);
            let name = root.unwrap_or_else(|| config.root_entity.clone());
            let id = graph
                .find(&name)?
                .with_context(|| format!("No entity named {}", name))?;
            print!("{}", graph.render_tree(id, facts)?);
        },
    }

    info!("Done");
    Ok(())
}
