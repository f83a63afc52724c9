use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rarebird::config::load_config;
use rarebird::harness::{HarnessOptions, run_harness};
use rarebird::parser::{classify, parse_digest};
use rarebird::pipeline::{IngestOptions, ingest_from_config};
use rarebird::server::serve;
use rarebird::store::SqliteStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rarebird", about = "Ingests eBird alert digests into a sightings store")]
struct Cli {
    #[arg(long, default_value = "config/rarebird.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process every unread digest once.
    Ingest {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Parse a single digest file and print its records.
    Parse { file: PathBuf },
    /// Serve stored sightings over HTTP.
    Serve,
    /// Ingest a directory of digests twice and report idempotence.
    Harness {
        dir: PathBuf,
        #[arg(long, default_value = "data/harness.sqlite")]
        store: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let loaded = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { dry_run } => {
            let report = ingest_from_config(&loaded, dry_run)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_partial_failure() {
                warn!(failed = report.failed, "some messages were left unread");
            }
        }
        Commands::Parse { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let kind = classify(&body);
            if !kind.is_relevant() {
                bail!("{} is not a sighting digest", file.display());
            }
            let options = IngestOptions::from_config(&loaded)?;
            let parsed = parse_digest(&body, kind, &options.parse)?;
            info!(
                kind = ?kind,
                records = parsed.records.len(),
                dropped = parsed.blocks_dropped,
                "parse complete"
            );
            println!("{}", serde_json::to_string_pretty(&parsed.records)?);
        }
        Commands::Serve => {
            let bind: SocketAddr = loaded.config.server.bind.parse()?;
            let store_path = loaded.resolve(&loaded.config.store.path)?;
            let store = Arc::new(SqliteStore::open(&store_path)?);
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(serve(bind, store))?;
        }
        Commands::Harness { dir, store } => {
            let report = run_harness(&HarnessOptions {
                input_dir: dir,
                store_path: store,
                ingest: IngestOptions::from_config(&loaded)?,
            })?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_idempotent() {
                bail!("second run changed the store");
            }
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
