//! # Market Ingest CLI (`mingest`)
//!
//! ## Usage
//!
//! ```bash
//! mingest --config ./config/mingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mingest run` | Download, transcode, upload and load one category window |
//! | `mingest resolve` | Print the module ids a category query resolves to |
//! | `mingest load <uri>` | Append an already uploaded artifact to a table |
//!
//! Cloud calls authenticate with the bearer token in `GCP_ACCESS_TOKEN`.
//! Logs go to stderr and honour `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use market_ingest::config::{self, Config};
use market_ingest::gcp::GcpCredentials;
use market_ingest::ingest::{self, IngestContext};
use market_ingest::object_store::GcsClient;
use market_ingest::progress::ProgressMode;
use market_ingest::resolver::{CategoryQuery, CategoryResolver};
use market_ingest::warehouse::{BigQueryClient, Warehouse, WarehouseLoader};
use market_ingest::window::TimeWindow;

/// Market Ingest: stream provider market data into the warehouse.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mingest.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "mingest", version, about = "Stream provider market data into the warehouse")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mingest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for one category and date range.
    ///
    /// Dates are local days (`DD.MM.YYYY` or `DD/MM/YYYY`); the window
    /// covers `--start` through `--end` inclusive.
    Run {
        #[arg(long)]
        start: String,

        /// Last day of the window; defaults to `--start`.
        #[arg(long)]
        end: Option<String>,

        /// Main category name.
        #[arg(long)]
        main: String,

        /// Sub category name.
        #[arg(long)]
        sub: String,

        /// Stop after uploading the artifact.
        #[arg(long)]
        skip_load: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the module ids a category query resolves to, one per line.
    Resolve {
        #[arg(long)]
        main: String,

        #[arg(long)]
        sub: String,

        /// Region tag; defaults to the settings template region.
        #[arg(long)]
        region: Option<String>,
    },

    /// Load an uploaded artifact (`gs://bucket/object`) into a table.
    Load {
        uri: String,

        /// Target table in the configured dataset.
        #[arg(long)]
        table: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            start,
            end,
            main,
            sub,
            skip_load,
            progress,
        } => {
            run(&cfg, &start, end.as_deref(), &main, &sub, skip_load, progress).await?;
        }
        Commands::Resolve { main, sub, region } => {
            let settings = config::load_settings(&cfg.provider.settings_path)?;
            let tree = config::load_categories(&cfg.provider.categories_path)?;
            let region = match region {
                Some(region) => region,
                None => settings.region()?.to_string(),
            };
            let ids = CategoryResolver::new(cfg.resolver.clone()).resolve(
                &tree,
                &CategoryQuery {
                    main: &main,
                    sub: &sub,
                    region: &region,
                },
            );
            if ids.is_empty() {
                eprintln!("No modules match {}/{} in region {}.", main, sub, region);
            }
            for id in ids {
                println!("{}", id);
            }
        }
        Commands::Load { uri, table } => {
            let warehouse = bigquery(&cfg)?;
            let outcome = WarehouseLoader::new(
                &warehouse,
                cfg.warehouse.location.clone(),
                cfg.warehouse.poll_interval(),
            )
            .load(&uri, &cfg.warehouse.dataset, &table)
            .await
            .with_context(|| format!("Failed to load {}", uri))?;
            println!(
                "Loaded {} rows into {}.{} (job {}).",
                outcome.rows_loaded, cfg.warehouse.dataset, table, outcome.job_id
            );
        }
    }

    Ok(())
}

async fn run(
    cfg: &Config,
    start: &str,
    end: Option<&str>,
    main: &str,
    sub: &str,
    skip_load: bool,
    progress: Option<ProgressMode>,
) -> anyhow::Result<()> {
    let settings = config::load_settings(&cfg.provider.settings_path)?;
    let categories = config::load_categories(&cfg.provider.categories_path)?;
    let window = TimeWindow::from_days(start, end, cfg.staging.timezone()?)?;

    let credentials = GcpCredentials::from_env()?;
    let store = GcsClient::new(
        credentials.clone(),
        cfg.object_store.project.clone(),
        cfg.object_store.bucket.clone(),
        cfg.object_store.endpoint.as_deref(),
    )?;
    let warehouse = if skip_load {
        None
    } else {
        Some(bigquery_with(cfg, credentials)?)
    };

    let ctx = IngestContext {
        config: cfg,
        settings: &settings,
        categories: &categories,
        object_store: &store,
        warehouse: warehouse.as_ref().map(|w| w as &dyn Warehouse),
        progress: Arc::from(progress.unwrap_or_else(ProgressMode::default_for_tty).reporter()),
    };
    let report = ingest::run_ingest(&ctx, main, sub, &window)
        .await
        .with_context(|| format!("Ingest of {}/{} failed", main, sub))?;

    println!("ingest {}/{}", main, sub);
    println!("  modules: {}", report.module_ids.len());
    println!(
        "  rows: {} ({} chunks)",
        report.transcode.rows, report.transcode.chunks
    );
    if report.transcode.invalidated_timestamps > 0 {
        println!(
            "  timestamps set to null: {}",
            report.transcode.invalidated_timestamps
        );
    }
    match &report.uri {
        Some(uri) => println!("  uploaded: {}", uri),
        None => println!("  uploaded: nothing (no rows)"),
    }
    if let Some(load) = &report.load {
        println!(
            "  loaded: {} rows into {}.{} (job {})",
            load.rows_loaded, cfg.warehouse.dataset, report.table, load.job_id
        );
    }
    Ok(())
}

fn bigquery(cfg: &Config) -> anyhow::Result<BigQueryClient> {
    bigquery_with(cfg, GcpCredentials::from_env()?)
}

fn bigquery_with(cfg: &Config, credentials: GcpCredentials) -> anyhow::Result<BigQueryClient> {
    Ok(BigQueryClient::new(
        credentials,
        cfg.warehouse.project.clone(),
        cfg.warehouse.location.clone(),
        cfg.warehouse.endpoint.as_deref(),
    )?)
}
