//! # blip CLI
//!
//! The `blip` binary runs the incident ingestion pipeline against the
//! police log, inspects what has been stored, and serves the cron trigger.
//!
//! ## Usage
//!
//! ```bash
//! blip --config ./config/blip.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `blip init` | Create the SQLite database and run schema migrations |
//! | `blip sync` | Run one ingestion cycle |
//! | `blip incidents` | List stored incidents |
//! | `blip stats` | Incident counts, total and per district |
//! | `blip districts` | List police districts and their bias points |
//! | `blip geocode <district> <text>` | Try one place lookup |
//! | `blip serve` | Start the HTTP trigger server |
//!
//! ## Environment
//!
//! `OPENAI_API_KEY` and `GOOGLE_PLACES_API_KEY` are needed by `sync`,
//! `geocode` and `serve`; `serve` also needs `CRON_SECRET`. Log verbosity
//! follows `RUST_LOG` (default `blip=info`).
//!
//! ## Examples
//!
//! ```bash
//! blip init --config ./config/blip.toml
//! blip sync --dry-run
//! blip incidents --since 2024-03-01 --json
//! blip geocode "Oslo Politidistrikt" "Karl Johans gate, Oslo"
//! ```

use blip::{config, districts, geocode, incidents, ingest, migrate, server, stats};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// blip: police-log incident ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/blip.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "blip",
    about = "blip: turns police-log threads into geocoded, severity-rated incidents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/blip.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run one ingestion cycle: new threads from the poll window, then a
    /// refresh of every active incident.
    Sync {
        /// Fetch and count without extracting, geocoding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored incidents, newest first.
    Incidents {
        /// Only incidents that occurred on or after this date
        /// (YYYY-MM-DD or RFC 3339). Defaults to the last 24 hours.
        #[arg(long)]
        since: Option<String>,

        /// Include incidents without a severity rating.
        #[arg(long)]
        all: bool,

        /// Maximum number of incidents to list.
        #[arg(long)]
        limit: Option<i64>,

        /// Print the marker-data JSON instead of a listing.
        #[arg(long)]
        json: bool,
    },

    /// Show incident counts.
    Stats,

    /// List known police districts and their bias points.
    Districts,

    /// Look up coordinates for a free-text location within a district.
    Geocode {
        /// District name as it appears in the feed.
        district: String,
        /// Location text, e.g. "Karl Johans gate, Oslo".
        text: String,
    },

    /// Start the HTTP server (cron trigger and marker data).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("blip=info")),
        )
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Districts = cli.command {
        districts::list_districts()?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { dry_run } => {
            ingest::run_sync(&cfg, dry_run).await?;
        }
        Commands::Incidents {
            since,
            all,
            limit,
            json,
        } => {
            incidents::run_incidents(&cfg, since.as_deref(), all, limit, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Geocode { district, text } => {
            geocode::run_geocode(&cfg, &district, &text).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Districts => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
