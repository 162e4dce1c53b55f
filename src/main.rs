//! # PVR Archive CLI (`pvr-archive`)
//!
//! Archives recordings from a networked PVR to local storage.
//!
//! ## Usage
//!
//! ```bash
//! pvr-archive --config ./config/pvr-archive.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pvr-archive run` | Stage, transcode and record every pending recording |
//! | `pvr-archive status` | List recordings with their ledger state and destination |
//! | `pvr-archive name <id>` | Show the destination name for one recording identifier |
//! | `pvr-archive header <file>` | Decode a saved `header.tvwiz` |
//! | `pvr-archive inspect` | Fetch and decode headers straight from the device |
//! | `pvr-archive fetch-index` | Download the device's `index.txt` |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `pvr_archive=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pvr_archive::progress::ProgressMode;
use pvr_archive::{config, device, pipeline, status};

/// PVR Archive — copy, rename and transcode PVR recordings, exactly once.
#[derive(Parser)]
#[command(
    name = "pvr-archive",
    about = "Archive PVR recordings to local storage with an idempotent ledger",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pvr-archive.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive every recording in the index that is not yet in the ledger.
    ///
    /// Stops at the first error. Re-running is safe: archived recordings
    /// are skipped.
    Run {
        /// Show what would be archived without transferring anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of recordings to archive in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List recordings with their archive state.
    Status,

    /// Print the destination name for a recording identifier.
    Name {
        /// Recording identifier, e.g. `recordings/News Jan.5.2021_18.00`.
        id: String,
    },

    /// Decode a saved recording header file.
    Header {
        /// Path to a `header.tvwiz` file.
        path: PathBuf,
    },

    /// Fetch recording headers from the device and decode them.
    Inspect {
        /// Number of recordings to inspect.
        #[arg(long, default_value_t = 1)]
        limit: usize,
    },

    /// Download the device's recording list.
    FetchIndex {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pvr_archive=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Name { id } => return status::print_name(id),
        Commands::Header { path } => return device::run_header(path),
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            dry_run,
            limit,
            progress,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            pipeline::run_backup(&cfg, dry_run, limit, progress).await?;
        }
        Commands::Status => {
            status::list_status(&cfg)?;
        }
        Commands::Inspect { limit } => {
            device::run_inspect(&cfg, limit).await?;
        }
        Commands::FetchIndex { output } => {
            device::run_fetch_index(&cfg, output.as_deref()).await?;
        }
        Commands::Name { .. } | Commands::Header { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
