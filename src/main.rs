//! # Gamedex CLI (`gdx`)
//!
//! The `gdx` binary drives the data pipeline: fetching raw records from the
//! upstream API, building the published JSON layout, verifying it, and
//! loading it back the way a client would.
//!
//! ## Usage
//!
//! ```bash
//! gdx --config ./config/gdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gdx fetch <kind>` | Fetch an ID range or ID list into a snapshot file |
//! | `gdx build <kind\|all>` | Merge snapshots and write shards or a consolidated file |
//! | `gdx verify <kind\|all>` | Check written output against its manifest |
//! | `gdx inspect <kind>` | Load a kind through the cache and print a sample |
//! | `gdx compress <file>` | Write `<file>.gz` |
//! | `gdx decompress <file>` | Inflate a `.gz` file next to itself |
//!
//! ## Examples
//!
//! ```bash
//! # Fetch a range of map IDs
//! gdx fetch maps --start 100000000 --end 100000100 --out raw/maps.json
//!
//! # Fetch the IDs named in a list
//! gdx fetch npcs --ids raw/npc-ids.json --out raw/npcs.json
//!
//! # Build everything, keeping the last value of repeated IDs
//! gdx build all --policy last
//!
//! # Read back what a client would see, from the CDN
//! GAMEDEX_DATA_SOURCE=remote gdx inspect items
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gamedex::build::{self, BuildOptions};
use gamedex::config;
use gamedex::merge::MergePolicy;
use gamedex::models::ResourceKind;
use gamedex::progress::ProgressMode;
use gamedex::{compress, fetch, loader, sources, verify};

/// Gamedex CLI: build and load static game data.
///
/// All commands except `compress` and `decompress` read a TOML
/// configuration file given by `--config`.
#[derive(Parser)]
#[command(
    name = "gdx",
    about = "Gamedex: fetch, build, and load static game data",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gdx.toml")]
    config: PathBuf,

    /// Progress on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch records from the upstream API into a snapshot file.
    ///
    /// IDs come from either `--start`/`--end` (inclusive) or `--ids`, a JSON
    /// array of integers. Missing IDs (404) are counted and skipped.
    Fetch {
        /// Resource kind: `items`, `monsters`, `maps`, or `npcs`.
        kind: ResourceKind,

        #[arg(long, requires = "end", conflicts_with = "ids")]
        start: Option<u32>,

        #[arg(long, requires = "start")]
        end: Option<u32>,

        /// JSON file holding an array of IDs.
        #[arg(long)]
        ids: Option<PathBuf>,

        /// Snapshot file to write.
        #[arg(long)]
        out: PathBuf,
    },

    /// Merge snapshots and write the published layout.
    Build {
        /// Resource kind, or `all`.
        target: String,

        /// Override `[output].chunk_size`.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Which value of a repeated ID to keep: `first` or `last`.
        #[arg(long)]
        policy: Option<MergePolicy>,

        /// Merge and count without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Check written output against its manifest.
    Verify {
        /// Resource kind, or `all`.
        target: String,
    },

    /// Load a kind the way a client would and print a sample.
    Inspect {
        kind: ResourceKind,

        /// Number of records to print.
        #[arg(long, default_value_t = 10)]
        sample: usize,
    },

    /// Gzip a file to `<file>.gz`.
    Compress { file: PathBuf },

    /// Inflate a `.gz` file next to itself.
    Decompress { file: PathBuf },
}

/// Parse `all` or a single kind.
fn parse_targets(target: &str) -> Result<Vec<ResourceKind>> {
    if target.eq_ignore_ascii_case("all") {
        Ok(ResourceKind::ALL.to_vec())
    } else {
        Ok(vec![target.parse()?])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    // Commands that don't require config
    match &cli.command {
        Commands::Compress { file } => {
            let written = compress::compress_file(file)?;
            println!("{}", written.display());
            return Ok(());
        }
        Commands::Decompress { file } => {
            let written = compress::decompress_file(file)?;
            println!("{}", written.display());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Fetch {
            kind,
            start,
            end,
            ids,
            out,
        } => {
            let ids = match (start, end, ids) {
                (Some(start), Some(end), None) => fetch::id_range(start, end)?,
                (None, None, Some(path)) => sources::read_id_list(&path)?,
                _ => bail!("Specify either --start and --end, or --ids"),
            };
            fetch::run_fetch(&cfg, kind, &ids, &out, progress.as_ref()).await?;
        }
        Commands::Build {
            target,
            chunk_size,
            policy,
            dry_run,
        } => {
            let kinds = parse_targets(&target)?;
            let defaults = BuildOptions::from_config(&cfg);
            let options = BuildOptions {
                chunk_size: chunk_size.unwrap_or(defaults.chunk_size),
                policy: policy.unwrap_or(defaults.policy),
                dry_run,
                ..defaults
            };
            build::run_build(&cfg, &kinds, &options, progress.as_ref())?;
        }
        Commands::Verify { target } => {
            let kinds = parse_targets(&target)?;
            verify::run_verify(&cfg, &kinds)?;
        }
        Commands::Inspect { kind, sample } => {
            loader::run_inspect(&cfg, kind, sample).await?;
        }
        Commands::Compress { .. } | Commands::Decompress { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
