// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use tickvault::ReplayConfig;
use tickvault_cli::commands::keygen::resolve_key;
use tickvault_cli::commands::replay::ReplayOptions;
use tickvault_cli::commands::{inspect, keygen, replay, timeline, verify};

#[derive(Parser)]
#[command(name = "tickvault")]
#[command(about = "tickvault forensic CLI: inspect, verify and replay signed tick recordings", long_about = None)]
struct Cli {
    /// JSON file overriding the default writer/playback/loader settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the header, meta-data and shape of a replay file.
    Inspect {
        path: PathBuf,

        /// Public key (hex, or a file holding it). Without one, signatures are skipped.
        #[arg(long, short)]
        key: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check every signature in a replay file.
    Verify {
        path: PathBuf,

        /// Public key (hex, or a file holding it).
        #[arg(long, short)]
        key: String,
    },
    /// List ticks with their game times and block contents.
    Timeline {
        path: PathBuf,

        #[arg(long, short)]
        key: Option<String>,

        /// First tick index to show.
        #[arg(long, default_value_t = 0)]
        from: u32,

        /// Number of ticks to show.
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Play a recording headlessly and report what a client would see.
    Replay {
        path: PathBuf,

        #[arg(long, short)]
        key: Option<String>,

        /// Tick index to seek to once playback starts.
        #[arg(long)]
        seek: Option<u32>,

        /// Playback speed multiplier.
        #[arg(long, default_value_t = 1.0)]
        speed: f32,

        #[arg(long)]
        json: bool,
    },
    /// Generate an Ed25519 key pair for signing recordings.
    Keygen {
        /// Write `<out>.key` and `<out>.pub` instead of printing.
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReplayConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Ok(ReplayConfig::from_json_str(&text)?)
        }
        None => Ok(ReplayConfig::default()),
    }
}

fn optional_key(key: Option<String>) -> anyhow::Result<Option<String>> {
    key.as_deref().map(resolve_key).transpose()
}

fn main() -> anyhow::Result<()> {
    tickvault::telemetry::init_tracing("warn");

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { path, key, json } => {
            let key = optional_key(key)?;
            inspect::run(&path, key.as_deref(), json)
        }
        Commands::Verify { path, key } => verify::run(&path, &resolve_key(&key)?),
        Commands::Timeline { path, key, from, limit } => {
            let key = optional_key(key)?;
            timeline::run(&path, key.as_deref(), from, limit)
        }
        Commands::Replay {
            path,
            key,
            seek,
            speed,
            json,
        } => {
            let options = ReplayOptions {
                public_key: optional_key(key)?.unwrap_or_default(),
                seek,
                speed,
                config,
            };
            replay::run(&path, &options, json)
        }
        Commands::Keygen { out } => keygen::run(out.as_deref()).map(|_| ()),
    }
}
