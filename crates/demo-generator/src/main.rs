// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use demo_generator::{generate, DemoScene, DEATH_TICK, SPAWN_TICK};
use tickvault::checksum::signature::Ed25519Scheme;
use tickvault::WriterConfig;

/// Seed of the published demo key. Never use it for real recordings.
const DEMO_SEED: &str = "5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed5eed";

#[derive(Parser)]
#[command(name = "demo-generator")]
#[command(about = "Writes a signed sample recording of a scripted arena skirmish")]
struct Args {
    /// Output file.
    #[arg(long, short, default_value = "demo_replay/arena.tvr")]
    out: PathBuf,

    /// Number of ticks to record.
    #[arg(long, default_value_t = 120)]
    ticks: u32,

    /// Hex Ed25519 seed to sign with. Defaults to the published demo seed.
    #[arg(long)]
    key: Option<String>,
}

fn main() -> Result<()> {
    tickvault::telemetry::init_tracing("info");
    let args = Args::parse();

    if let Some(dir) = args.out.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    if args.out.exists() {
        std::fs::remove_file(&args.out)?;
    }

    let private_key = args.key.unwrap_or_else(|| DEMO_SEED.to_string());
    let public_key = Ed25519Scheme::from_signing_hex(&private_key)
        .verifying_key_hex()
        .ok_or_else(|| anyhow::anyhow!("Invalid private key"))?;

    println!("🎬 Recording 'Arena Skirmish' ({} ticks)...", args.ticks);
    let scene = DemoScene {
        num_ticks: args.ticks,
        writer: WriterConfig::default(),
        private_key,
    };
    let summary = generate(&args.out, &scene)?;

    println!("✅ Demo recording written to: {:?}", summary.path.canonicalize()?);
    println!("📊 Story: 4 entities spawn -> guard falls (tick {}) -> reinforcement (tick {})", DEATH_TICK, SPAWN_TICK);
    println!("   Public key: {}", public_key);
    println!("   Try: tickvault verify {} --key {}", args.out.display(), public_key);
    println!("        tickvault replay {} --key {} --seek 50", args.out.display(), public_key);

    Ok(())
}
