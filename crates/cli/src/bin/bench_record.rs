// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::{bail, Result};
use std::time::Instant;

use tickvault::checksum::generate_key_pair;
use tickvault::format::{Direction, TickDataBuilder, Vector3};
use tickvault::{replay_signer, Compression, ReplayMetaData, ReplayWriter, WriterConfig};
use tickvault_cli::scan::scan_file;

const NUM_TICKS: u32 = 20_000;
const ENTITIES_PER_TICK: u32 = 64;

fn tick_data(index: u32) -> Vec<u8> {
    let mut b = TickDataBuilder::new();
    if index == 0 {
        b.space_data(1, 0x01, "bench");
    }
    for id in 0..ENTITIES_PER_TICK {
        let phase = (index + id) as f32 * 0.05;
        b.volatile((id + 1) as i32, Vector3::new(phase.cos(), 0.0, phase.sin()), Direction::default(), 0);
    }
    b.build()
}

fn bench(label: &str, compression: Compression, private_key: &str, public_key: &str) -> Result<()> {
    let path = std::env::temp_dir().join(format!("tickvault-bench-{}-{}.tvr", label, std::process::id()));
    let _ = std::fs::remove_file(&path);

    let config = WriterConfig {
        compression,
        ..WriterConfig::default()
    };
    let mut meta = ReplayMetaData::new();
    meta.add("bench", label);

    let payloads: Vec<Vec<u8>> = (0..NUM_TICKS).map(tick_data).collect();
    let raw_bytes: usize = payloads.iter().map(Vec::len).sum();

    println!("🏁 [{}] Recording {} ticks...", label, NUM_TICKS);
    let start = Instant::now();
    let mut writer = ReplayWriter::create(&path, replay_signer(private_key), &config, [0; 16], &meta)?;
    for (i, data) in payloads.iter().enumerate() {
        writer.add_tick_data(i as u32, 1, data)?;
        writer.process_completions();
    }
    writer.finalise()?;
    writer.wait_idle();
    let record_time = start.elapsed();
    if let Some(error) = writer.error() {
        bail!("Recording failed: {}", error);
    }
    drop(writer);

    let start = Instant::now();
    let scan = scan_file(&path, Some(public_key))?;
    let verify_time = start.elapsed();
    if let Some((kind, msg)) = &scan.failure {
        bail!("Verification failed ({:?}): {}", kind, msg);
    }

    let file_bytes = scan.file_len;
    println!(
        "   Record: {:.0} ticks/s ({:?}) | Verify: {:.0} ticks/s ({:?})",
        f64::from(NUM_TICKS) / record_time.as_secs_f64(),
        record_time,
        scan.ticks.len() as f64 / verify_time.as_secs_f64(),
        verify_time
    );
    println!(
        "   Size: {} bytes on disk for {} raw ({:.2}x)",
        file_bytes,
        raw_bytes,
        raw_bytes as f64 / file_bytes.max(1) as f64
    );

    // Finalised recordings are read-only; clear that before removing.
    if let Ok(metadata) = std::fs::metadata(&path) {
        let mut permissions = metadata.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        let _ = std::fs::set_permissions(&path, permissions);
    }
    let _ = std::fs::remove_file(&path);
    Ok(())
}

fn main() -> Result<()> {
    tickvault::telemetry::init_tracing("warn");
    println!("🚀 Starting Recording Benchmark ({} entities per tick)...", ENTITIES_PER_TICK);
    let (private_key, public_key) = generate_key_pair();

    bench("none", Compression::None, &private_key, &public_key)?;
    bench("zstd", Compression::Zstd { level: 1 }, &private_key, &public_key)?;
    bench("lz4", Compression::Lz4, &private_key, &public_key)?;

    println!("✅ Benchmark complete.");
    Ok(())
}
