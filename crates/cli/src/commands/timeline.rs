// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;

use crate::scan::{block_counts, format_counts, scan_file};

pub fn run(path: &Path, public_key: Option<&str>, from: u32, limit: usize) -> anyhow::Result<()> {
    let scan = scan_file(path, public_key)?;
    let frequency = scan.header.as_ref().map_or(0, |h| h.update_frequency);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Tick", "Game Time", "Offset", "Bytes", "Blocks"]);

    for (index, tick) in scan.ticks.iter().enumerate().skip(from as usize).take(limit) {
        let offset = if frequency > 0 {
            format!("{:.1}s", index as f64 / f64::from(frequency))
        } else {
            "-".to_string()
        };
        let blocks = match block_counts(tick) {
            Ok(counts) if counts.is_empty() => "(empty)".to_string(),
            Ok(counts) => format_counts(&counts),
            Err(e) => format!("UNREADABLE: {}", e),
        };
        let bytes = if tick.is_compressed {
            format!("{} (compressed)", tick.data.len())
        } else {
            tick.data.len().to_string()
        };
        table.add_row(vec![index.to_string(), tick.game_time.to_string(), offset, bytes, blocks]);
    }

    println!("\nTick Timeline\n");
    println!("{table}\n");

    let shown_end = (from as usize).saturating_add(limit).min(scan.ticks.len());
    if shown_end < scan.ticks.len() {
        println!("... {} more ticks (use --from / --limit)\n", scan.ticks.len() - shown_end);
    }
    if let Some((kind, message)) = &scan.failure {
        println!("⚠️  WARNING: reading stopped early ({}): {}\n", kind, message);
    }

    Ok(())
}
