// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use std::path::Path;

use crate::scan::{scan_file, Scan};

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub path: String,
    pub file_bytes: usize,
    pub status: String,
    pub version: Option<String>,
    pub digest: Option<String>,
    pub update_frequency: Option<u8>,
    pub recorded_at: Option<String>,
    pub nonce: Option<String>,
    pub signature_length: Option<u16>,
    pub is_live: Option<bool>,
    pub num_ticks_declared: Option<u32>,
    pub num_ticks_present: usize,
    pub num_chunks: u32,
    pub first_game_time: Option<u32>,
    pub last_game_time: Option<u32>,
    pub duration_seconds: f64,
    pub trailing_bytes: usize,
    pub meta_data: Vec<(String, String)>,
}

impl InspectReport {
    pub fn from_scan(path: &Path, scan: &Scan) -> Self {
        let status = match (&scan.failure, scan.is_signed) {
            (Some((kind, message)), _) => format!("CORRUPT ({}): {}", kind, message),
            (None, _) if scan.header.is_none() => "INCOMPLETE: no header".to_string(),
            (None, true) => "VERIFIED".to_string(),
            (None, false) => "READABLE (signatures not checked)".to_string(),
        };
        let header = scan.header.as_ref();
        Self {
            path: path.display().to_string(),
            file_bytes: scan.file_len,
            status,
            version: header.map(|h| h.version.to_string()),
            digest: header.map(|h| hex::encode(h.digest)),
            update_frequency: header.map(|h| h.update_frequency),
            recorded_at: header.map(|h| {
                chrono::DateTime::from_timestamp(i64::from(h.timestamp), 0)
                    .unwrap_or_default()
                    .to_rfc3339()
            }),
            nonce: header.map(|h| hex::encode(h.nonce)),
            signature_length: header.map(|h| h.reported_signature_length),
            is_live: header.map(|h| h.is_live()),
            num_ticks_declared: header.map(|h| h.num_ticks),
            num_ticks_present: scan.ticks.len(),
            num_chunks: scan.num_chunks,
            first_game_time: scan.first_game_time,
            last_game_time: scan.last_game_time,
            duration_seconds: scan.duration_seconds(),
            trailing_bytes: scan.trailing_bytes,
            meta_data: scan
                .meta_data
                .iter()
                .flat_map(|m| m.iter().map(|(k, v)| (k.to_string(), v.to_string())))
                .collect(),
        }
    }
}

pub fn report(path: &Path, public_key: Option<&str>) -> anyhow::Result<InspectReport> {
    let scan = scan_file(path, public_key)?;
    Ok(InspectReport::from_scan(path, &scan))
}

pub fn run(path: &Path, public_key: Option<&str>, as_json: bool) -> anyhow::Result<()> {
    let report = report(path, public_key)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Field", "Value"]);

    table.add_row(vec!["File".to_string(), report.path.clone()]);
    table.add_row(vec!["Size".to_string(), format!("{} bytes", report.file_bytes)]);
    table.add_row(vec!["Status".to_string(), report.status.clone()]);
    table.add_row(vec!["Protocol".to_string(), or_dash(report.version.clone())]);
    table.add_row(vec!["Digest".to_string(), or_dash(report.digest.clone())]);
    table.add_row(vec!["Recorded".to_string(), or_dash(report.recorded_at.clone())]);
    table.add_row(vec![
        "Update Frequency".to_string(),
        or_dash(report.update_frequency.map(|f| format!("{} Hz", f))),
    ]);
    table.add_row(vec![
        "Signature".to_string(),
        or_dash(report.signature_length.map(|n| format!("{} bytes", n))),
    ]);
    let declared = match (report.is_live, report.num_ticks_declared) {
        (Some(true), _) => "live (not finalised)".to_string(),
        (_, Some(n)) => n.to_string(),
        _ => "-".to_string(),
    };
    table.add_row(vec!["Ticks Declared".to_string(), declared]);
    table.add_row(vec!["Ticks Present".to_string(), report.num_ticks_present.to_string()]);
    table.add_row(vec!["Chunks".to_string(), report.num_chunks.to_string()]);
    table.add_row(vec![
        "Game Time".to_string(),
        match (report.first_game_time, report.last_game_time) {
            (Some(first), Some(last)) => format!("{} .. {}", first, last),
            _ => "-".to_string(),
        },
    ]);
    table.add_row(vec!["Duration".to_string(), format!("{:.1}s", report.duration_seconds)]);
    if report.trailing_bytes > 0 {
        table.add_row(vec![
            "Trailing".to_string(),
            format!("{} bytes of an unfinished chunk", report.trailing_bytes),
        ]);
    }

    println!("\nReplay Report");
    println!("-------------");
    println!("{table}\n");

    if !report.meta_data.is_empty() {
        let mut meta = Table::new();
        meta.load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Key", "Value"]);
        for (key, value) in &report.meta_data {
            meta.add_row(vec![key, value]);
        }
        println!("Meta-data\n");
        println!("{meta}\n");
    }

    Ok(())
}
