// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Single pass over a replay file through the streaming reader.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use tickvault::format::{BlockReader, ReplayHeader, ReplayMetaData, ReplayTickData};
use tickvault::reader::{ReplayReader, ReplayReaderListener};
use tickvault::ErrorKind;

/// Bytes handed to the reader per call, matching the loader's default.
pub const SCAN_BLOCK_SIZE: usize = 4096;

#[derive(Default)]
struct TickCollector {
    ticks: Vec<ReplayTickData>,
}

impl ReplayReaderListener for TickCollector {
    fn on_tick_data(&mut self, game_time: u32, is_compressed: bool, data: &[u8]) -> Result<(), String> {
        self.ticks.push(ReplayTickData::new(game_time, data.to_vec(), is_compressed));
        Ok(())
    }
}

/// What a reader saw in one file.
pub struct Scan {
    pub file_len: usize,
    pub header: Option<ReplayHeader>,
    pub meta_data: Option<ReplayMetaData>,
    /// Ticks as stored; compressed ticks stay compressed.
    pub ticks: Vec<ReplayTickData>,
    /// Tick chunks, not counting the header and meta-data.
    pub num_chunks: u32,
    /// Signatures checked, the header and meta-data included.
    pub num_chunks_verified: u32,
    pub verified_to: usize,
    /// Bytes after the last complete chunk.
    pub trailing_bytes: usize,
    pub first_game_time: Option<u32>,
    pub last_game_time: Option<u32>,
    /// The first error the reader hit. Everything before it is valid.
    pub failure: Option<(ErrorKind, String)>,
    pub is_signed: bool,
}

impl Scan {
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && self.header.is_some()
    }

    pub fn duration_seconds(&self) -> f64 {
        let frequency = self.header.as_ref().map_or(0, |h| h.update_frequency);
        if frequency == 0 {
            return 0.0;
        }
        self.ticks.len() as f64 / f64::from(frequency)
    }
}

/// Reads `path` from start to end. An empty or absent `public_key` skips
/// signature checks.
pub fn scan_file(path: &Path, public_key: Option<&str>) -> Result<Scan> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(scan_bytes(&bytes, public_key))
}

pub fn scan_bytes(bytes: &[u8], public_key: Option<&str>) -> Scan {
    let key = public_key.unwrap_or("");
    let mut reader = ReplayReader::with_verifying_key(TickCollector::default(), key, false, 0);
    let mut failure = None;
    for block in bytes.chunks(SCAN_BLOCK_SIZE) {
        if let Err(e) = reader.add_data(block) {
            failure = Some((e.kind(), e.to_string()));
            break;
        }
    }

    // A failed call rolls the reader back, but ticks it had already handed
    // out stay with the listener.
    let mut ticks = std::mem::take(&mut reader.listener_mut().ticks);
    ticks.truncate(reader.num_ticks_read() as usize);

    let preamble = u32::from(reader.has_read_header()) + u32::from(reader.has_read_meta_data());
    Scan {
        file_len: bytes.len(),
        header: reader.header().cloned(),
        meta_data: reader.meta_data().cloned(),
        num_chunks: reader.num_chunks_read() - preamble,
        num_chunks_verified: reader.num_chunks_verified(),
        verified_to: reader.verified_to_position(),
        trailing_bytes: if failure.is_none() { reader.pending().len() } else { 0 },
        first_game_time: reader.first_game_time(),
        last_game_time: reader.last_game_time(),
        is_signed: !key.is_empty(),
        ticks,
        failure,
    }
}

/// Block counts of one tick keyed by block type name, or the reason the
/// tick could not be decoded.
pub fn block_counts(tick: &ReplayTickData) -> Result<BTreeMap<String, usize>, String> {
    let data = tick.decoded().map_err(|e| e.to_string())?;
    let mut counts = BTreeMap::new();
    for block in BlockReader::new(&data) {
        let block = block.map_err(|e| e.to_string())?;
        *counts.entry(format!("{:?}", block.block_type())).or_insert(0) += 1;
    }
    Ok(counts)
}

pub fn format_counts(counts: &BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(name, n)| format!("{}x{}", n, name))
        .collect::<Vec<_>>()
        .join(", ")
}
