// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Per-tick compression.
//!
//! Compressed tick data starts with a tag byte naming the codec, so a
//! reader never needs to know how the writer was configured.

use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, ReplayResult};

const TAG_NONE: u8 = 0;
const TAG_ZSTD: u8 = 1;
const TAG_LZ4: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Zstd { level: i32 },
    Lz4,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd { level: 1 }
    }
}

impl Compression {
    /// Compresses `data`, prefixing the codec tag.
    pub fn compress(&self, data: &[u8]) -> ReplayResult<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 1);
        match self {
            Compression::None => {
                out.push(TAG_NONE);
                out.extend_from_slice(data);
            }
            Compression::Zstd { level } => {
                out.push(TAG_ZSTD);
                let body = zstd::bulk::compress(data, *level)
                    .map_err(|e| ReplayError::Compression(e.to_string()))?;
                out.extend_from_slice(&body);
            }
            Compression::Lz4 => {
                out.push(TAG_LZ4);
                out.extend_from_slice(&lz4_flex::compress_prepend_size(data));
            }
        }
        Ok(out)
    }
}

/// Reverses [`Compression::compress`] whatever codec was used.
pub fn decompress(data: &[u8]) -> ReplayResult<Vec<u8>> {
    let (tag, body) = data
        .split_first()
        .ok_or_else(|| ReplayError::Compression("empty compressed stream".into()))?;
    match *tag {
        TAG_NONE => Ok(body.to_vec()),
        TAG_ZSTD => zstd::stream::decode_all(body)
            .map_err(|e| ReplayError::Compression(e.to_string())),
        TAG_LZ4 => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| ReplayError::Compression(e.to_string())),
        other => Err(ReplayError::Compression(format!(
            "unknown compression tag {}",
            other
        ))),
    }
}
