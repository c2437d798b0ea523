// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Checkpoint for resuming an interrupted recording.
//!
//! The checkpoint is the entire state needed to append to an existing
//! file: no prior file content is read back on resumption.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::compression::Compression;
use crate::error::{ReplayError, ReplayResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryData {
    pub compression: Compression,
    pub num_ticks_written: u32,
    /// `None` when no tick had reached the file yet.
    pub last_tick_written: Option<u32>,
    /// Where the next chunk starts.
    pub next_chunk_position: u64,
    /// Signature of the last chunk on disk; primes the next chunk.
    pub last_signature: Vec<u8>,
    pub num_ticks_to_sign: u32,
}

impl RecoveryData {
    pub fn to_bytes(&self) -> ReplayResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ReplayError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> ReplayResult<Self> {
        let (data, used): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ReplayError::Serialization(e.to_string()))?;
        if used != bytes.len() {
            return Err(ReplayError::Serialization(format!(
                "{} trailing bytes after recovery data",
                bytes.len() - used
            )));
        }
        Ok(data)
    }

    /// First game time the resumed writer accepts.
    pub fn next_tick(&self) -> Option<u32> {
        self.last_tick_written.map(|t| t.wrapping_add(1))
    }
}

/// Hex form, suitable for storing in a database column.
impl fmt::Display for RecoveryData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes().map_err(|_| fmt::Error)?;
        f.write_str(&hex::encode(bytes))
    }
}

impl FromStr for RecoveryData {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| ReplayError::Serialization(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}
