// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Configuration.
//!
//! Tunables are passed to constructors explicitly; nothing here is global.

use serde::{Deserialize, Serialize};

use crate::compression::Compression;
use crate::error::{ReplayError, ReplayResult};

/// Default ticks per second of a recording.
pub const DEFAULT_UPDATE_FREQUENCY: u8 = 10;

/// Upper bound on a single string stored in the metadata block.
pub const MAX_METADATA_VALUE_SIZE: usize = 65536;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub writer: WriterConfig,
    pub playback: PlaybackConfig,
    pub loader: LoaderConfig,
}

impl ReplayConfig {
    pub fn from_json_str(json: &str) -> ReplayResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ReplayError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> ReplayResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| ReplayError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> ReplayResult<()> {
        let invalid = |msg: &str| Err(ReplayError::Serialization(msg.to_string()));
        if self.writer.num_ticks_to_sign == 0 {
            return invalid("writer.num_ticks_to_sign must be at least 1");
        }
        if self.writer.update_frequency == 0 {
            return invalid("writer.update_frequency must be at least 1");
        }
        if self.playback.min_ticks_in_memory > self.playback.max_ticks_in_memory {
            return invalid("playback.min_ticks_in_memory exceeds max_ticks_in_memory");
        }
        if self.playback.max_ticks_in_memory == 0 {
            return invalid("playback.max_ticks_in_memory must be at least 1");
        }
        if self.loader.read_block_size == 0 {
            return invalid("loader.read_block_size must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub update_frequency: u8,
    /// Ticks grouped under one chunk signature.
    pub num_ticks_to_sign: u32,
    pub compression: Compression,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            update_frequency: DEFAULT_UPDATE_FREQUENCY,
            num_ticks_to_sign: 10,
            compression: Compression::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Low-water mark of resident decoded ticks.
    pub min_ticks_in_memory: u32,
    /// High-water mark of resident decoded ticks.
    pub max_ticks_in_memory: u32,
    /// When receiving, speed resets to 1 once fewer ticks than this are
    /// left ahead of the playhead.
    pub ideal_ticks_left: u32,
    /// Ticks between volatile cache reinjections.
    pub volatile_injection_period: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_ticks_in_memory: 300,
            max_ticks_in_memory: 3000,
            ideal_ticks_left: 20,
            volatile_injection_period: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Bytes pulled from the file per read.
    pub read_block_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            read_block_size: 4096,
        }
    }
}
