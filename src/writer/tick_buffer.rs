// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Accumulates one tick's shard contributions until the tick is framed.

use tracing::{error, info};

use crate::compression::Compression;
use crate::error::ReplayResult;
use crate::format::tick::write_tick;

#[derive(Debug)]
pub struct TickBuffer {
    game_time: u32,
    num_expected: u32,
    num_left: u32,
    /// Raw shard data until finalised, the framed tick afterwards.
    data: Vec<u8>,
    is_finalised: bool,
}

impl TickBuffer {
    pub fn new(game_time: u32, num_expected: u32) -> Self {
        Self {
            game_time,
            num_expected,
            num_left: num_expected,
            data: Vec::new(),
            is_finalised: false,
        }
    }

    pub fn game_time(&self) -> u32 {
        self.game_time
    }

    pub fn num_expected(&self) -> u32 {
        self.num_expected
    }

    pub fn num_left(&self) -> u32 {
        self.num_left
    }

    pub fn is_complete(&self) -> bool {
        self.num_left == 0
    }

    pub fn is_finalised(&self) -> bool {
        self.is_finalised
    }

    /// Raises the expected shard count. The count never shrinks.
    pub fn expect_shards(&mut self, num_expected: u32) {
        if num_expected <= self.num_expected {
            return;
        }
        let delta = num_expected - self.num_expected;
        if delta > 1 {
            error!(
                game_time = self.game_time,
                from = self.num_expected,
                to = num_expected,
                "shard count grew by more than one within a tick"
            );
        }
        self.num_expected = num_expected;
        self.num_left += delta;
    }

    /// Appends one shard. Returns false when every expected shard has
    /// already arrived, in which case the data is dropped.
    pub fn add_shard(&mut self, blob: &[u8]) -> bool {
        if self.num_left == 0 || self.is_finalised {
            info!(
                game_time = self.game_time,
                "already have a complete shard set, ignoring extra data"
            );
            return false;
        }
        self.data.extend_from_slice(blob);
        self.num_left -= 1;
        true
    }

    /// Compresses the accumulated data and frames it as a tick block.
    pub fn finalise(&mut self, compression: Compression) -> ReplayResult<()> {
        if self.is_finalised {
            return Ok(());
        }
        if !self.is_complete() {
            info!(
                game_time = self.game_time,
                missing = self.num_left,
                expected = self.num_expected,
                "finalising incomplete tick"
            );
        }
        let payload = if self.data.is_empty() {
            Vec::new()
        } else {
            compression.compress(&self.data)?
        };
        let mut framed = Vec::with_capacity(payload.len() + crate::format::TICK_HEADER_SIZE);
        write_tick(&mut framed, self.game_time, &payload)?;
        self.data = framed;
        self.is_finalised = true;
        Ok(())
    }

    /// The framed tick, once finalised.
    pub fn framed(&self) -> Option<&[u8]> {
        self.is_finalised.then_some(self.data.as_slice())
    }
}
