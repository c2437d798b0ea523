// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The unit of background work behind a loader request: read the file
//! from the start and collect the ticks whose index falls in range.

use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::Path;
use tracing::trace;

use super::{LoadRequest, RequestType};
use crate::error::{ErrorKind, ReplayError};
use crate::format::{ProtocolVersion, ReplayHeader, ReplayMetaData, ReplayTickData};
use crate::loader::file_provider::FileProvider;
use crate::reader::{ReplayReader, ReplayReaderListener};

/// What a finished task hands back to the loader.
#[derive(Debug)]
pub(crate) struct TaskOutcome {
    pub request: LoadRequest,
    pub header: Option<ReplayHeader>,
    pub meta_data: Option<ReplayMetaData>,
    pub first_game_time: Option<u32>,
    pub ticks: Vec<ReplayTickData>,
    pub verified_to_position: usize,
    pub error: Option<(ErrorKind, String)>,
    /// Set when the header names a protocol version this build cannot read.
    pub unsupported_version: Option<ProtocolVersion>,
}

struct RangeCollector {
    start: u32,
    end: u32,
    first_game_time: Option<u32>,
    ticks: Vec<ReplayTickData>,
    is_complete: bool,
}

impl ReplayReaderListener for RangeCollector {
    fn on_tick_data(&mut self, game_time: u32, is_compressed: bool, data: &[u8]) -> Result<(), String> {
        let first = *self.first_game_time.get_or_insert(game_time);
        let index = game_time.wrapping_sub(first);
        if index < self.start {
            return Ok(());
        }
        if index >= self.end {
            self.is_complete = true;
            return Ok(());
        }
        self.ticks
            .push(ReplayTickData::new(game_time, data.to_vec(), is_compressed));
        Ok(())
    }
}

pub(crate) struct LoadTask<'a> {
    pub provider: &'a dyn FileProvider,
    pub path: &'a Path,
    pub verifying_key_hex: &'a str,
    pub verify_from_position: usize,
    pub read_block_size: usize,
}

impl LoadTask<'_> {
    pub fn run(&self, request: LoadRequest) -> TaskOutcome {
        let (start, end) = match request.kind {
            RequestType::ReadHeader => (0, 1),
            RequestType::Prepend | RequestType::Append => (request.start, request.end),
        };
        let collector = RangeCollector {
            start,
            end,
            first_game_time: None,
            ticks: Vec::new(),
            is_complete: false,
        };
        // The buffer file keeps tick data compressed; the consumer
        // decompresses when it plays a tick.
        let mut reader = ReplayReader::with_verifying_key(
            collector,
            self.verifying_key_hex,
            false,
            self.verify_from_position,
        );

        let mut unsupported_version = None;
        let error = self.fill(&mut reader, &mut unsupported_version).err();
        trace!(
            ?request,
            ticks = reader.listener().ticks.len(),
            verified_to = reader.verified_to_position(),
            "load task finished"
        );

        let header = reader.header().cloned();
        let meta_data = reader.meta_data().cloned();
        let verified_to_position = reader.verified_to_position();
        let first_game_time = reader.first_game_time();
        let ticks = std::mem::take(&mut reader.listener_mut().ticks);
        TaskOutcome {
            request,
            header,
            meta_data,
            first_game_time,
            ticks,
            verified_to_position,
            error,
            unsupported_version,
        }
    }

    fn fill(
        &self,
        reader: &mut ReplayReader<RangeCollector>,
        unsupported_version: &mut Option<ProtocolVersion>,
    ) -> Result<(), (ErrorKind, String)> {
        let mut file = self
            .provider
            .open(self.path)
            .map_err(|e| (ErrorKind::FileMissing, format!("Failed to open replay file: {}", e)))?;

        let mut block = vec![0u8; self.read_block_size.max(1)];
        while !reader.listener().is_complete {
            let n = match file.read(&mut block) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err((ErrorKind::Corrupted, e.to_string())),
            };
            reader.add_data(&block[..n]).map_err(|e| {
                if let ReplayError::UnsupportedVersion { found, .. } = &e {
                    *unsupported_version = Some(*found);
                }
                let kind = match e.kind() {
                    ErrorKind::Key => ErrorKind::Key,
                    ErrorKind::SignatureMismatch => ErrorKind::SignatureMismatch,
                    ErrorKind::UnsupportedVersion => ErrorKind::UnsupportedVersion,
                    _ => ErrorKind::Corrupted,
                };
                (kind, e.to_string())
            })?;
        }
        Ok(())
    }
}
