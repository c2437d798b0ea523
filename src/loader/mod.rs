// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Background tick loading.
//!
//! At most one task is in flight. A new request replaces whatever was
//! asked for before; when a task finishes with parameters that no longer
//! match the current request its ticks are dropped and the current
//! request is scheduled instead. Results are collected by [`TickLoader::poll`]
//! on the owner's thread.

pub mod file_provider;
mod task;

pub use file_provider::{FileProvider, MemoryFileProvider, StdFileProvider};

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::LoaderConfig;
use crate::error::ErrorKind;
use crate::format::{ProtocolVersion, ReplayHeader, ReplayMetaData, ReplayTickData};
use crate::scheduler::TaskScheduler;
use task::{LoadTask, TaskOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    ReadHeader,
    /// Reload from the start of the file.
    Prepend,
    /// Extend the window forward.
    Append,
}

/// Tick indices are counted from the first tick in the file; `end` is
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub kind: RequestType,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug)]
pub enum LoaderEvent {
    Header {
        header: ReplayHeader,
        meta_data: Option<ReplayMetaData>,
        first_game_time: u32,
    },
    Prepend(Vec<ReplayTickData>),
    Append(Vec<ReplayTickData>),
    /// The file was written under a protocol version this build cannot read.
    UnsupportedVersion(ProtocolVersion),
    Error {
        kind: ErrorKind,
        message: String,
    },
}

pub struct TickLoader {
    scheduler: Arc<dyn TaskScheduler>,
    provider: Arc<dyn FileProvider>,
    path: PathBuf,
    verifying_key_hex: String,
    read_block_size: usize,
    verified_to_position: usize,
    request: Option<LoadRequest>,
    in_flight: bool,
    results_tx: Sender<TaskOutcome>,
    results_rx: Receiver<TaskOutcome>,
}

impl TickLoader {
    /// An empty `verifying_key_hex` loads without verifying signatures.
    pub fn new(
        scheduler: Arc<dyn TaskScheduler>,
        provider: Arc<dyn FileProvider>,
        path: impl Into<PathBuf>,
        verifying_key_hex: impl Into<String>,
        config: &LoaderConfig,
    ) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            scheduler,
            provider,
            path: path.into(),
            verifying_key_hex: verifying_key_hex.into(),
            read_block_size: config.read_block_size,
            verified_to_position: 0,
            request: None,
            in_flight: false,
            results_tx,
            results_rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File offset up to which signatures have already been checked.
    pub fn verified_to_position(&self) -> usize {
        self.verified_to_position
    }

    /// The request waiting for a result, if any.
    pub fn next_queued(&self) -> Option<RequestType> {
        self.request.map(|r| r.kind)
    }

    pub fn current_request(&self) -> Option<LoadRequest> {
        self.request
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn add_header_request(&mut self) {
        self.add_request(RequestType::ReadHeader, 0, 1);
    }

    /// Replaces any unfinished request.
    pub fn add_request(&mut self, kind: RequestType, start: u32, end: u32) {
        self.request = Some(LoadRequest { kind, start, end });
        self.schedule();
    }

    fn schedule(&mut self) {
        let Some(request) = self.request else { return };
        if self.in_flight {
            return;
        }
        self.in_flight = true;

        let provider = Arc::clone(&self.provider);
        let path = self.path.clone();
        let key = self.verifying_key_hex.clone();
        let verify_from_position = self.verified_to_position;
        let read_block_size = self.read_block_size;
        let results = self.results_tx.clone();
        self.scheduler.submit(Box::new(move || {
            let outcome = LoadTask {
                provider: provider.as_ref(),
                path: &path,
                verifying_key_hex: &key,
                verify_from_position,
                read_block_size,
            }
            .run(request);
            // The loader may be gone; its result then has nowhere to go.
            let _ = results.send(outcome);
        }));
    }

    /// Handles finished tasks and returns the events for the owner.
    pub fn poll(&mut self) -> Vec<LoaderEvent> {
        let mut events = Vec::new();
        while let Ok(outcome) = self.results_rx.try_recv() {
            if let Some(event) = self.on_task_finished(outcome) {
                events.push(event);
            }
        }
        events
    }

    fn on_task_finished(&mut self, outcome: TaskOutcome) -> Option<LoaderEvent> {
        self.in_flight = false;
        if outcome.error.is_none() {
            self.verified_to_position = self.verified_to_position.max(outcome.verified_to_position);
        }

        if self.request != Some(outcome.request) {
            debug!(
                stale = ?outcome.request,
                current = ?self.request,
                dropped = outcome.ticks.len(),
                failed = outcome.error.is_some(),
                "discarding stale load result"
            );
            self.schedule();
            return None;
        }
        self.request = None;

        if let Some(found) = outcome.unsupported_version {
            return Some(LoaderEvent::UnsupportedVersion(found));
        }
        if let Some((kind, message)) = outcome.error {
            return Some(LoaderEvent::Error { kind, message });
        }

        match outcome.request.kind {
            RequestType::Prepend => Some(LoaderEvent::Prepend(outcome.ticks)),
            RequestType::Append => Some(LoaderEvent::Append(outcome.ticks)),
            RequestType::ReadHeader => {
                // The first tick is only read to learn the first game time.
                match (outcome.header, outcome.first_game_time) {
                    (Some(header), Some(first_game_time)) if !outcome.ticks.is_empty() => {
                        Some(LoaderEvent::Header {
                            header,
                            meta_data: outcome.meta_data,
                            first_game_time,
                        })
                    }
                    _ => None,
                }
            }
        }
    }
}
