// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! tickvault: signed, chunked, crash-recoverable tick recording and playback.
//!
//! A recording process feeds per-tick data to a [`ReplayWriter`], which
//! groups ticks into chunks, signs each chunk with a scheme chained to the
//! previous signature and hands it to a background file writer. Readers
//! parse the same bytes incrementally from any fragmentation; the
//! [`ReplayController`] plays them back through a [`TickLoader`] that keeps
//! a bounded window of ticks in memory.

pub mod checksum;
pub mod codec;
pub mod compression;
pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod loader;
pub mod reader;
pub mod scheduler;
pub mod telemetry;
pub mod writer;

pub use checksum::{replay_signer, replay_verifier, ChecksumScheme};
pub use compression::Compression;
pub use config::{LoaderConfig, PlaybackConfig, ReplayConfig, WriterConfig};
pub use controller::{FileDisposition, PlaybackState, ReplayController, ReplayHandler, ReplaySource};
pub use error::{ErrorKind, ReplayError, ReplayResult};
pub use format::{ReplayHeader, ReplayMetaData, ReplayTickData};
pub use loader::TickLoader;
pub use reader::{ReplayReader, ReplayReaderListener};
pub use writer::{RecoveryData, ReplayWriter};

#[cfg(test)]
mod tests;
