// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! On-disk layout of a replay file.
//!
//! ```text
//! Header | MetaData | Chunk*
//! Chunk := chunk_len(4) | payload(chunk_len) | signature
//! ```
//!
//! A chunk signature covers the length prefix and the payload, with the
//! scheme primed by the previous signature (the metadata signature for
//! the first chunk). Payloads are a run of framed ticks.

pub mod blocks;
pub mod header;
pub mod metadata;
pub mod tick;

pub use blocks::{Block, BlockError, BlockReader, BlockType, Direction, EntityId, TickDataBuilder, Vector3};
pub use header::{ProtocolVersion, ReplayHeader};
pub use metadata::ReplayMetaData;
pub use tick::{ReplayTickData, TickHeader, TICK_HEADER_SIZE};

/// Size of the length prefix in front of every chunk.
pub const CHUNK_LENGTH_SIZE: usize = 4;
