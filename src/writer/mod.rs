// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Recording side: turns per-shard tick data into a signed replay file.
//!
//! Ticks are buffered until every expected shard has reported, framed,
//! then grouped `num_ticks_to_sign` at a time into chunks. Each chunk is
//! signed with the scheme primed by the previous chunk's signature and
//! handed to a [`BackgroundFileWriter`]. Completions are handled when the
//! owner calls [`ReplayWriter::process_completions`].

pub mod file_writer;
pub mod recovery;
pub mod registry;
pub mod tick_buffer;

pub use file_writer::{BackgroundFileWriter, FileEvent, MemoryFile, MemoryFileWriter, ThreadedFileWriter, WriteTag};
pub use recovery::RecoveryData;
pub use registry::{exists_for_path, have_all_closed, PathLease, WriterPool};
pub use tick_buffer::TickBuffer;

use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace};

use crate::checksum::{ChecksumScheme, ChecksumWriter};
use crate::compression::Compression;
use crate::config::WriterConfig;
use crate::error::{ReplayError, ReplayResult};
use crate::format::tick::write_tick;
use crate::format::{ReplayHeader, ReplayMetaData, CHUNK_LENGTH_SIZE, TICK_HEADER_SIZE};

/// Highest game time a recording can hold.
pub const MAX_GAME_TIME: u32 = u32::MAX - 1;

/// Snapshot handed to listeners on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterStatus {
    pub num_ticks_written: u32,
    pub last_tick_written: Option<u32>,
    pub is_finalising: bool,
    pub is_closed: bool,
}

pub trait ReplayWriterListener: Send {
    fn on_error(&mut self, _path: &Path, _message: &str) {}

    /// Called after a chunk, or the finalising rewrite, reaches the file.
    fn on_complete(&mut self, _path: &Path, _status: &WriterStatus) {}

    fn on_destroyed(&mut self, _path: &Path) {}
}

/// A chunk handed to the file writer but not yet confirmed on disk.
#[derive(Debug)]
struct PendingChunk {
    seq: u64,
    last_tick: u32,
    num_ticks: u32,
    byte_len: u64,
    signature: Vec<u8>,
}

pub struct ReplayWriter {
    path: PathBuf,
    file: Box<dyn BackgroundFileWriter>,
    scheme: Box<dyn ChecksumScheme>,
    compression: Compression,
    num_ticks_to_sign: u32,
    signature_length: usize,

    started: bool,
    /// Lowest tick that has not yet been completed.
    current_tick: u32,
    /// Lowest tick not yet placed in a chunk.
    next_tick_to_write: u32,
    buffered: BTreeMap<u32, TickBuffer>,

    /// Signature of the newest queued chunk; primes the next one.
    last_signature: Vec<u8>,
    pending: VecDeque<PendingChunk>,
    next_seq: u64,

    // Confirmed on disk.
    num_ticks_written: u32,
    last_tick_written: Option<u32>,
    last_chunk_position: u64,
    last_chunk_length: u64,
    confirmed_signature: Vec<u8>,

    is_finalising: bool,
    close_requested: bool,
    is_closed: bool,
    error: Option<String>,
    listeners: Vec<Box<dyn ReplayWriterListener>>,
    lease: Option<PathLease>,
}

impl ReplayWriter {
    /// Starts a new recording: writes the header and metadata, then waits
    /// for tick data.
    pub fn new(
        file: Box<dyn BackgroundFileWriter>,
        scheme: Box<dyn ChecksumScheme>,
        config: &WriterConfig,
        digest: [u8; 16],
        meta_data: &ReplayMetaData,
    ) -> ReplayResult<Self> {
        let lease = PathLease::acquire(file.path())?;
        Self::start(file, scheme, config, digest, meta_data, lease)
    }

    fn start(
        mut file: Box<dyn BackgroundFileWriter>,
        mut scheme: Box<dyn ChecksumScheme>,
        config: &WriterConfig,
        digest: [u8; 16],
        meta_data: &ReplayMetaData,
        lease: PathLease,
    ) -> ReplayResult<Self> {
        check_scheme(scheme.as_ref())?;
        let path = file.path().to_path_buf();

        let header = ReplayHeader::new(scheme.as_ref(), digest, config.update_frequency, None);
        let mut preamble = Vec::new();
        let header_signature = header.write(&mut preamble, scheme.as_mut())?;

        scheme.reset();
        scheme.read_blob(&header_signature);
        let meta_signature = meta_data.write(&mut preamble, scheme.as_mut())?;

        let preamble_len = preamble.len() as u64;
        file.queue_write(preamble, WriteTag::None);

        Ok(Self {
            path,
            file,
            signature_length: scheme.stream_size(),
            scheme,
            compression: config.compression,
            num_ticks_to_sign: config.num_ticks_to_sign.max(1),
            started: false,
            current_tick: 0,
            next_tick_to_write: 0,
            buffered: BTreeMap::new(),
            last_signature: meta_signature.clone(),
            pending: VecDeque::new(),
            next_seq: 0,
            num_ticks_written: 0,
            last_tick_written: None,
            last_chunk_position: preamble_len,
            last_chunk_length: 0,
            confirmed_signature: meta_signature,
            is_finalising: false,
            close_requested: false,
            is_closed: false,
            error: None,
            listeners: Vec::new(),
            lease: Some(lease),
        })
    }

    /// Opens `path` on a worker thread, truncating it, and starts a
    /// recording there.
    pub fn create(
        path: impl Into<PathBuf>,
        scheme: Box<dyn ChecksumScheme>,
        config: &WriterConfig,
        digest: [u8; 16],
        meta_data: &ReplayMetaData,
    ) -> ReplayResult<Self> {
        let path = path.into();
        // Claimed before the truncating open so a second recorder cannot
        // clobber the file.
        let lease = PathLease::acquire(&path)?;
        let file = ThreadedFileWriter::open(path, true)?;
        Self::start(Box::new(file), scheme, config, digest, meta_data, lease)
    }

    /// Resumes a recording from a checkpoint. Nothing already on disk is
    /// read back; anything past the checkpoint is cut off.
    pub fn recover(
        file: Box<dyn BackgroundFileWriter>,
        scheme: Box<dyn ChecksumScheme>,
        recovery: &RecoveryData,
    ) -> ReplayResult<Self> {
        let lease = PathLease::acquire(file.path())?;
        Self::resume(file, scheme, recovery, lease)
    }

    fn resume(
        mut file: Box<dyn BackgroundFileWriter>,
        scheme: Box<dyn ChecksumScheme>,
        recovery: &RecoveryData,
        lease: PathLease,
    ) -> ReplayResult<Self> {
        check_scheme(scheme.as_ref())?;
        if recovery.last_signature.len() != scheme.stream_size() {
            return Err(ReplayError::Key(format!(
                "recovery signature is {} bytes but the scheme produces {}",
                recovery.last_signature.len(),
                scheme.stream_size()
            )));
        }
        let path = file.path().to_path_buf();

        info!(
            path = %path.display(),
            num_ticks_written = recovery.num_ticks_written,
            last_tick_written = ?recovery.last_tick_written,
            next_chunk_position = recovery.next_chunk_position,
            "recovering replay writer"
        );
        file.queue_truncate(recovery.next_chunk_position, WriteTag::None);

        let next_tick = recovery.next_tick().unwrap_or(0);
        Ok(Self {
            path,
            file,
            signature_length: scheme.stream_size(),
            scheme,
            compression: recovery.compression,
            num_ticks_to_sign: recovery.num_ticks_to_sign.max(1),
            started: recovery.last_tick_written.is_some(),
            current_tick: next_tick,
            next_tick_to_write: next_tick,
            buffered: BTreeMap::new(),
            last_signature: recovery.last_signature.clone(),
            pending: VecDeque::new(),
            next_seq: 0,
            num_ticks_written: recovery.num_ticks_written,
            last_tick_written: recovery.last_tick_written,
            last_chunk_position: recovery.next_chunk_position,
            last_chunk_length: 0,
            confirmed_signature: recovery.last_signature.clone(),
            is_finalising: false,
            close_requested: false,
            is_closed: false,
            error: None,
            listeners: Vec::new(),
            lease: Some(lease),
        })
    }

    /// Reopens `path` without truncating and resumes from `recovery`.
    pub fn recover_file(
        path: impl Into<PathBuf>,
        scheme: Box<dyn ChecksumScheme>,
        recovery: &RecoveryData,
    ) -> ReplayResult<Self> {
        let path = path.into();
        let lease = PathLease::acquire(&path)?;
        if !path.exists() {
            return Err(ReplayError::FileMissing(path.display().to_string()));
        }
        let file = ThreadedFileWriter::open(path, false)?;
        Self::resume(Box::new(file), scheme, recovery, lease)
    }

    pub fn add_listener(&mut self, listener: Box<dyn ReplayWriterListener>) {
        self.listeners.push(listener);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn num_ticks_to_sign(&self) -> u32 {
        self.num_ticks_to_sign
    }

    pub fn signature_length(&self) -> usize {
        self.signature_length
    }

    /// Ticks confirmed on disk, counting filler for missing ticks.
    pub fn num_ticks_written(&self) -> u32 {
        self.num_ticks_written
    }

    pub fn last_tick_written(&self) -> Option<u32> {
        self.last_tick_written
    }

    /// Ticks buffered in memory, complete or not.
    pub fn num_ticks_buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn num_chunks_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_finalising(&self) -> bool {
        self.is_finalising
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn status(&self) -> WriterStatus {
        WriterStatus {
            num_ticks_written: self.num_ticks_written,
            last_tick_written: self.last_tick_written,
            is_finalising: self.is_finalising,
            is_closed: self.is_closed,
        }
    }

    /// Everything needed to resume this file, reflecting only what has
    /// been confirmed on disk.
    pub fn recovery_data(&self) -> RecoveryData {
        RecoveryData {
            compression: self.compression,
            num_ticks_written: self.num_ticks_written,
            last_tick_written: self.last_tick_written,
            next_chunk_position: self.last_chunk_position + self.last_chunk_length,
            last_signature: self.confirmed_signature.clone(),
            num_ticks_to_sign: self.num_ticks_to_sign,
        }
    }

    /// Adds one shard's contribution to `game_time`.
    ///
    /// `num_shards` is how many contributions make the tick complete. A
    /// completed tick also completes every earlier buffered tick.
    ///
    /// Game times run up to [`MAX_GAME_TIME`]; `u32::MAX` is refused since
    /// the tick after the last written one must still be representable.
    pub fn add_tick_data(&mut self, game_time: u32, num_shards: u32, blob: &[u8]) -> ReplayResult<()> {
        if let Some(message) = &self.error {
            return Err(ReplayError::Rejected(format!("writer has failed: {}", message)));
        }
        if game_time > MAX_GAME_TIME {
            return Err(ReplayError::Rejected(format!(
                "game time {} is past the last recordable tick {}",
                game_time, MAX_GAME_TIME
            )));
        }
        if self.is_finalising || self.is_closed || self.close_requested {
            info!(game_time, path = %self.path.display(), "writer is closing, ignoring tick data");
            return Ok(());
        }

        if !self.started {
            if blob.is_empty() {
                error!(game_time, "ignoring empty data for the first tick");
                return Ok(());
            }
            self.started = true;
            self.current_tick = game_time;
            self.next_tick_to_write = game_time;
        } else if game_time < self.current_tick {
            if !blob.is_empty() {
                error!(
                    game_time,
                    current_tick = self.current_tick,
                    bytes = blob.len(),
                    "dropping data for a tick that has already been written"
                );
            }
            return Ok(());
        }

        let num_shards = num_shards.max(1);
        let tick = self
            .buffered
            .entry(game_time)
            .or_insert_with(|| TickBuffer::new(game_time, num_shards));
        tick.expect_shards(num_shards);
        if !tick.add_shard(blob) || !tick.is_complete() {
            return Ok(());
        }

        self.finalise_completed(game_time)?;
        self.sign_and_write(false)
    }

    fn finalise_completed(&mut self, game_time: u32) -> ReplayResult<()> {
        for t in self.current_tick..=game_time {
            if let Some(tick) = self.buffered.get_mut(&t) {
                tick.finalise(self.compression)?;
            }
        }
        self.current_tick = game_time + 1;
        Ok(())
    }

    /// Emits every full group of completed ticks as a chunk. With
    /// `is_last` set a trailing partial group is emitted as well.
    fn sign_and_write(&mut self, is_last: bool) -> ReplayResult<()> {
        if !self.started {
            return Ok(());
        }
        while self.next_tick_to_write < self.current_tick
            && (is_last || self.current_tick - self.next_tick_to_write >= self.num_ticks_to_sign)
        {
            let first = self.next_tick_to_write;
            let count = self.num_ticks_to_sign.min(self.current_tick - first);
            let end = first + count;

            let mut payload_len = 0usize;
            for t in first..end {
                payload_len += match self.buffered.get_mut(&t) {
                    Some(tick) => {
                        tick.finalise(self.compression)?;
                        tick.framed().map_or(TICK_HEADER_SIZE, <[u8]>::len)
                    }
                    None => {
                        debug!(game_time = t, "writing filler for missing tick");
                        TICK_HEADER_SIZE
                    }
                };
            }
            let chunk_len = u32::try_from(payload_len)
                .map_err(|_| ReplayError::Corrupted(format!("chunk of {} bytes is too large", payload_len)))?;

            self.scheme.reset();
            self.scheme.read_blob(&self.last_signature);
            let mut out = Vec::with_capacity(CHUNK_LENGTH_SIZE + payload_len + self.signature_length);
            let signature = {
                let mut writer = ChecksumWriter::new(&mut out, self.scheme.as_mut(), false);
                writer.write_u32::<LittleEndian>(chunk_len)?;
                for t in first..end {
                    match self.buffered.remove(&t) {
                        Some(tick) => writer.write_all(tick.framed().unwrap_or_default())?,
                        None => write_tick(&mut writer, t, &[])?,
                    }
                }
                writer.finalise()
            };
            let signature = signature.ok_or_else(|| {
                ReplayError::Key(format!("could not sign chunk: {}", self.scheme.error_string()))
            })?;

            let seq = self.next_seq;
            self.next_seq += 1;
            trace!(first, count, bytes = out.len(), "queueing chunk");
            self.pending.push_back(PendingChunk {
                seq,
                last_tick: end - 1,
                num_ticks: count,
                byte_len: out.len() as u64,
                signature: signature.clone(),
            });
            self.last_signature = signature;
            self.next_tick_to_write = end;
            self.file.queue_write(out, WriteTag::Chunk(seq));
            metrics::increment_counter!("tickvault_chunks_written_total");
        }
        Ok(())
    }

    /// Writes the trailing chunk, rewrites the header tick count and
    /// marks the file read-only. The writer closes once that lands.
    pub fn finalise(&mut self) -> ReplayResult<()> {
        if self.is_finalising || self.is_closed {
            return Ok(());
        }
        if let Some(message) = &self.error {
            return Err(ReplayError::Rejected(format!("writer has failed: {}", message)));
        }
        self.is_finalising = true;
        self.sign_and_write(true)?;

        let num_ticks = self.num_ticks_written + self.pending.iter().map(|c| c.num_ticks).sum::<u32>();
        let offset = ReplayHeader::num_ticks_field_offset(self.signature_length) as u64;
        self.file.queue_seek(offset, WriteTag::None);
        self.file.queue_write(num_ticks.to_le_bytes().to_vec(), WriteTag::None);
        self.file.queue_set_read_only(WriteTag::Finalised);
        info!(path = %self.path.display(), num_ticks, "finalising replay file");
        Ok(())
    }

    /// Finalises, or closes without touching the header. A plain close
    /// waits for chunks already queued to land.
    pub fn close(&mut self, should_finalise: bool) -> ReplayResult<()> {
        if should_finalise {
            return self.finalise();
        }
        self.close_requested = true;
        if self.pending.is_empty() {
            self.close_writer();
        }
        Ok(())
    }

    fn close_writer(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_closed = true;
        self.lease = None;
        debug!(path = %self.path.display(), "replay writer closed");
    }

    /// Handles completions reported by the file writer.
    pub fn process_completions(&mut self) {
        for event in self.file.poll_completions() {
            self.on_file_event(event);
        }
    }

    /// Blocks until the file writer is idle, then handles completions.
    pub fn wait_idle(&mut self) {
        self.file.wait_idle();
        self.process_completions();
    }

    fn on_file_event(&mut self, event: FileEvent) {
        match event {
            FileEvent::Completed { position, tag: WriteTag::Chunk(seq) } => {
                match self.pending.pop_front() {
                    Some(chunk) if chunk.seq == seq => {
                        self.num_ticks_written += chunk.num_ticks;
                        self.last_tick_written = Some(chunk.last_tick);
                        self.last_chunk_position = position;
                        self.last_chunk_length = chunk.byte_len;
                        self.confirmed_signature = chunk.signature;
                    }
                    _ => {
                        self.fail(format!("chunk {} completed out of order", seq));
                        return;
                    }
                }
                if self.close_requested && self.pending.is_empty() {
                    self.close_writer();
                }
                self.notify_complete();
            }
            FileEvent::Completed { tag: WriteTag::Finalised, .. } => {
                self.close_writer();
                self.notify_complete();
            }
            FileEvent::Completed { tag: WriteTag::None, .. } => {}
            FileEvent::Failed { message, .. } => self.fail(message),
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_some() {
            return;
        }
        error!(path = %self.path.display(), %message, "replay writer failed");
        self.error = Some(message.clone());
        self.lease = None;
        let path = self.path.clone();
        for listener in &mut self.listeners {
            listener.on_error(&path, &message);
        }
    }

    fn notify_complete(&mut self) {
        let status = self.status();
        let path = self.path.clone();
        for listener in &mut self.listeners {
            listener.on_complete(&path, &status);
        }
    }
}

impl Drop for ReplayWriter {
    fn drop(&mut self) {
        if !self.buffered.is_empty() {
            info!(
                path = %self.path.display(),
                ticks = self.buffered.len(),
                "discarding buffered ticks that never reached a chunk"
            );
        }
        let path = self.path.clone();
        for listener in &mut self.listeners {
            listener.on_destroyed(&path);
        }
    }
}

fn check_scheme(scheme: &dyn ChecksumScheme) -> ReplayResult<()> {
    if scheme.is_good() {
        Ok(())
    } else {
        Err(ReplayError::Key(format!("Signing key error: {}", scheme.error_string())))
    }
}
