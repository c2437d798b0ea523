// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Incremental replay file parser.
//!
//! Bytes arrive in arbitrary fragments through [`ReplayReader::add_data`].
//! The reader advances header → metadata → chunks as far as the buffered
//! bytes allow and waits quietly for more when a structure is incomplete.
//!
//! Each `add_data` call is transactional: a snapshot of the parse state is
//! taken on entry and restored if the call fails, so a bad fragment never
//! leaves the counters half-updated. The error itself stays recorded.

use std::io::Read;
use tracing::{debug, trace};

use crate::checksum::{replay_verifier, ChecksumError, ChecksumReader, ChecksumScheme};
use crate::codec::ByteReader;
use crate::compression::decompress;
use crate::error::{ErrorKind, ReplayError, ReplayResult};
use crate::format::{ReplayHeader, ReplayMetaData, TickHeader, CHUNK_LENGTH_SIZE};

/// Callbacks from a [`ReplayReader`]. Returning `Err(message)` from a data
/// callback stops parsing with that message as the reader's error.
pub trait ReplayReaderListener {
    fn on_header(&mut self, _header: &ReplayHeader) -> Result<(), String> {
        Ok(())
    }

    fn on_meta_data(&mut self, _meta_data: &ReplayMetaData) -> Result<(), String> {
        Ok(())
    }

    /// `data` is still compressed when `is_compressed` is set.
    fn on_tick_data(&mut self, game_time: u32, is_compressed: bool, data: &[u8]) -> Result<(), String>;

    fn on_error(&mut self, _kind: ErrorKind, _message: &str) {}

    fn on_destroyed(&mut self) {}
}

/// Everything `add_data` may change, captured whole for rollback.
#[derive(Debug, Clone, Default)]
struct Progress {
    header: Option<ReplayHeader>,
    meta_data: Option<ReplayMetaData>,
    last_signature: Vec<u8>,
    next_chunk_length: usize,
    /// Offset of the first unparsed byte in the buffer.
    consumed: usize,
    first_game_time: Option<u32>,
    last_game_time: Option<u32>,
    num_ticks_read: u32,
    num_bytes_read: usize,
    num_chunks_read: u32,
    num_bytes_added: usize,
    verified_to_position: usize,
    num_chunks_verified: u32,
}

pub struct ReplayReader<L: ReplayReaderListener> {
    listener: L,
    scheme: Option<Box<dyn ChecksumScheme>>,
    should_decompress: bool,
    buffer: Vec<u8>,
    progress: Progress,
    last_error: Option<(ErrorKind, String)>,
}

fn active(scheme: &mut Option<Box<dyn ChecksumScheme>>, enabled: bool) -> Option<&mut dyn ChecksumScheme> {
    match scheme {
        Some(s) if enabled => Some(&mut **s),
        _ => None,
    }
}

impl<L: ReplayReaderListener> ReplayReader<L> {
    /// `scheme` of `None` disables verification entirely. Bytes before
    /// `verify_from_position` are trusted and their signatures skipped.
    pub fn new(
        listener: L,
        scheme: Option<Box<dyn ChecksumScheme>>,
        should_decompress: bool,
        verify_from_position: usize,
    ) -> Self {
        Self {
            listener,
            scheme,
            should_decompress,
            buffer: Vec::new(),
            progress: Progress {
                verified_to_position: verify_from_position,
                ..Progress::default()
            },
            last_error: None,
        }
    }

    /// Reader verifying against a hex-encoded public key. An empty key
    /// disables verification.
    pub fn with_verifying_key(
        listener: L,
        public_key_hex: &str,
        should_decompress: bool,
        verify_from_position: usize,
    ) -> Self {
        let scheme = (!public_key_hex.is_empty()).then(|| replay_verifier(public_key_hex));
        Self::new(listener, scheme, should_decompress, verify_from_position)
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_some()
    }

    pub fn last_error(&self) -> Option<(ErrorKind, &str)> {
        self.last_error.as_ref().map(|(k, m)| (*k, m.as_str()))
    }

    /// Forgets the recorded error. A failed signature check is also
    /// cleared from the scheme; bad key material is not.
    pub fn clear_error(&mut self) {
        self.last_error = None;
        if let Some(scheme) = self.scheme.as_mut() {
            if !matches!(scheme.last_error(), Some(ChecksumError::Key(_)) | None) {
                scheme.clear_error();
            }
        }
    }

    pub fn has_read_header(&self) -> bool {
        self.progress.header.is_some()
    }

    pub fn header(&self) -> Option<&ReplayHeader> {
        self.progress.header.as_ref()
    }

    pub fn has_read_meta_data(&self) -> bool {
        self.progress.meta_data.is_some()
    }

    pub fn meta_data(&self) -> Option<&ReplayMetaData> {
        self.progress.meta_data.as_ref()
    }

    pub fn first_game_time(&self) -> Option<u32> {
        self.progress.first_game_time
    }

    pub fn last_game_time(&self) -> Option<u32> {
        self.progress.last_game_time
    }

    pub fn num_ticks_read(&self) -> u32 {
        self.progress.num_ticks_read
    }

    /// Bytes fully parsed, signatures included.
    pub fn num_bytes_read(&self) -> usize {
        self.progress.num_bytes_read
    }

    pub fn num_chunks_read(&self) -> u32 {
        self.progress.num_chunks_read
    }

    pub fn num_bytes_added(&self) -> usize {
        self.progress.num_bytes_added
    }

    /// End offset of the last structure whose signature was checked.
    pub fn verified_to_position(&self) -> usize {
        self.progress.verified_to_position
    }

    pub fn num_chunks_verified(&self) -> u32 {
        self.progress.num_chunks_verified
    }

    pub fn signature_length(&self) -> Option<usize> {
        match (&self.progress.header, &self.scheme) {
            (Some(h), _) => Some(h.reported_signature_length as usize),
            (None, Some(s)) => Some(s.stream_size()),
            (None, None) => None,
        }
    }

    /// File offset of the header's tick count, once it can be known.
    pub fn num_ticks_field_offset(&self) -> Option<usize> {
        self.signature_length().map(ReplayHeader::num_ticks_field_offset)
    }

    /// Buffered bytes not yet parsed.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.progress.consumed..]
    }

    /// Starts over from an empty stream. The verified-to position is kept
    /// so a re-read of the same file skips what was already checked.
    pub fn reset(&mut self) {
        if let Some(scheme) = self.scheme.as_mut() {
            scheme.reset();
        }
        self.last_error = None;
        self.buffer.clear();
        self.progress = Progress {
            verified_to_position: self.progress.verified_to_position,
            ..Progress::default()
        };
    }

    /// Drops buffered but unparsed bytes. Parsed progress is untouched.
    pub fn clear_buffer(&mut self) {
        let unparsed = self.buffer.len() - self.progress.consumed;
        self.progress.num_bytes_added -= unparsed;
        self.buffer.clear();
        self.progress.consumed = 0;
        self.progress.next_chunk_length = 0;
    }

    pub fn add_data(&mut self, data: &[u8]) -> ReplayResult<()> {
        if let Some((kind, message)) = &self.last_error {
            return Err(ReplayError::from_kind(*kind, message.clone()));
        }

        if let Some(scheme) = self.scheme.as_ref() {
            if !scheme.is_good() {
                let reason = scheme.error_string();
                self.listener.on_error(ErrorKind::Key, &reason);
                let message = format!("Verifying key error: {}", reason);
                self.last_error = Some((ErrorKind::Key, message.clone()));
                return Err(ReplayError::Key(message));
            }
        }

        let checkpoint = self.progress.clone();
        let buffer_len = self.buffer.len();
        self.progress.num_bytes_added += data.len();
        self.buffer.extend_from_slice(data);

        match self.advance() {
            Ok(()) => {
                self.compact();
                Ok(())
            }
            Err(e) => {
                self.buffer.truncate(buffer_len);
                self.progress = checkpoint;
                Err(e)
            }
        }
    }

    fn compact(&mut self) {
        if self.progress.consumed > 0 {
            self.buffer.drain(..self.progress.consumed);
            self.progress.consumed = 0;
        }
    }

    fn advance(&mut self) -> ReplayResult<()> {
        if self.progress.header.is_none() && !self.read_header()? {
            return Ok(());
        }
        if self.progress.meta_data.is_none() && !self.read_meta_data()? {
            return Ok(());
        }
        while self.read_next_chunk_length()? {
            self.read_next_chunk()?;
        }
        Ok(())
    }

    /// Records a fatal error and notifies the listener.
    fn fail(&mut self, kind: ErrorKind, message: String) -> ReplayError {
        self.listener.on_error(kind, &message);
        self.record(kind, message)
    }

    fn record(&mut self, kind: ErrorKind, message: String) -> ReplayError {
        self.last_error = Some((kind, message.clone()));
        ReplayError::from_kind(kind, message)
    }

    fn read_error(&mut self, message: String) -> ReplayError {
        let kind = match self.scheme.as_ref() {
            Some(s) if !s.is_good() => ErrorKind::SignatureMismatch,
            _ => ErrorKind::Corrupted,
        };
        self.fail(kind, message)
    }

    fn prime_scheme(&mut self) {
        if let Some(scheme) = self.scheme.as_mut() {
            scheme.reset();
            scheme.read_blob(&self.progress.last_signature);
        }
    }

    fn read_header(&mut self) -> ReplayResult<bool> {
        let start = self.progress.consumed;
        let pending = &self.buffer[start..];
        let size = match ReplayHeader::required_length(pending) {
            Some(n) if pending.len() >= n => n,
            _ => return Ok(false),
        };

        let should_verify = self.scheme.is_some() && size >= self.progress.verified_to_position;
        if let Some(scheme) = self.scheme.as_mut() {
            scheme.reset();
        }

        let parsed = ReplayHeader::read(
            &self.buffer[start..start + size],
            active(&mut self.scheme, should_verify),
        );
        let (header, signature, _) = match parsed {
            Ok(p) => p,
            Err(e @ ReplayError::UnsupportedVersion { .. }) => {
                let message = format!("Failed to read header: {}", e);
                self.listener.on_error(ErrorKind::UnsupportedVersion, &message);
                self.last_error = Some((ErrorKind::UnsupportedVersion, message));
                return Err(e);
            }
            Err(e) => return Err(self.read_error(format!("Failed to read header: {}", e))),
        };

        self.progress.last_signature = signature;
        self.progress.consumed += size;
        self.progress.num_bytes_read += size;
        self.progress.num_chunks_read += 1;
        if should_verify {
            self.progress.num_chunks_verified += 1;
            self.progress.verified_to_position = size;
        }
        debug!(
            version = %header.version,
            num_ticks = header.num_ticks,
            verified = should_verify,
            "replay header read"
        );

        let verdict = self.listener.on_header(&header);
        self.progress.header = Some(header);
        verdict.map_err(|message| self.record(ErrorKind::Rejected, message))?;
        Ok(true)
    }

    fn read_meta_data(&mut self) -> ReplayResult<bool> {
        let sig_len = self.signature_length().unwrap_or(0);
        let start = self.progress.consumed;
        let pending = &self.buffer[start..];
        let size = match ReplayMetaData::required_length(pending, sig_len) {
            Some(n) if pending.len() >= n => n,
            _ => return Ok(false),
        };

        let end_offset = self.progress.num_bytes_read + size;
        let should_verify = self.scheme.is_some() && end_offset >= self.progress.verified_to_position;
        if should_verify {
            self.prime_scheme();
        }

        let parsed = ReplayMetaData::read(
            &self.buffer[start..start + size],
            sig_len,
            active(&mut self.scheme, should_verify),
        );
        let (meta_data, signature, _) = match parsed {
            Ok(p) => p,
            Err(e) => return Err(self.read_error(format!("Failed to read meta-data: {}", e))),
        };

        self.progress.last_signature = signature;
        self.progress.consumed += size;
        self.progress.num_bytes_read += size;
        self.progress.num_chunks_read += 1;
        if should_verify {
            self.progress.num_chunks_verified += 1;
            self.progress.verified_to_position = end_offset;
        }

        let verdict = self.listener.on_meta_data(&meta_data);
        self.progress.meta_data = Some(meta_data);
        verdict.map_err(|message| self.record(ErrorKind::Rejected, message))?;
        Ok(true)
    }

    /// True once a whole chunk is buffered.
    fn read_next_chunk_length(&mut self) -> ReplayResult<bool> {
        let pending = self.buffer.len() - self.progress.consumed;
        if self.progress.next_chunk_length == 0 {
            if pending < CHUNK_LENGTH_SIZE {
                return Ok(false);
            }
            let length = ByteReader::new(&self.buffer[self.progress.consumed..]).u32()?;
            if length == 0 {
                return Err(self.fail(ErrorKind::Corrupted, "Got zero chunk length".into()));
            }
            self.progress.next_chunk_length = length as usize;
        }
        let sig_len = self.signature_length().unwrap_or(0);
        Ok(pending >= CHUNK_LENGTH_SIZE + self.progress.next_chunk_length + sig_len)
    }

    fn read_next_chunk(&mut self) -> ReplayResult<()> {
        let chunk_length = self.progress.next_chunk_length;
        let sig_len = self.signature_length().unwrap_or(0);
        let start = self.progress.consumed;
        let signed_len = CHUNK_LENGTH_SIZE + chunk_length;

        let should_verify = self.scheme.is_some()
            && self.progress.num_bytes_read + signed_len >= self.progress.verified_to_position;
        if should_verify {
            self.prime_scheme();
        }

        let mut signed = vec![0u8; signed_len];
        let mut signature = Vec::new();
        let verified = {
            let chunk = &self.buffer[start..start + signed_len + sig_len];
            let mut reader = ChecksumReader::new(chunk, active(&mut self.scheme, should_verify), false);
            reader.read_exact(&mut signed)?;
            reader.verify(Some(&mut signature))
        };
        self.progress.num_bytes_read += signed_len;

        if !verified {
            let reason = self
                .scheme
                .as_ref()
                .map(|s| s.error_string())
                .unwrap_or_default();
            self.listener.on_error(ErrorKind::SignatureMismatch, &reason);
            return Err(self.record(
                ErrorKind::SignatureMismatch,
                format!("Error reading chunk: {}", reason),
            ));
        }

        if should_verify {
            self.progress.verified_to_position = self.progress.num_bytes_read;
            self.progress.num_chunks_verified += 1;
            metrics::increment_counter!("tickvault_chunks_verified_total");
        } else {
            let sig_start = start + signed_len;
            signature = self.buffer[sig_start..sig_start + sig_len].to_vec();
        }
        self.progress.last_signature = signature;

        self.progress.num_bytes_read += sig_len;
        self.progress.num_chunks_read += 1;
        self.progress.next_chunk_length = 0;
        self.progress.consumed += signed_len + sig_len;
        trace!(chunk_length, verified = should_verify, "chunk read");

        self.read_tick_data(&signed[CHUNK_LENGTH_SIZE..])
    }

    fn read_tick_data(&mut self, payload: &[u8]) -> ReplayResult<()> {
        let mut reader = ByteReader::new(payload);
        let reported_ticks = self.progress.header.as_ref().map_or(0, |h| h.num_ticks);

        while !reader.is_empty() {
            let tick = match TickHeader::read(&mut reader) {
                Ok(t) if t.data_len as usize <= reader.remaining() => t,
                _ => {
                    return Err(self.fail(
                        ErrorKind::Corrupted,
                        "Could not read game time data header".into(),
                    ))
                }
            };

            if let Some(last) = self.progress.last_game_time {
                if Some(tick.game_time) != last.checked_add(1) {
                    return Err(self.fail(ErrorKind::Corrupted, "Game time mismatch".into()));
                }
            }

            if reported_ticks != 0 && self.progress.num_ticks_read == reported_ticks {
                return Err(self.fail(ErrorKind::Corrupted, "Extraneous tick data".into()));
            }

            self.progress.first_game_time.get_or_insert(tick.game_time);
            self.progress.last_game_time = Some(tick.game_time);
            self.progress.num_ticks_read += 1;

            let data = reader.bytes(tick.data_len as usize)?;
            let verdict = if self.should_decompress && !data.is_empty() {
                match decompress(data) {
                    Ok(plain) => self.listener.on_tick_data(tick.game_time, false, &plain),
                    Err(_) => {
                        return Err(self.fail(
                            ErrorKind::Corrupted,
                            "Could not decompress tick data".into(),
                        ))
                    }
                }
            } else {
                self.listener
                    .on_tick_data(tick.game_time, !self.should_decompress, data)
            };
            verdict.map_err(|message| self.record(ErrorKind::Rejected, message))?;
        }
        Ok(())
    }
}

impl<L: ReplayReaderListener> Drop for ReplayReader<L> {
    fn drop(&mut self) {
        self.listener.on_destroyed();
    }
}

/// Listener that keeps every tick in memory. Used by tools and tests.
#[derive(Debug, Default)]
pub struct CollectingListener {
    pub ticks: Vec<(u32, Vec<u8>)>,
    pub errors: Vec<(ErrorKind, String)>,
}

impl ReplayReaderListener for CollectingListener {
    fn on_tick_data(&mut self, game_time: u32, _is_compressed: bool, data: &[u8]) -> Result<(), String> {
        self.ticks.push((game_time, data.to_vec()));
        Ok(())
    }

    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        self.errors.push((kind, message.to_string()));
    }
}
