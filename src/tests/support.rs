// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Shared fixtures: a small deterministic scene and helpers to record it
//! to memory and play it back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::checksum::{replay_signer, signature::Ed25519Scheme};
use crate::config::{LoaderConfig, PlaybackConfig, WriterConfig};
use crate::controller::{EventLog, FileDisposition, ReplayController, ReplaySource};
use crate::format::{Direction, TickDataBuilder, Vector3};
use crate::format::ReplayMetaData;
use crate::loader::{MemoryFileProvider, TickLoader};
use crate::scheduler::InlineScheduler;
use crate::writer::{MemoryFile, MemoryFileWriter, ReplayWriter};

/// Ed25519 seed used by every test recording.
pub const PRIVATE_KEY: &str = "0707070707070707070707070707070707070707070707070707070707070707";

pub const DIGEST: [u8; 16] = [0xAB; 16];

pub fn public_key() -> String {
    Ed25519Scheme::from_signing_hex(PRIVATE_KEY)
        .verifying_key_hex()
        .unwrap()
}

/// Writer paths are exclusive process-wide, so every recording gets its own.
pub fn unique_path(prefix: &str) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    PathBuf::from(format!("mem://{}-{}", prefix, NEXT.fetch_add(1, Ordering::Relaxed)))
}

pub fn test_meta_data() -> ReplayMetaData {
    let mut meta = ReplayMetaData::new();
    meta.add("map", "arena");
    meta.add("recorder", "unit-tests");
    meta
}

/// Two entities in one space. Entity 1 flies, entity 2 walks; both move
/// every tick and the rest of the blocks are sprinkled deterministically.
#[derive(Debug, Clone)]
pub struct TestRecording {
    pub first_tick: u32,
    pub num_ticks: u32,
    pub config: WriterConfig,
}

impl TestRecording {
    pub fn new(first_tick: u32, num_ticks: u32) -> Self {
        Self {
            first_tick,
            num_ticks,
            config: WriterConfig {
                num_ticks_to_sign: 5,
                ..WriterConfig::default()
            },
        }
    }

    pub fn with_ticks_per_chunk(mut self, num_ticks_to_sign: u32) -> Self {
        self.config.num_ticks_to_sign = num_ticks_to_sign;
        self
    }

    /// Uncompressed block data for tick `index`.
    pub fn tick_data(&self, index: u32) -> Vec<u8> {
        let mut b = TickDataBuilder::new();
        if index == 0 {
            b.space_data(1, 0x10, "arena")
                .entity_create(0, 1, 7, Vector3::new(0.0, 10.0, 0.0), Direction::default(), b"hp=100")
                .entity_create(0, 2, 8, Vector3::new(5.0, 0.0, 5.0), Direction::default(), b"hp=50");
        }
        let f = index as f32;
        b.volatile(1, Vector3::new(f, 10.0, f * 2.0), Direction::new(f * 0.1, 0.0, 0.0), 0)
            .volatile_on_ground(2, 5.0 + f, 5.0 - f, Direction::new(0.0, 0.0, f * 0.01), 0);
        if index % 5 == 2 {
            b.method(1, 3, &index.to_le_bytes());
        }
        if index % 7 == 4 {
            b.property_change(2, index % 2 == 0, &[index as u8, 0xEE]);
        }
        if index == 3 {
            b.player_state_change(1, true, &[2]);
        }
        if index % 11 == 6 {
            b.aoi_change(1, 2, false).aoi_change(1, 2, true);
        }
        b.build()
    }

    pub fn game_times(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.num_ticks).map(move |i| self.first_tick + i)
    }
}

pub struct RecordedFile {
    pub path: PathBuf,
    pub file: MemoryFile,
    pub public_key: String,
}

/// Records `recording` in full and finalises the file.
pub fn record_to_memory(recording: &TestRecording) -> RecordedFile {
    let path = unique_path("recording");
    let file = MemoryFile::new();
    let mut writer = ReplayWriter::new(
        Box::new(MemoryFileWriter::new(&path, file.clone())),
        replay_signer(PRIVATE_KEY),
        &recording.config,
        DIGEST,
        &test_meta_data(),
    )
    .unwrap();
    for (index, game_time) in recording.game_times().enumerate() {
        writer
            .add_tick_data(game_time, 1, &recording.tick_data(index as u32))
            .unwrap();
    }
    writer.finalise().unwrap();
    writer.process_completions();
    assert!(writer.is_closed(), "recording did not close: {:?}", writer.error());
    RecordedFile {
        path,
        file,
        public_key: public_key(),
    }
}

pub struct Playback {
    pub scheduler: Arc<InlineScheduler>,
    pub provider: Arc<MemoryFileProvider>,
    pub controller: ReplayController<EventLog>,
}

impl Playback {
    pub fn of_file(recorded: &RecordedFile, config: &PlaybackConfig) -> Self {
        let scheduler = Arc::new(InlineScheduler::new());
        let provider = Arc::new(MemoryFileProvider::new());
        provider.insert(&recorded.path, recorded.file.clone());
        let loader = TickLoader::new(
            scheduler.clone(),
            provider.clone(),
            &recorded.path,
            &recorded.public_key,
            &LoaderConfig { read_block_size: 256 },
        );
        let controller = ReplayController::new(
            EventLog::new(),
            1,
            loader,
            ReplaySource::File,
            config,
            FileDisposition::Keep,
        );
        Self {
            scheduler,
            provider,
            controller,
        }
    }

    /// One frame: advance playback, then let background work finish.
    pub fn step(&mut self, time_delta: f64) {
        self.controller.tick(time_delta);
        self.scheduler.run_pending();
    }

    /// Steps with `time_delta` until `done` holds, up to `max_steps`.
    pub fn run_until(&mut self, time_delta: f64, max_steps: usize, done: impl Fn(&ReplayController<EventLog>) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(&self.controller) {
                return true;
            }
            self.step(time_delta);
        }
        done(&self.controller)
    }
}

/// Where the structures of a replay file sit.
#[derive(Debug)]
pub struct FileLayout {
    pub signature_length: usize,
    /// Header plus metadata.
    pub preamble_len: usize,
    /// Each chunk from its length prefix to the end of its signature.
    pub chunks: Vec<std::ops::Range<usize>>,
    pub ticks_per_chunk: Vec<usize>,
}

pub fn file_layout(bytes: &[u8]) -> FileLayout {
    use crate::codec::ByteReader;
    use crate::format::header::SIGNED_PREFIX_SIZE;
    use crate::format::{ReplayHeader, TickHeader, CHUNK_LENGTH_SIZE};

    let header_len = ReplayHeader::required_length(bytes).unwrap();
    let signature_length = header_len - SIGNED_PREFIX_SIZE - 4;
    let meta_len = ReplayMetaData::required_length(&bytes[header_len..], signature_length).unwrap();
    let preamble_len = header_len + meta_len;

    let mut chunks = Vec::new();
    let mut ticks_per_chunk = Vec::new();
    let mut pos = preamble_len;
    while pos < bytes.len() {
        let mut reader = ByteReader::new(&bytes[pos..]);
        let len = reader.u32().unwrap() as usize;
        let mut payload = ByteReader::new(reader.bytes(len).unwrap());
        let mut ticks = 0;
        while !payload.is_empty() {
            let tick = TickHeader::read(&mut payload).unwrap();
            payload.bytes(tick.data_len as usize).unwrap();
            ticks += 1;
        }
        let end = pos + CHUNK_LENGTH_SIZE + len + signature_length;
        chunks.push(pos..end);
        ticks_per_chunk.push(ticks);
        pos = end;
    }
    FileLayout {
        signature_length,
        preamble_len,
        chunks,
        ticks_per_chunk,
    }
}
