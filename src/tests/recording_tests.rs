// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Writer output read back through the streaming reader.

use crate::checksum::replay_signer;
use crate::compression::Compression;
use crate::config::WriterConfig;
use crate::error::ErrorKind;
use crate::reader::{CollectingListener, ReplayReader};
use crate::tests::support::*;
use crate::writer::{MemoryFile, MemoryFileWriter, RecoveryData, ReplayWriter, MAX_GAME_TIME};

fn read_all(bytes: &[u8], key: &str) -> ReplayReader<CollectingListener> {
    let mut reader = ReplayReader::with_verifying_key(CollectingListener::default(), key, true, 0);
    reader.add_data(bytes).unwrap();
    reader
}

fn new_writer(file: &MemoryFile, config: &WriterConfig) -> ReplayWriter {
    ReplayWriter::new(
        Box::new(MemoryFileWriter::new(unique_path("writer"), file.clone())),
        replay_signer(PRIVATE_KEY),
        config,
        DIGEST,
        &test_meta_data(),
    )
    .unwrap()
}

#[test]
fn test_recorded_ticks_read_back_verified() {
    let recording = TestRecording::new(0, 23);
    let recorded = record_to_memory(&recording);
    let reader = read_all(&recorded.file.contents(), &recorded.public_key);

    let header = reader.header().unwrap();
    assert_eq!(header.num_ticks, 23);
    assert_eq!(header.digest, DIGEST);
    assert_eq!(reader.meta_data().unwrap().get("map"), Some("arena"));

    let ticks = &reader.listener().ticks;
    assert_eq!(ticks.len(), 23);
    for (i, (game_time, data)) in ticks.iter().enumerate() {
        assert_eq!(*game_time, i as u32);
        assert_eq!(data, &recording.tick_data(i as u32));
    }
    assert_eq!(reader.verified_to_position(), recorded.file.len());
    assert!(recorded.file.is_read_only());
}

#[test]
fn test_ticks_are_grouped_into_chunks_of_configured_size() {
    let recording = TestRecording::new(40, 80).with_ticks_per_chunk(7);
    let recorded = record_to_memory(&recording);
    let layout = file_layout(&recorded.file.contents());

    assert_eq!(layout.chunks.len(), 12);
    assert!(layout.ticks_per_chunk[..11].iter().all(|&n| n == 7));
    assert_eq!(layout.ticks_per_chunk[11], 3);

    let reader = read_all(&recorded.file.contents(), &recorded.public_key);
    // Header and metadata count as signed structures too.
    assert_eq!(reader.num_chunks_verified(), 14);
    assert_eq!(reader.first_game_time(), Some(40));
    assert_eq!(reader.last_game_time(), Some(119));
}

#[test]
fn test_every_compression_reads_back() {
    for compression in [Compression::None, Compression::Lz4, Compression::Zstd { level: 3 }] {
        let mut recording = TestRecording::new(0, 9);
        recording.config.compression = compression;
        let recorded = record_to_memory(&recording);
        let reader = read_all(&recorded.file.contents(), &recorded.public_key);
        let ticks = &reader.listener().ticks;
        assert_eq!(ticks.len(), 9, "{:?}", compression);
        assert_eq!(ticks[4].1, recording.tick_data(4), "{:?}", compression);
    }
}

#[test]
fn test_tampered_chunk_stops_at_that_chunk() {
    let recorded = record_to_memory(&TestRecording::new(0, 20));
    let mut bytes = recorded.file.contents();
    let layout = file_layout(&bytes);
    // Last payload byte of the third chunk.
    let target = layout.chunks[2].end - layout.signature_length - 1;
    bytes[target] ^= 0x40;

    let mut reader = ReplayReader::with_verifying_key(CollectingListener::default(), &recorded.public_key, true, 0);
    let mut failure = None;
    for fragment in bytes.chunks(64) {
        if let Err(e) = reader.add_data(fragment) {
            failure = Some(e);
            break;
        }
    }
    let failure = failure.expect("tampering went unnoticed");
    assert_eq!(failure.kind(), ErrorKind::SignatureMismatch);
    assert_eq!(reader.num_ticks_read(), 10);
    assert_eq!(reader.listener().ticks.len(), 10);
    assert_eq!(reader.listener().errors.len(), 1);
}

#[test]
fn test_wrong_key_rejects_header() {
    let recorded = record_to_memory(&TestRecording::new(0, 5));
    let other = crate::checksum::signature::Ed25519Scheme::from_signing_hex(
        "0808080808080808080808080808080808080808080808080808080808080808",
    )
    .verifying_key_hex()
    .unwrap();
    let mut reader = ReplayReader::with_verifying_key(CollectingListener::default(), &other, true, 0);
    let err = reader.add_data(&recorded.file.contents()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    assert!(reader.header().is_none());
}

#[test]
fn test_missing_ticks_are_filled_and_shards_merge() {
    let file = MemoryFile::new();
    let mut writer = new_writer(&file, &WriterConfig::default());

    // An empty first tick is ignored.
    writer.add_tick_data(4, 1, &[]).unwrap();
    writer.add_tick_data(5, 2, b"a1").unwrap();
    // Tick 6 never arrives; tick 7 completing also completes tick 5.
    writer.add_tick_data(7, 1, b"c").unwrap();
    // Already written: dropped.
    writer.add_tick_data(5, 2, b"a2").unwrap();
    writer.add_tick_data(8, 3, b"d1").unwrap();
    writer.add_tick_data(8, 3, b"d2").unwrap();
    writer.add_tick_data(8, 3, b"d3").unwrap();
    writer.finalise().unwrap();
    writer.process_completions();
    assert!(writer.is_closed());

    let public = public_key();
    let reader = read_all(&file.contents(), &public);
    let ticks: Vec<(u32, Vec<u8>)> = reader.listener().ticks.clone();
    assert_eq!(
        ticks,
        vec![
            (5, b"a1".to_vec()),
            (6, Vec::new()),
            (7, b"c".to_vec()),
            (8, b"d1d2d3".to_vec()),
        ]
    );
    assert_eq!(reader.header().unwrap().num_ticks, 4);
}

#[test]
fn test_game_time_zero_is_a_real_first_tick() {
    let file = MemoryFile::new();
    let mut writer = new_writer(&file, &WriterConfig::default());
    writer.add_tick_data(0, 1, b"zero").unwrap();
    writer.add_tick_data(1, 1, b"one").unwrap();
    writer.finalise().unwrap();
    writer.process_completions();

    let reader = read_all(&file.contents(), &public_key());
    assert_eq!(reader.first_game_time(), Some(0));
    assert_eq!(reader.listener().ticks[0], (0, b"zero".to_vec()));
}

#[test]
fn test_recovery_tracks_only_confirmed_chunks() {
    let recording = TestRecording::new(0, 5);
    let file = MemoryFile::new();
    let mut writer = new_writer(&file, &recording.config);
    for i in 0..5 {
        writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
    }
    assert_eq!(writer.num_chunks_pending(), 1);
    let before = writer.recovery_data();
    assert_eq!(before.num_ticks_written, 0);
    assert_eq!(before.last_tick_written, None);

    writer.process_completions();
    let after = writer.recovery_data();
    assert_eq!(after.num_ticks_written, 5);
    assert_eq!(after.last_tick_written, Some(4));
    assert_eq!(after.next_chunk_position, file.len() as u64);
    assert_ne!(after.last_signature, before.last_signature);
}

#[test]
fn test_resumed_writer_continues_the_signature_chain() {
    let recording = TestRecording::new(0, 20);
    let file = MemoryFile::new();
    let path = unique_path("resume");

    let stored = {
        let mut writer = ReplayWriter::new(
            Box::new(MemoryFileWriter::new(&path, file.clone())),
            replay_signer(PRIVATE_KEY),
            &recording.config,
            DIGEST,
            &test_meta_data(),
        )
        .unwrap();
        for i in 0..12 {
            writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
        }
        writer.process_completions();
        // Ticks 10 and 11 are still buffered when the process dies.
        writer.recovery_data().to_string()
    };

    let recovery: RecoveryData = stored.parse().unwrap();
    assert_eq!(recovery.num_ticks_written, 10);
    assert_eq!(recovery.next_tick(), Some(10));

    let mut writer = ReplayWriter::recover(
        Box::new(MemoryFileWriter::new(&path, file.clone())),
        replay_signer(PRIVATE_KEY),
        &recovery,
    )
    .unwrap();
    // Late data for a tick already on disk is dropped.
    writer.add_tick_data(9, 1, b"stale").unwrap();
    for i in 10..20 {
        writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
    }
    writer.finalise().unwrap();
    writer.process_completions();
    assert!(writer.is_closed());
    assert_eq!(writer.num_ticks_written(), 20);

    let reader = read_all(&file.contents(), &public_key());
    assert_eq!(reader.header().unwrap().num_ticks, 20);
    let ticks = &reader.listener().ticks;
    assert_eq!(ticks.len(), 20);
    assert_eq!(ticks[15].1, recording.tick_data(15));
    assert_eq!(reader.verified_to_position(), file.len());
}

#[test]
fn test_recovery_with_wrong_scheme_size_is_rejected() {
    let recovery = RecoveryData {
        compression: Compression::None,
        num_ticks_written: 3,
        last_tick_written: Some(2),
        next_chunk_position: 200,
        last_signature: vec![0; 4],
        num_ticks_to_sign: 5,
    };
    let result = ReplayWriter::recover(
        Box::new(MemoryFileWriter::new(unique_path("bad-recovery"), MemoryFile::new())),
        replay_signer(PRIVATE_KEY),
        &recovery,
    );
    assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::Key));
}

#[test]
fn test_closing_without_finalise_leaves_tick_count_zero() {
    let recording = TestRecording::new(0, 10);
    let file = MemoryFile::new();
    let mut writer = new_writer(&file, &recording.config);
    for i in 0..10 {
        writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
    }
    writer.close(false).unwrap();
    assert!(!writer.is_closed());
    writer.process_completions();
    assert!(writer.is_closed());
    assert!(!file.is_read_only());

    let reader = read_all(&file.contents(), &public_key());
    assert!(reader.header().unwrap().is_live());
    assert_eq!(reader.num_ticks_read(), 10);
}

#[test]
fn test_recovery_cuts_off_chunks_written_after_the_checkpoint() {
    let recording = TestRecording::new(0, 20);
    let file = MemoryFile::new();
    let path = unique_path("stale-tail");

    let recovery = {
        let mut writer = ReplayWriter::new(
            Box::new(MemoryFileWriter::new(&path, file.clone())),
            replay_signer(PRIVATE_KEY),
            &recording.config,
            DIGEST,
            &test_meta_data(),
        )
        .unwrap();
        for i in 0..10 {
            writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
        }
        writer.process_completions();
        let checkpoint = writer.recovery_data();
        // Two more chunks land on disk after the checkpoint was stored.
        for i in 10..20 {
            writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
        }
        writer.process_completions();
        checkpoint
    };
    let crashed_len = file.len();
    assert!(crashed_len as u64 > recovery.next_chunk_position);

    let mut writer = ReplayWriter::recover(
        Box::new(MemoryFileWriter::new(&path, file.clone())),
        replay_signer(PRIVATE_KEY),
        &recovery,
    )
    .unwrap();
    for i in 10..12 {
        writer.add_tick_data(i, 1, &recording.tick_data(i)).unwrap();
    }
    writer.finalise().unwrap();
    writer.process_completions();
    assert!(writer.is_closed());
    assert!(file.len() < crashed_len);

    let reader = read_all(&file.contents(), &public_key());
    assert_eq!(reader.header().unwrap().num_ticks, 12);
    assert_eq!(reader.num_ticks_read(), 12);
    assert!(reader.pending().is_empty());
    assert_eq!(reader.verified_to_position(), file.len());
}

#[test]
fn test_last_game_time_is_refused_without_failing_the_writer() {
    let recording = TestRecording::new(MAX_GAME_TIME - 2, 3);
    let file = MemoryFile::new();
    let mut writer = new_writer(&file, &recording.config);
    for (index, game_time) in recording.game_times().enumerate() {
        writer.add_tick_data(game_time, 1, &recording.tick_data(index as u32)).unwrap();
    }

    let err = writer.add_tick_data(u32::MAX, 1, b"past the end").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert!(!writer.has_error());

    writer.finalise().unwrap();
    writer.process_completions();
    assert!(writer.is_closed());
    let reader = read_all(&file.contents(), &public_key());
    assert_eq!(reader.num_ticks_read(), 3);
    assert_eq!(reader.last_game_time(), Some(MAX_GAME_TIME));
}
