// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Recording to real files on worker threads and playing them back.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tickvault::checksum::signature::Ed25519Scheme;
use tickvault::controller::{EventLog, PlaybackEvent};
use tickvault::format::{Direction, TickDataBuilder, Vector3};
use tickvault::loader::StdFileProvider;
use tickvault::reader::CollectingListener;
use tickvault::scheduler::ThreadScheduler;
use tickvault::writer::WriterPool;
use tickvault::{
    replay_signer, FileDisposition, LoaderConfig, PlaybackConfig, RecoveryData, ReplayController, ReplayMetaData,
    ReplayReader, ReplaySource, ReplayWriter, TickLoader, WriterConfig,
};

const SEED: &str = "1313131313131313131313131313131313131313131313131313131313131313";

fn public_key() -> String {
    Ed25519Scheme::from_signing_hex(SEED).verifying_key_hex().unwrap()
}

fn config() -> WriterConfig {
    WriterConfig {
        num_ticks_to_sign: 4,
        ..WriterConfig::default()
    }
}

fn meta_data() -> ReplayMetaData {
    let mut meta = ReplayMetaData::new();
    meta.add("map", "harbour");
    meta
}

fn tick_data(index: u32) -> Vec<u8> {
    let mut b = TickDataBuilder::new();
    if index == 0 {
        b.space_data(1, 0x01, "harbour")
            .entity_create(0, 9, 3, Vector3::default(), Direction::default(), b"boat");
    }
    b.volatile(9, Vector3::new(index as f32, 0.0, 0.0), Direction::default(), 0);
    b.build()
}

fn record(writer: &mut ReplayWriter, ticks: std::ops::Range<u32>) {
    for i in ticks {
        writer.add_tick_data(100 + i, 1, &tick_data(i)).unwrap();
        writer.process_completions();
    }
}

fn read_back(path: &Path) -> ReplayReader<CollectingListener> {
    let bytes = std::fs::read(path).unwrap();
    let mut reader = ReplayReader::with_verifying_key(CollectingListener::default(), &public_key(), true, 0);
    reader.add_data(&bytes).unwrap();
    reader
}

#[test]
fn test_recording_is_finalised_read_only_and_plays_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("match.tvr");

    let mut writer = ReplayWriter::create(&path, replay_signer(SEED), &config(), [1; 16], &meta_data()).unwrap();
    assert!(tickvault::writer::exists_for_path(&path));
    record(&mut writer, 0..30);
    writer.finalise().unwrap();
    writer.wait_idle();
    assert!(writer.is_closed());
    assert!(!writer.has_error());
    assert!(!tickvault::writer::exists_for_path(&path));
    drop(writer);

    assert!(std::fs::metadata(&path).unwrap().permissions().readonly());
    let reader = read_back(&path);
    assert_eq!(reader.header().unwrap().num_ticks, 30);
    assert_eq!(reader.listener().ticks[7], (107, tick_data(7)));

    let scheduler = Arc::new(ThreadScheduler::new(2));
    let loader = TickLoader::new(
        scheduler.clone(),
        Arc::new(StdFileProvider),
        &path,
        public_key(),
        &LoaderConfig { read_block_size: 512 },
    );
    let mut controller = ReplayController::new(
        EventLog::new(),
        1,
        loader,
        ReplaySource::File,
        &PlaybackConfig::default(),
        FileDisposition::Remove,
    );

    for _ in 0..5000 {
        controller.tick(0.1);
        if controller.handler().events.contains(&PlaybackEvent::Finish) || controller.is_destroyed() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let played: Vec<u32> = controller
        .handler()
        .events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::PostTick(t) => Some(*t),
            _ => None,
        })
        .collect();
    assert_eq!(played, (0..30).collect::<Vec<_>>());
    assert_eq!(controller.current_tick_time(), Some(130));

    drop(controller);
    assert!(!path.exists());
}

#[test]
fn test_crashed_recording_resumes_from_recovery_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("crash.tvr");

    let stored = {
        let mut writer = ReplayWriter::create(&path, replay_signer(SEED), &config(), [2; 16], &meta_data()).unwrap();
        record(&mut writer, 0..10);
        writer.wait_idle();
        // Ticks 8 and 9 are still buffered when the process goes away.
        writer.recovery_data().to_string()
    };
    assert!(!tickvault::writer::exists_for_path(&path));

    let recovery: RecoveryData = stored.parse().unwrap();
    assert_eq!(recovery.num_ticks_written, 8);
    assert_eq!(recovery.last_tick_written, Some(107));

    let mut writer = ReplayWriter::recover_file(&path, replay_signer(SEED), &recovery).unwrap();
    record(&mut writer, 8..20);
    writer.finalise().unwrap();
    writer.wait_idle();
    assert!(writer.is_closed());

    let reader = read_back(&path);
    assert_eq!(reader.header().unwrap().num_ticks, 20);
    assert_eq!(reader.num_ticks_read(), 20);
    assert_eq!(reader.last_game_time(), Some(119));
    assert_eq!(reader.verified_to_position(), std::fs::metadata(&path).unwrap().len() as usize);
}

#[test]
fn test_recover_file_requires_the_file() {
    let dir = tempdir().unwrap();
    let recovery = RecoveryData {
        compression: tickvault::Compression::None,
        num_ticks_written: 0,
        last_tick_written: None,
        next_chunk_position: 0,
        last_signature: vec![0; 64],
        num_ticks_to_sign: 4,
    };
    let err = ReplayWriter::recover_file(dir.path().join("gone.tvr"), replay_signer(SEED), &recovery)
        .err()
        .unwrap();
    assert_eq!(err.kind(), tickvault::ErrorKind::FileMissing);
}

#[test]
fn test_pool_finalises_every_writer() {
    let dir = tempdir().unwrap();
    let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("space-{}.tvr", i))).collect();

    let mut pool = WriterPool::new();
    for (i, path) in paths.iter().enumerate() {
        let mut writer = ReplayWriter::create(path, replay_signer(SEED), &config(), [3; 16], &meta_data()).unwrap();
        record(&mut writer, 0..(5 + i as u32 * 3));
        pool.add(writer);
    }
    assert!(ReplayWriter::create(&paths[0], replay_signer(SEED), &config(), [3; 16], &meta_data()).is_err());

    pool.close_all(true).unwrap();
    assert_eq!(pool.wait_idle(), 0);
    assert!(pool.is_empty());

    for (i, path) in paths.iter().enumerate() {
        let reader = read_back(path);
        assert_eq!(reader.header().unwrap().num_ticks, 5 + i as u32 * 3);
    }
}

#[test]
fn test_second_recorder_leaves_the_file_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("busy.tvr");

    let mut writer = ReplayWriter::create(&path, replay_signer(SEED), &config(), [4; 16], &meta_data()).unwrap();
    record(&mut writer, 0..8);
    writer.wait_idle();
    let written = std::fs::metadata(&path).unwrap().len();
    assert!(written > 0);

    let err = ReplayWriter::create(&path, replay_signer(SEED), &config(), [4; 16], &meta_data())
        .err()
        .unwrap();
    assert!(matches!(err, tickvault::ReplayError::PathInUse(_)));
    let recovery = writer.recovery_data();
    assert!(ReplayWriter::recover_file(&path, replay_signer(SEED), &recovery).is_err());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), written);

    writer.finalise().unwrap();
    writer.wait_idle();
    assert_eq!(read_back(&path).header().unwrap().num_ticks, 8);
}
