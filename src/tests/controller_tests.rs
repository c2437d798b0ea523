// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Playback of recorded files: pacing, seeking and the memory window.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::checksum::replay_signer;
use crate::config::{LoaderConfig, PlaybackConfig, WriterConfig};
use crate::controller::{EventLog, FileDisposition, PlaybackEvent, PlaybackState, ReplayController, ReplaySource};
use crate::format::{Direction, EntityId, TickDataBuilder, Vector3};
use crate::loader::{MemoryFileProvider, TickLoader};
use crate::scheduler::InlineScheduler;
use crate::tests::support::*;
use crate::writer::{MemoryFile, MemoryFileWriter, ReplayWriter};

fn post_ticks(events: &[PlaybackEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::PostTick(t) => Some(*t),
            _ => None,
        })
        .collect()
}

fn count(events: &[PlaybackEvent], wanted: &PlaybackEvent) -> usize {
    events.iter().filter(|e| *e == wanted).count()
}

/// Everything that changes the world, in order.
fn non_moves(events: &[PlaybackEvent]) -> Vec<PlaybackEvent> {
    events.iter().filter(|e| !e.is_move()).cloned().collect()
}

/// Last reported position of every entity.
fn positions(events: &[PlaybackEvent]) -> BTreeMap<EntityId, (Vector3, Direction)> {
    let mut world = BTreeMap::new();
    for event in events {
        match event {
            PlaybackEvent::EntityCreate { entity_id, position, direction, .. }
            | PlaybackEvent::EntityMove { entity_id, position, direction, .. } => {
                world.insert(*entity_id, (*position, *direction));
            }
            PlaybackEvent::EntitiesReset => world.clear(),
            _ => {}
        }
    }
    world
}

/// Requests the header and lets the first append land.
fn start(playback: &mut Playback) {
    playback.step(0.0);
    playback.step(0.0);
    assert_eq!(playback.controller.state(), PlaybackState::Playing);
}

#[test]
fn test_plays_every_tick_in_order_then_finishes_once() {
    let recorded = record_to_memory(&TestRecording::new(500, 30));
    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    assert_eq!(playback.controller.state(), PlaybackState::Idle);

    playback.step(0.0);
    assert_eq!(playback.controller.state(), PlaybackState::AwaitingHeader);
    playback.step(0.0);
    assert_eq!(playback.controller.update_frequency(), 10);
    assert_eq!(playback.controller.num_ticks_total(), 30);
    assert_eq!(playback.controller.current_tick_time(), Some(500));

    assert!(playback.run_until(0.1, 100, |c| c.current_tick() == 30));
    for _ in 0..3 {
        playback.step(0.1);
    }

    let events = &playback.controller.handler().events;
    assert_eq!(events[0], PlaybackEvent::Header { num_ticks: 30 });
    assert_eq!(events[1], PlaybackEvent::MetaData { entries: 2 });
    assert!(matches!(events[2], PlaybackEvent::SpaceData { entry_id: 1, key: 0x10, .. }));
    assert_eq!(post_ticks(events), (0..30).collect::<Vec<_>>());
    assert_eq!(count(events, &PlaybackEvent::Finish), 1);
    assert_eq!(events.last(), Some(&PlaybackEvent::Finish));
    assert_eq!(playback.controller.current_tick_time(), Some(530));
    assert_eq!(playback.controller.current_tick_time_in_seconds(), Some(53.0));
}

#[test]
fn test_block_events_reach_the_handler() {
    let recorded = record_to_memory(&TestRecording::new(0, 8));
    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    assert!(playback.run_until(1.0, 20, |c| c.current_tick() == 8));

    let events = &playback.controller.handler().events;
    assert!(events.contains(&PlaybackEvent::EntityCreate {
        entity_id: 1,
        entity_type: 7,
        vehicle_id: 0,
        position: Vector3::new(0.0, 10.0, 0.0),
        direction: Direction::default(),
        properties: b"hp=100".to_vec(),
    }));
    assert!(events.contains(&PlaybackEvent::EntityMethod {
        entity_id: 1,
        message_id: 3,
        data: 2u32.to_le_bytes().to_vec(),
    }));
    assert!(events.contains(&PlaybackEvent::EntityProperty {
        entity_id: 2,
        is_slice: true,
        data: vec![4, 0xEE],
    }));
    assert!(events.contains(&PlaybackEvent::PlayerStateChange {
        player_id: 1,
        has_become_player: true,
    }));
    assert!(events.contains(&PlaybackEvent::AoiChange {
        player_id: 1,
        entity_id: 2,
        has_entered: true,
    }));
    // Moves during normal play are volatile.
    assert!(events
        .iter()
        .all(|e| !matches!(e, PlaybackEvent::EntityMove { is_volatile: false, .. })));
}

#[test]
fn test_pause_resume_and_speed() {
    let recorded = record_to_memory(&TestRecording::new(0, 60));
    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    playback.step(0.0);
    assert_eq!(playback.controller.current_tick(), 1);

    playback.step(0.5);
    assert_eq!(playback.controller.current_tick(), 6);

    playback.controller.pause();
    assert_eq!(playback.controller.state(), PlaybackState::Paused);
    playback.step(5.0);
    assert_eq!(playback.controller.current_tick(), 6);

    playback.controller.resume();
    playback.controller.set_speed_scale(2.0);
    playback.step(0.5);
    assert_eq!(playback.controller.current_tick(), 16);
}

#[test]
fn test_forward_seek_matches_plain_playback() {
    let recorded = record_to_memory(&TestRecording::new(0, 30));

    let mut plain = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut plain);
    assert!(plain.run_until(0.1, 50, |c| c.current_tick() == 12));
    let plain_events = plain.controller.handler_mut().take();

    let mut seeking = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut seeking);
    assert!(seeking.controller.set_current_tick(12));
    assert!(seeking.controller.is_seeking());
    seeking.step(0.0);
    assert_eq!(seeking.controller.current_tick(), 12);
    assert!(!seeking.controller.is_seeking());
    // Volatile state is pushed once the seek lands.
    seeking.step(0.0);
    let seek_events = seeking.controller.handler_mut().take();

    assert_eq!(non_moves(&seek_events), non_moves(&plain_events));
    assert_eq!(positions(&seek_events), positions(&plain_events));

    // Replayed moves are not volatile; the reinjected ones are.
    let moves: Vec<bool> = seek_events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::EntityMove { is_volatile, .. } => Some(*is_volatile),
            _ => None,
        })
        .collect();
    assert_eq!(moves.len(), 11 * 2 + 2);
    assert!(moves[..22].iter().all(|v| !v));
    assert!(moves[22..].iter().all(|v| *v));
}

#[test]
fn test_rewind_reloads_and_replays_deterministically() {
    let recorded = record_to_memory(&TestRecording::new(0, 30));

    let mut plain = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut plain);
    assert!(plain.run_until(0.1, 50, |c| c.current_tick() == 10));
    let plain_events = plain.controller.handler_mut().take();

    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    assert!(playback.run_until(1.0, 20, |c| c.current_tick() == 30));
    playback.step(0.1);
    let first_run = playback.controller.handler_mut().take();
    assert_eq!(count(&first_run, &PlaybackEvent::Finish), 1);

    playback.controller.set_current_tick(10);
    assert!(playback.run_until(0.0, 10, |c| !c.is_seeking()));
    assert_eq!(playback.controller.current_tick(), 10);
    playback.step(0.0);
    let rewind = playback.controller.handler_mut().take();

    assert_eq!(rewind[0], PlaybackEvent::EntitiesReset);
    // The plain run also saw the header and metadata.
    assert_eq!(non_moves(&rewind[1..]), non_moves(&plain_events[2..]));
    assert_eq!(positions(&rewind), positions(&plain_events));

    // A second playthrough finishes again.
    assert!(playback.run_until(1.0, 20, |c| c.current_tick() == 30));
    playback.step(0.1);
    let second_run = playback.controller.handler_mut().take();
    assert_eq!(count(&second_run, &PlaybackEvent::Finish), 1);
}

#[test]
fn test_seek_past_the_end_stops_at_the_last_tick() {
    let recorded = record_to_memory(&TestRecording::new(0, 15));
    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    playback.controller.set_current_tick(1_000);
    assert!(playback.run_until(0.0, 10, |c| !c.is_seeking()));
    assert_eq!(playback.controller.current_tick(), 15);
    let events = playback.controller.handler_mut().take();
    assert_eq!(count(&events, &PlaybackEvent::Finish), 1);
}

#[test]
fn test_window_stays_between_watermarks() {
    let recorded = record_to_memory(&TestRecording::new(0, 100));
    let config = PlaybackConfig {
        min_ticks_in_memory: 10,
        max_ticks_in_memory: 25,
        ..PlaybackConfig::default()
    };
    let mut playback = Playback::of_file(&recorded, &config);
    start(&mut playback);

    let mut peak = 0;
    for _ in 0..200 {
        playback.step(0.5);
        peak = peak.max(playback.controller.num_ticks_loaded());
        assert!(playback.controller.num_ticks_loaded() <= 25);
        if playback.controller.current_tick() == 100 {
            break;
        }
    }
    // The first append fills the window; one tick plays in the same frame.
    assert_eq!(peak, 24);
    playback.step(0.5);

    let events = &playback.controller.handler().events;
    assert_eq!(post_ticks(events), (0..100).collect::<Vec<_>>());
    assert_eq!(count(events, &PlaybackEvent::Finish), 1);
}

#[test]
fn test_stale_volatile_state_is_reinjected() {
    // Entity 1 moves on tick 0 only; entity 2 moves every tick.
    let path = unique_path("volatile");
    let file = MemoryFile::new();
    let mut writer = ReplayWriter::new(
        Box::new(MemoryFileWriter::new(&path, file.clone())),
        replay_signer(PRIVATE_KEY),
        &WriterConfig::default(),
        DIGEST,
        &test_meta_data(),
    )
    .unwrap();
    for i in 0..30u32 {
        let mut b = TickDataBuilder::new();
        if i == 0 {
            b.space_data(1, 1, "v")
                .volatile(1, Vector3::new(1.0, 2.0, 3.0), Direction::default(), 0);
        }
        b.volatile(2, Vector3::new(i as f32, 0.0, 0.0), Direction::default(), 0);
        writer.add_tick_data(i, 1, &b.build()).unwrap();
    }
    writer.finalise().unwrap();
    writer.process_completions();
    let recorded = RecordedFile {
        path,
        file,
        public_key: public_key(),
    };

    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    assert!(playback.run_until(1.0, 10, |c| c.current_tick() == 30));

    let entity_one_moves = playback
        .controller
        .handler()
        .events
        .iter()
        .filter(|e| matches!(e, PlaybackEvent::EntityMove { entity_id: 1, .. }))
        .count();
    // Recorded once, then re-sent after ticks 11 and 22.
    assert_eq!(entity_one_moves, 3);
}

fn record_raw_ticks(ticks: &[Vec<u8>]) -> RecordedFile {
    let path = unique_path("raw");
    let file = MemoryFile::new();
    let mut writer = ReplayWriter::new(
        Box::new(MemoryFileWriter::new(&path, file.clone())),
        replay_signer(PRIVATE_KEY),
        &WriterConfig::default(),
        DIGEST,
        &test_meta_data(),
    )
    .unwrap();
    for (i, data) in ticks.iter().enumerate() {
        writer.add_tick_data(i as u32, 1, data).unwrap();
    }
    writer.finalise().unwrap();
    writer.process_completions();
    RecordedFile {
        path,
        file,
        public_key: public_key(),
    }
}

fn tail(events: &[PlaybackEvent], n: usize) -> &[PlaybackEvent] {
    &events[events.len().saturating_sub(n)..]
}

#[test]
fn test_first_tick_without_space_data_is_corrupt() {
    let mut b = TickDataBuilder::new();
    b.volatile(1, Vector3::default(), Direction::default(), 0);
    let recorded = record_raw_ticks(&[b.build(), vec![]]);

    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    playback.step(0.0);

    assert!(playback.controller.is_destroyed());
    let message = playback.controller.error_message().unwrap().to_string();
    assert!(message.contains("Could not read space data for tick 0"));
    assert_eq!(
        tail(&playback.controller.handler().events, 3),
        &[
            PlaybackEvent::CorruptedData,
            PlaybackEvent::Error(message),
            PlaybackEvent::Destroyed,
        ]
    );

    // Destroyed controllers ignore further work.
    playback.step(1.0);
    assert_eq!(count(&playback.controller.handler().events, &PlaybackEvent::Destroyed), 1);
    assert!(!playback.controller.set_current_tick(0));
}

#[test]
fn test_unknown_block_type_is_fatal() {
    let mut first = TickDataBuilder::new();
    first.space_data(1, 1, "x");
    let recorded = record_raw_ticks(&[first.build(), vec![0xEE, 1, 2, 3]]);

    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    playback.step(0.0);
    assert!(!playback.controller.is_destroyed());
    playback.step(0.1);

    assert!(playback.controller.is_destroyed());
    assert!(playback
        .controller
        .error_message()
        .unwrap()
        .contains("Could not read valid block type"));
    assert_eq!(post_ticks(&playback.controller.handler().events), vec![0]);
}

#[test]
fn test_truncated_block_only_loses_the_rest_of_its_tick() {
    let mut first = TickDataBuilder::new();
    first.space_data(1, 1, "x");
    let mut second = TickDataBuilder::new();
    second.entity_delete(4);
    let mut data = second.build();
    // A method block cut short after its entity id.
    data.extend_from_slice(&[3, 9, 0, 0, 0]);
    let mut third = TickDataBuilder::new();
    third.entity_delete(5);
    let recorded = record_raw_ticks(&[first.build(), data, third.build()]);

    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    assert!(playback.run_until(1.0, 5, |c| c.current_tick() == 3));

    let events = &playback.controller.handler().events;
    assert!(!playback.controller.is_destroyed());
    assert!(events.contains(&PlaybackEvent::EntityLeave { entity_id: 4 }));
    assert!(events.contains(&PlaybackEvent::EntityLeave { entity_id: 5 }));
    assert_eq!(post_ticks(events), vec![0, 1, 2]);
}

#[test]
fn test_final_block_finishes_playback() {
    let mut first = TickDataBuilder::new();
    first.space_data(1, 1, "x").final_marker().entity_delete(9);
    let recorded = record_raw_ticks(&[first.build()]);

    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    start(&mut playback);
    playback.step(0.0);
    let events = &playback.controller.handler().events;
    assert_eq!(count(events, &PlaybackEvent::Finish), 1);
    // Blocks after the marker are not played.
    assert!(!events.contains(&PlaybackEvent::EntityLeave { entity_id: 9 }));
}

#[test]
fn test_rejected_header_stops_playback() {
    let recorded = record_to_memory(&TestRecording::new(0, 5));
    let mut playback = Playback::of_file(&recorded, &PlaybackConfig::default());
    playback.controller.handler_mut().reject_header = true;
    playback.step(0.0);
    playback.step(0.0);

    assert!(playback.controller.is_destroyed());
    assert_eq!(playback.controller.state(), PlaybackState::Idle);
    assert_eq!(
        playback.controller.handler().events,
        vec![
            PlaybackEvent::Header { num_ticks: 5 },
            PlaybackEvent::Error("Header rejected by application".into()),
            PlaybackEvent::Destroyed,
        ]
    );
}

#[test]
fn test_other_protocol_version_is_refused() {
    let recorded = record_to_memory(&TestRecording::new(0, 5));
    let mut bytes = recorded.file.contents();
    bytes[0] = bytes[0].wrapping_add(1);

    let scheduler = Arc::new(InlineScheduler::new());
    let provider = Arc::new(MemoryFileProvider::new());
    provider.insert("mem://old-version", MemoryFile::with_contents(bytes));
    // Without a key the altered header is not caught by its signature.
    let loader = TickLoader::new(
        scheduler.clone(),
        provider,
        "mem://old-version",
        "",
        &LoaderConfig::default(),
    );
    let mut controller = ReplayController::new(
        EventLog::new(),
        1,
        loader,
        ReplaySource::File,
        &PlaybackConfig::default(),
        FileDisposition::Keep,
    );
    controller.tick(0.0);
    scheduler.run_pending();
    controller.tick(0.0);

    let events = &controller.handler().events;
    assert!(matches!(events[0], PlaybackEvent::BadVersion(v) if v.major == 3));
    assert!(matches!(&events[1], PlaybackEvent::Error(m) if m.contains("Unsupported protocol version 3.9.0")));
    assert!(controller.is_destroyed());
}

#[test]
fn test_missing_file_fails_playback() {
    let scheduler = Arc::new(InlineScheduler::new());
    let loader = TickLoader::new(
        scheduler.clone(),
        Arc::new(MemoryFileProvider::new()),
        "mem://nowhere",
        "",
        &LoaderConfig::default(),
    );
    let mut controller = ReplayController::new(
        EventLog::new(),
        1,
        loader,
        ReplaySource::File,
        &PlaybackConfig::default(),
        FileDisposition::Keep,
    );
    controller.tick(0.0);
    scheduler.run_pending();
    controller.tick(0.0);

    assert!(controller.is_destroyed());
    assert!(controller.error_message().unwrap().contains("Failed to open replay file"));
}

#[test]
fn test_tampered_file_fails_playback() {
    let recorded = record_to_memory(&TestRecording::new(0, 20));
    let mut bytes = recorded.file.contents();
    let layout = file_layout(&bytes);
    bytes[layout.chunks[1].start + 6] ^= 0x10;
    let tampered = RecordedFile {
        path: unique_path("tampered"),
        file: MemoryFile::with_contents(bytes),
        public_key: recorded.public_key.clone(),
    };

    let mut playback = Playback::of_file(&tampered, &PlaybackConfig::default());
    // The header request only reads the first chunk, which is intact.
    start(&mut playback);
    playback.step(0.0);
    assert!(playback.controller.is_destroyed());
    assert!(playback
        .controller
        .error_message()
        .unwrap()
        .contains("Signature mismatch"));
}
