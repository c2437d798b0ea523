// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Scripted "arena skirmish" recording.
//!
//! A player (entity 1) circles the arena while three guards patrol. A
//! guard dies at tick 40 and a reinforcement spawns at tick 60. Ticks
//! that carry events are submitted as two shards, movement and events,
//! so the writer's shard merging is exercised too.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use tickvault::format::{Direction, EntityId, TickDataBuilder, Vector3};
use tickvault::{replay_signer, ReplayMetaData, ReplayWriter, WriterConfig};

pub const PLAYER: EntityId = 1;
pub const GUARDS: [EntityId; 3] = [2, 3, 4];
pub const FALLEN_GUARD: EntityId = 3;
pub const REINFORCEMENT: EntityId = 5;

pub const DEATH_TICK: u32 = 40;
pub const SPAWN_TICK: u32 = 60;

/// Game time of the first recorded tick.
pub const FIRST_GAME_TIME: u32 = 1000;

const ENTITY_DEFS: &str = "Avatar:1 Guard:2";

#[derive(Debug, Clone)]
pub struct DemoScene {
    pub num_ticks: u32,
    pub writer: WriterConfig,
    /// Hex Ed25519 seed used to sign the recording.
    pub private_key: String,
}

#[derive(Debug, Clone)]
pub struct DemoSummary {
    pub path: PathBuf,
    pub num_ticks: u32,
    pub num_chunks_expected: u32,
}

/// Deterministic jitter in [-1, 1).
fn jitter(seed: u64) -> f32 {
    let mut x = seed.wrapping_add(0x9E37_79B9);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    ((x % 200) as f32 - 100.0) / 100.0
}

pub fn meta_data(scene: &DemoScene) -> ReplayMetaData {
    let mut meta = ReplayMetaData::new();
    meta.add("scene", "arena-skirmish");
    meta.add("map", "arena");
    meta.add("ticks", scene.num_ticks.to_string());
    meta
}

/// Entity definition digest the recording is stamped with.
pub fn digest() -> [u8; 16] {
    let hash = blake3::hash(ENTITY_DEFS.as_bytes());
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hash.as_bytes()[..16]);
    digest
}

/// Movement shard for tick `index`.
pub fn movement(index: u32) -> Vec<u8> {
    let mut b = TickDataBuilder::new();
    let angle = index as f32 * 0.1;
    b.volatile(
        PLAYER,
        Vector3::new(50.0 * angle.cos(), 12.0, 50.0 * angle.sin()),
        Direction::new(angle, 0.0, 0.0),
        0,
    );
    for guard in GUARDS {
        if guard == FALLEN_GUARD && index > DEATH_TICK {
            continue;
        }
        let offset = f32::from(guard as u8) * 10.0;
        b.volatile_on_ground(
            guard,
            offset + jitter(u64::from(index) * 7 + guard as u64),
            offset - index as f32 * 0.2,
            Direction::default(),
            0,
        );
    }
    if index >= SPAWN_TICK {
        b.volatile_on_ground(REINFORCEMENT, -20.0, -20.0 + (index - SPAWN_TICK) as f32, Direction::default(), 0);
    }
    b.build()
}

/// Event shard for tick `index`, empty when nothing happens.
pub fn events(index: u32, num_ticks: u32) -> Vec<u8> {
    let mut b = TickDataBuilder::new();
    if index == 0 {
        b.space_data(1, 0x01, "arena")
            .space_data(2, 0x02, "weather=clear")
            .entity_create(0, PLAYER, 1, Vector3::new(50.0, 12.0, 0.0), Direction::default(), b"hp=100");
        for guard in GUARDS {
            let offset = f32::from(guard as u8) * 10.0;
            b.entity_create(0, guard, 2, Vector3::new(offset, 0.0, offset), Direction::default(), b"hp=40");
        }
        b.player_state_change(PLAYER, true, &GUARDS);
    }
    if index > 0 && index % 10 == 0 {
        b.method(PLAYER, 1, &index.to_le_bytes());
    }
    if index == DEATH_TICK - 1 {
        b.property_change(FALLEN_GUARD, false, b"hp=0");
    }
    if index == DEATH_TICK {
        b.aoi_change(PLAYER, FALLEN_GUARD, false).entity_delete(FALLEN_GUARD);
    }
    if index == SPAWN_TICK {
        b.entity_create(0, REINFORCEMENT, 2, Vector3::new(-20.0, 0.0, -20.0), Direction::default(), b"hp=40")
            .aoi_change(PLAYER, REINFORCEMENT, true);
    }
    if index + 1 == num_ticks {
        b.final_marker();
    }
    b.build()
}

/// Records the scene to `path` and waits until it is finalised on disk.
pub fn generate(path: &Path, scene: &DemoScene) -> Result<DemoSummary> {
    if scene.num_ticks == 0 {
        bail!("A demo needs at least one tick");
    }
    let mut writer = ReplayWriter::create(
        path,
        replay_signer(&scene.private_key),
        &scene.writer,
        digest(),
        &meta_data(scene),
    )?;

    for index in 0..scene.num_ticks {
        let game_time = FIRST_GAME_TIME + index;
        let moves = movement(index);
        let happenings = events(index, scene.num_ticks);
        if happenings.is_empty() {
            writer.add_tick_data(game_time, 1, &moves)?;
        } else {
            writer.add_tick_data(game_time, 2, &moves)?;
            writer.add_tick_data(game_time, 2, &happenings)?;
        }
        writer.process_completions();
    }

    writer.finalise()?;
    writer.wait_idle();
    if let Some(error) = writer.error() {
        bail!("Recording failed: {}", error);
    }
    if !writer.is_closed() {
        bail!("Recording did not close after finalising");
    }

    let per_chunk = scene.writer.num_ticks_to_sign.max(1);
    let summary = DemoSummary {
        path: path.to_path_buf(),
        num_ticks: writer.num_ticks_written(),
        num_chunks_expected: scene.num_ticks.div_ceil(per_chunk),
    };
    info!(path = %path.display(), num_ticks = summary.num_ticks, "demo recording written");
    Ok(summary)
}
