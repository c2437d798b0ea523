// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Headless playback: drives a controller through a whole recording as
//! fast as the loader allows and tallies what a client would have seen.

use anyhow::bail;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use tickvault::controller::SpaceId;
use tickvault::format::{Direction, EntityId, ProtocolVersion, ReplayHeader, Vector3};
use tickvault::loader::StdFileProvider;
use tickvault::scheduler::InlineScheduler;
use tickvault::{FileDisposition, PlaybackState, ReplayConfig, ReplayController, ReplayHandler, ReplaySource, TickLoader};

const SPACE_ID: SpaceId = 1;

#[derive(Debug, Default, Serialize)]
pub struct ReplaySummary {
    pub num_ticks_declared: u32,
    pub ticks_played: u32,
    pub last_tick: Option<u32>,
    pub entities_created: u32,
    pub entity_moves: u32,
    pub entity_methods: u32,
    pub property_changes: u32,
    pub player_changes: u32,
    pub aoi_changes: u32,
    pub entities_left: u32,
    pub space_data: u32,
    pub resets: u32,
    pub entities_alive: usize,
    pub finished: bool,
    pub bad_version: Option<String>,
    pub errors: Vec<String>,
    #[serde(skip)]
    alive: HashSet<EntityId>,
}

impl ReplayHandler for ReplaySummary {
    fn on_read_header(&mut self, header: &ReplayHeader) -> bool {
        self.num_ticks_declared = header.num_ticks;
        true
    }

    fn on_bad_version(&mut self, found: ProtocolVersion) {
        self.bad_version = Some(found.to_string());
    }

    fn on_entity_create(
        &mut self,
        entity_id: EntityId,
        _entity_type: u16,
        _space_id: SpaceId,
        _vehicle_id: EntityId,
        _position: Vector3,
        _direction: Direction,
        _properties: &[u8],
    ) {
        self.entities_created += 1;
        self.alive.insert(entity_id);
        self.entities_alive = self.alive.len();
    }

    fn on_entity_move(
        &mut self,
        _entity_id: EntityId,
        _space_id: SpaceId,
        _vehicle_id: EntityId,
        _position: Vector3,
        _direction: Direction,
        _is_volatile: bool,
    ) {
        self.entity_moves += 1;
    }

    fn on_entity_method(&mut self, _entity_id: EntityId, _message_id: u8, _data: &[u8]) {
        self.entity_methods += 1;
    }

    fn on_entity_property(&mut self, _entity_id: EntityId, _is_slice: bool, _data: &[u8]) {
        self.property_changes += 1;
    }

    fn on_player_state_change(&mut self, _player_id: EntityId, _has_become_player: bool) {
        self.player_changes += 1;
    }

    fn on_aoi_change(&mut self, _player_id: EntityId, _entity_id: EntityId, _has_entered: bool) {
        self.aoi_changes += 1;
    }

    fn on_entity_leave(&mut self, entity_id: EntityId) {
        self.entities_left += 1;
        self.alive.remove(&entity_id);
        self.entities_alive = self.alive.len();
    }

    fn on_space_data(&mut self, _space_id: SpaceId, _entry_id: u64, _key: u16, _value: &str) {
        self.space_data += 1;
    }

    fn on_entities_reset(&mut self) {
        self.resets += 1;
        self.alive.clear();
        self.entities_alive = 0;
    }

    fn on_post_tick(&mut self, tick: u32) {
        self.ticks_played += 1;
        self.last_tick = Some(tick);
    }

    fn on_finish(&mut self) {
        self.finished = true;
    }

    fn on_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Empty plays without checking signatures.
    pub public_key: String,
    /// Tick index to jump to once the header is in.
    pub seek: Option<u32>,
    pub speed: f32,
    pub config: ReplayConfig,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            seek: None,
            speed: 1.0,
            config: ReplayConfig::default(),
        }
    }
}

/// Plays `path` to the end, or until the controller gives up.
pub fn play(path: &Path, options: &ReplayOptions) -> anyhow::Result<ReplaySummary> {
    if options.speed.is_nan() || options.speed <= 0.0 {
        bail!("Speed must be positive, got {}", options.speed);
    }
    options.config.validate()?;

    let scheduler = Arc::new(InlineScheduler::new());
    let loader = TickLoader::new(
        scheduler.clone(),
        Arc::new(StdFileProvider),
        path,
        options.public_key.clone(),
        &options.config.loader,
    );
    let mut controller = ReplayController::new(
        ReplaySummary::default(),
        SPACE_ID,
        loader,
        ReplaySource::File,
        &options.config.playback,
        FileDisposition::Keep,
    );
    controller.set_speed_scale(options.speed);

    let slowdown = (1.0 / options.speed).ceil() as u64 + 1;
    let mut pending_seek = options.seek;
    let mut frames = 0u64;
    loop {
        let frequency = controller.update_frequency().max(1);
        controller.tick(1.0 / f64::from(frequency));
        scheduler.run_pending();

        if let Some(target) = pending_seek {
            if controller.state() == PlaybackState::Playing {
                debug!(target, "seeking");
                controller.set_current_tick(target);
                pending_seek = None;
            }
        }
        if controller.handler().finished || controller.is_destroyed() {
            break;
        }

        frames += 1;
        let budget = (u64::from(controller.num_ticks_total()) + 100) * slowdown * 4;
        if frames > budget {
            bail!("Playback stalled at tick {} after {} frames", controller.current_tick(), frames);
        }
    }

    Ok(std::mem::take(controller.handler_mut()))
}

pub fn run(path: &Path, options: &ReplayOptions, as_json: bool) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("Replay file {} not found", path.display());
    }
    let summary = play(path, options)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Metric", "Value"]);

        table.add_row(vec!["Ticks Declared".to_string(), summary.num_ticks_declared.to_string()]);
        table.add_row(vec!["Ticks Played".to_string(), summary.ticks_played.to_string()]);
        table.add_row(vec![
            "Last Tick".to_string(),
            summary.last_tick.map_or_else(|| "-".to_string(), |t| t.to_string()),
        ]);
        table.add_row(vec!["Entities Created".to_string(), summary.entities_created.to_string()]);
        table.add_row(vec!["Entities Left".to_string(), summary.entities_left.to_string()]);
        table.add_row(vec!["Entities Alive".to_string(), summary.entities_alive.to_string()]);
        table.add_row(vec!["Moves".to_string(), summary.entity_moves.to_string()]);
        table.add_row(vec!["Method Calls".to_string(), summary.entity_methods.to_string()]);
        table.add_row(vec!["Property Changes".to_string(), summary.property_changes.to_string()]);
        table.add_row(vec!["Player Changes".to_string(), summary.player_changes.to_string()]);
        table.add_row(vec!["AoI Changes".to_string(), summary.aoi_changes.to_string()]);
        table.add_row(vec!["Space Data".to_string(), summary.space_data.to_string()]);
        table.add_row(vec!["Resets".to_string(), summary.resets.to_string()]);
        table.add_row(vec![
            "Finished".to_string(),
            if summary.finished { "yes" } else { "no" }.to_string(),
        ]);

        println!("\nPlayback Report");
        println!("---------------");
        println!("{table}\n");
    }

    if let Some(version) = &summary.bad_version {
        println!("⚠️  WARNING: recorded with protocol {}\n", version);
    }
    if let Some(first) = summary.errors.first() {
        bail!("Playback failed: {}", first);
    }
    Ok(())
}
