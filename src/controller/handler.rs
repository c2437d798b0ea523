// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! The application side of playback.

use crate::format::{Direction, EntityId, ProtocolVersion, ReplayHeader, ReplayMetaData, Vector3};

pub type SpaceId = u32;

/// Receives decoded playback events. Every method has a no-op default so
/// an application implements only what it renders.
pub trait ReplayHandler {
    /// Returning false rejects the recording and stops playback.
    fn on_read_header(&mut self, _header: &ReplayHeader) -> bool {
        true
    }

    /// Returning false rejects the recording and stops playback.
    fn on_read_meta_data(&mut self, _meta_data: &ReplayMetaData) -> bool {
        true
    }

    fn on_bad_version(&mut self, _found: ProtocolVersion) {}

    #[allow(clippy::too_many_arguments)]
    fn on_entity_create(
        &mut self,
        _entity_id: EntityId,
        _entity_type: u16,
        _space_id: SpaceId,
        _vehicle_id: EntityId,
        _position: Vector3,
        _direction: Direction,
        _properties: &[u8],
    ) {
    }

    /// `is_volatile` is false for moves replayed while seeking.
    fn on_entity_move(
        &mut self,
        _entity_id: EntityId,
        _space_id: SpaceId,
        _vehicle_id: EntityId,
        _position: Vector3,
        _direction: Direction,
        _is_volatile: bool,
    ) {
    }

    fn on_entity_method(&mut self, _entity_id: EntityId, _message_id: u8, _data: &[u8]) {}

    fn on_entity_property(&mut self, _entity_id: EntityId, _is_slice: bool, _data: &[u8]) {}

    fn on_player_state_change(&mut self, _player_id: EntityId, _has_become_player: bool) {}

    fn on_aoi_change(&mut self, _player_id: EntityId, _entity_id: EntityId, _has_entered: bool) {}

    fn on_entity_leave(&mut self, _entity_id: EntityId) {}

    fn on_space_data(&mut self, _space_id: SpaceId, _entry_id: u64, _key: u16, _value: &str) {}

    /// Everything created so far is gone; playback restarts from tick 0.
    fn on_entities_reset(&mut self) {}

    /// `tick` is the index of the tick just played.
    fn on_post_tick(&mut self, _tick: u32) {}

    /// Time covered by ticks replayed while seeking.
    fn on_increase_total_time(&mut self, _seconds: f64) {}

    fn on_finish(&mut self) {}

    fn on_error(&mut self, _message: &str) {}

    /// A tick could not be played. `on_error` follows.
    fn on_corrupted_data(&mut self) {}

    fn on_destroyed(&mut self) {}
}

/// One handler callback, as recorded by [`EventLog`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Header { num_ticks: u32 },
    MetaData { entries: usize },
    BadVersion(ProtocolVersion),
    EntityCreate {
        entity_id: EntityId,
        entity_type: u16,
        vehicle_id: EntityId,
        position: Vector3,
        direction: Direction,
        properties: Vec<u8>,
    },
    EntityMove {
        entity_id: EntityId,
        vehicle_id: EntityId,
        position: Vector3,
        direction: Direction,
        is_volatile: bool,
    },
    EntityMethod { entity_id: EntityId, message_id: u8, data: Vec<u8> },
    EntityProperty { entity_id: EntityId, is_slice: bool, data: Vec<u8> },
    PlayerStateChange { player_id: EntityId, has_become_player: bool },
    AoiChange { player_id: EntityId, entity_id: EntityId, has_entered: bool },
    EntityLeave { entity_id: EntityId },
    SpaceData { entry_id: u64, key: u16, value: String },
    EntitiesReset,
    PostTick(u32),
    Finish,
    Error(String),
    CorruptedData,
    Destroyed,
}

impl PlaybackEvent {
    /// Moves are volatile state; everything else changes the world.
    pub fn is_move(&self) -> bool {
        matches!(self, PlaybackEvent::EntityMove { .. })
    }
}

/// Handler that records every callback in order.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    pub events: Vec<PlaybackEvent>,
    /// When set, headers are rejected.
    pub reject_header: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }
}

impl ReplayHandler for EventLog {
    fn on_read_header(&mut self, header: &ReplayHeader) -> bool {
        self.events.push(PlaybackEvent::Header {
            num_ticks: header.num_ticks,
        });
        !self.reject_header
    }

    fn on_read_meta_data(&mut self, meta_data: &ReplayMetaData) -> bool {
        self.events.push(PlaybackEvent::MetaData {
            entries: meta_data.len(),
        });
        true
    }

    fn on_bad_version(&mut self, found: ProtocolVersion) {
        self.events.push(PlaybackEvent::BadVersion(found));
    }

    fn on_entity_create(
        &mut self,
        entity_id: EntityId,
        entity_type: u16,
        _space_id: SpaceId,
        vehicle_id: EntityId,
        position: Vector3,
        direction: Direction,
        properties: &[u8],
    ) {
        self.events.push(PlaybackEvent::EntityCreate {
            entity_id,
            entity_type,
            vehicle_id,
            position,
            direction,
            properties: properties.to_vec(),
        });
    }

    fn on_entity_move(
        &mut self,
        entity_id: EntityId,
        _space_id: SpaceId,
        vehicle_id: EntityId,
        position: Vector3,
        direction: Direction,
        is_volatile: bool,
    ) {
        self.events.push(PlaybackEvent::EntityMove {
            entity_id,
            vehicle_id,
            position,
            direction,
            is_volatile,
        });
    }

    fn on_entity_method(&mut self, entity_id: EntityId, message_id: u8, data: &[u8]) {
        self.events.push(PlaybackEvent::EntityMethod {
            entity_id,
            message_id,
            data: data.to_vec(),
        });
    }

    fn on_entity_property(&mut self, entity_id: EntityId, is_slice: bool, data: &[u8]) {
        self.events.push(PlaybackEvent::EntityProperty {
            entity_id,
            is_slice,
            data: data.to_vec(),
        });
    }

    fn on_player_state_change(&mut self, player_id: EntityId, has_become_player: bool) {
        self.events.push(PlaybackEvent::PlayerStateChange {
            player_id,
            has_become_player,
        });
    }

    fn on_aoi_change(&mut self, player_id: EntityId, entity_id: EntityId, has_entered: bool) {
        self.events.push(PlaybackEvent::AoiChange {
            player_id,
            entity_id,
            has_entered,
        });
    }

    fn on_entity_leave(&mut self, entity_id: EntityId) {
        self.events.push(PlaybackEvent::EntityLeave { entity_id });
    }

    fn on_space_data(&mut self, _space_id: SpaceId, entry_id: u64, key: u16, value: &str) {
        self.events.push(PlaybackEvent::SpaceData {
            entry_id,
            key,
            value: value.to_string(),
        });
    }

    fn on_entities_reset(&mut self) {
        self.events.push(PlaybackEvent::EntitiesReset);
    }

    fn on_post_tick(&mut self, tick: u32) {
        self.events.push(PlaybackEvent::PostTick(tick));
    }

    fn on_finish(&mut self) {
        self.events.push(PlaybackEvent::Finish);
    }

    fn on_error(&mut self, message: &str) {
        self.events.push(PlaybackEvent::Error(message.to_string()));
    }

    fn on_corrupted_data(&mut self) {
        self.events.push(PlaybackEvent::CorruptedData);
    }

    fn on_destroyed(&mut self) {
        self.events.push(PlaybackEvent::Destroyed);
    }
}
