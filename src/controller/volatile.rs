// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Last known position of every moving entity, re-sent periodically so
//! consumers that extrapolate motion never go stale.

use std::collections::BTreeMap;

use super::handler::{ReplayHandler, SpaceId};
use crate::format::{Direction, EntityId, Vector3};

#[derive(Debug, Clone, Copy, PartialEq)]
struct EntityVolatile {
    vehicle_id: EntityId,
    position: Vector3,
    direction: Direction,
    last_updated: u32,
}

#[derive(Debug, Clone)]
pub struct VolatileCache {
    entries: BTreeMap<EntityId, EntityVolatile>,
    injection_period: u32,
}

impl VolatileCache {
    pub fn new(injection_period: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            injection_period,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set(&mut self, entity_id: EntityId, vehicle_id: EntityId, position: Vector3, direction: Direction, now: u32) {
        self.entries.insert(
            entity_id,
            EntityVolatile {
                vehicle_id,
                position,
                direction,
                last_updated: now,
            },
        );
    }

    pub fn remove(&mut self, entity_id: EntityId) {
        self.entries.remove(&entity_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Re-sends every entry older than the injection period, or every
    /// entry when `force` is set. Entries stamped after `now` are skipped.
    pub fn process_for_tick<H: ReplayHandler + ?Sized>(&mut self, handler: &mut H, space_id: SpaceId, now: u32, force: bool) {
        for (&entity_id, entry) in self.entries.iter_mut() {
            if !force {
                if entry.last_updated > now || now - entry.last_updated <= self.injection_period {
                    continue;
                }
                entry.last_updated = now;
            }
            handler.on_entity_move(
                entity_id,
                space_id,
                entry.vehicle_id,
                entry.position,
                entry.direction,
                true,
            );
        }
    }
}
