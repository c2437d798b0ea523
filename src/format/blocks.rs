// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Typed blocks inside a decoded tick.
//!
//! A tick is a sequence of `block_type(1) | fields` records. Every integer
//! is little-endian; entity ids are `i32`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{write_string, ByteReader, CodecError};

/// Height reported for entities that move along the ground and carry
/// no y coordinate.
pub const NO_POSITION: f32 = -13000.0;

pub type EntityId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    EntityCreate = 0,
    Volatile = 1,
    VolatileOnGround = 2,
    Method = 3,
    PropertyChange = 4,
    PlayerStateChange = 5,
    AoiChange = 6,
    EntityDelete = 7,
    SpaceData = 8,
    Final = 9,
}

impl TryFrom<u8> for BlockType {
    type Error = BlockError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => BlockType::EntityCreate,
            1 => BlockType::Volatile,
            2 => BlockType::VolatileOnGround,
            3 => BlockType::Method,
            4 => BlockType::PropertyChange,
            5 => BlockType::PlayerStateChange,
            6 => BlockType::AoiChange,
            7 => BlockType::EntityDelete,
            8 => BlockType::SpaceData,
            9 => BlockType::Final,
            other => return Err(BlockError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Direction {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl Direction {
    pub const fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockError {
    /// Fatal: the rest of the tick cannot be framed.
    #[error("Could not read valid block type ({0})")]
    UnknownType(u8),
    /// Only this block is lost.
    #[error("Failed to decode {block_type:?} block: {source}")]
    Malformed {
        block_type: BlockType,
        #[source]
        source: CodecError,
    },
}

impl BlockError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BlockError::UnknownType(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    EntityCreate {
        vehicle_id: EntityId,
        entity_id: EntityId,
        entity_type: u16,
        position: Vector3,
        direction: Direction,
        properties: Vec<u8>,
    },
    Volatile {
        entity_id: EntityId,
        position: Vector3,
        direction: Direction,
        vehicle_id: EntityId,
    },
    /// `position.y` is [`NO_POSITION`].
    VolatileOnGround {
        entity_id: EntityId,
        position: Vector3,
        direction: Direction,
        vehicle_id: EntityId,
    },
    Method {
        entity_id: EntityId,
        message_id: u8,
        data: Vec<u8>,
    },
    PropertyChange {
        entity_id: EntityId,
        is_slice: bool,
        data: Vec<u8>,
    },
    /// When `has_become_player` is set, `entities_in_aoi` lists the
    /// entities the new player can already see.
    PlayerStateChange {
        player_id: EntityId,
        has_become_player: bool,
        entities_in_aoi: Vec<EntityId>,
    },
    AoiChange {
        player_id: EntityId,
        entity_id: EntityId,
        has_entered: bool,
    },
    EntityDelete {
        entity_id: EntityId,
    },
    SpaceData {
        entry_id: u64,
        key: u16,
        value: String,
    },
    Final,
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::EntityCreate { .. } => BlockType::EntityCreate,
            Block::Volatile { .. } => BlockType::Volatile,
            Block::VolatileOnGround { .. } => BlockType::VolatileOnGround,
            Block::Method { .. } => BlockType::Method,
            Block::PropertyChange { .. } => BlockType::PropertyChange,
            Block::PlayerStateChange { .. } => BlockType::PlayerStateChange,
            Block::AoiChange { .. } => BlockType::AoiChange,
            Block::EntityDelete { .. } => BlockType::EntityDelete,
            Block::SpaceData { .. } => BlockType::SpaceData,
            Block::Final => BlockType::Final,
        }
    }

    fn decode_body(block_type: BlockType, r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(match block_type {
            BlockType::EntityCreate => {
                let vehicle_id = r.i32()?;
                let entity_id = r.i32()?;
                let entity_type = r.u16()?;
                let position = read_vector(r)?;
                let direction = read_direction(r)?;
                let len = r.u32()? as usize;
                Block::EntityCreate {
                    vehicle_id,
                    entity_id,
                    entity_type,
                    position,
                    direction,
                    properties: r.bytes(len)?.to_vec(),
                }
            }
            BlockType::Volatile => Block::Volatile {
                entity_id: r.i32()?,
                position: read_vector(r)?,
                direction: read_direction(r)?,
                vehicle_id: r.i32()?,
            },
            BlockType::VolatileOnGround => {
                let entity_id = r.i32()?;
                let x = r.f32()?;
                let z = r.f32()?;
                Block::VolatileOnGround {
                    entity_id,
                    position: Vector3::new(x, NO_POSITION, z),
                    direction: read_direction(r)?,
                    vehicle_id: r.i32()?,
                }
            }
            BlockType::Method => {
                let entity_id = r.i32()?;
                let message_id = r.u8()?;
                let size = read_size(r)?;
                Block::Method {
                    entity_id,
                    message_id,
                    data: r.bytes(size)?.to_vec(),
                }
            }
            BlockType::PropertyChange => {
                let entity_id = r.i32()?;
                let is_slice = r.u8()? == 1;
                let size = read_size(r)?;
                Block::PropertyChange {
                    entity_id,
                    is_slice,
                    data: r.bytes(size)?.to_vec(),
                }
            }
            BlockType::PlayerStateChange => {
                let player_id = r.i32()?;
                let has_become_player = r.u8()? != 0;
                let mut entities_in_aoi = Vec::new();
                if has_become_player {
                    let count = r.u32()?;
                    for _ in 0..count {
                        entities_in_aoi.push(r.i32()?);
                    }
                }
                Block::PlayerStateChange {
                    player_id,
                    has_become_player,
                    entities_in_aoi,
                }
            }
            BlockType::AoiChange => Block::AoiChange {
                player_id: r.i32()?,
                entity_id: r.i32()?,
                has_entered: r.u8()? != 0,
            },
            BlockType::EntityDelete => Block::EntityDelete {
                entity_id: r.i32()?,
            },
            BlockType::SpaceData => Block::SpaceData {
                entry_id: r.u64()?,
                key: r.u16()?,
                value: r.string()?,
            },
            BlockType::Final => Block::Final,
        })
    }
}

fn read_vector(r: &mut ByteReader<'_>) -> Result<Vector3, CodecError> {
    Ok(Vector3::new(r.f32()?, r.f32()?, r.f32()?))
}

fn read_direction(r: &mut ByteReader<'_>) -> Result<Direction, CodecError> {
    Ok(Direction::new(r.f32()?, r.f32()?, r.f32()?))
}

/// Signed size prefix; negative sizes cannot be satisfied.
fn read_size(r: &mut ByteReader<'_>) -> Result<usize, CodecError> {
    let size = r.i32()?;
    usize::try_from(size).map_err(|_| CodecError::Truncated {
        needed: size as u32 as usize,
        available: r.remaining(),
    })
}

/// Walks the blocks of one decoded tick.
///
/// After a malformed block the reader stops: the framing of anything
/// behind it is unknown.
pub struct BlockReader<'a> {
    reader: ByteReader<'a>,
    stopped: bool,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
            stopped: false,
        }
    }
}

impl Iterator for BlockReader<'_> {
    type Item = Result<Block, BlockError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.reader.is_empty() {
            return None;
        }
        let result = self
            .reader
            .u8()
            .map_err(|_| BlockError::UnknownType(0))
            .and_then(BlockType::try_from)
            .and_then(|block_type| {
                Block::decode_body(block_type, &mut self.reader)
                    .map_err(|source| BlockError::Malformed { block_type, source })
            });
        if result.is_err() {
            self.stopped = true;
        }
        Some(result)
    }
}

/// Encodes blocks into the byte stream of one tick.
#[derive(Debug, Default, Clone)]
pub struct TickDataBuilder {
    buf: Vec<u8>,
}

impl TickDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn tag(&mut self, block_type: BlockType) -> &mut Vec<u8> {
        self.buf.push(block_type as u8);
        &mut self.buf
    }

    fn put_vector(buf: &mut Vec<u8>, v: Vector3) {
        for f in [v.x, v.y, v.z] {
            buf.extend_from_slice(&f.to_le_bytes());
        }
    }

    fn put_direction(buf: &mut Vec<u8>, d: Direction) {
        for f in [d.yaw, d.pitch, d.roll] {
            buf.extend_from_slice(&f.to_le_bytes());
        }
    }

    fn put_i32(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn entity_create(
        &mut self,
        vehicle_id: EntityId,
        entity_id: EntityId,
        entity_type: u16,
        position: Vector3,
        direction: Direction,
        properties: &[u8],
    ) -> &mut Self {
        let buf = self.tag(BlockType::EntityCreate);
        Self::put_i32(buf, vehicle_id);
        Self::put_i32(buf, entity_id);
        buf.extend_from_slice(&entity_type.to_le_bytes());
        Self::put_vector(buf, position);
        Self::put_direction(buf, direction);
        buf.extend_from_slice(&(properties.len() as u32).to_le_bytes());
        buf.extend_from_slice(properties);
        self
    }

    pub fn volatile(
        &mut self,
        entity_id: EntityId,
        position: Vector3,
        direction: Direction,
        vehicle_id: EntityId,
    ) -> &mut Self {
        let buf = self.tag(BlockType::Volatile);
        Self::put_i32(buf, entity_id);
        Self::put_vector(buf, position);
        Self::put_direction(buf, direction);
        Self::put_i32(buf, vehicle_id);
        self
    }

    pub fn volatile_on_ground(
        &mut self,
        entity_id: EntityId,
        x: f32,
        z: f32,
        direction: Direction,
        vehicle_id: EntityId,
    ) -> &mut Self {
        let buf = self.tag(BlockType::VolatileOnGround);
        Self::put_i32(buf, entity_id);
        buf.extend_from_slice(&x.to_le_bytes());
        buf.extend_from_slice(&z.to_le_bytes());
        Self::put_direction(buf, direction);
        Self::put_i32(buf, vehicle_id);
        self
    }

    pub fn method(&mut self, entity_id: EntityId, message_id: u8, data: &[u8]) -> &mut Self {
        let buf = self.tag(BlockType::Method);
        Self::put_i32(buf, entity_id);
        buf.push(message_id);
        Self::put_i32(buf, data.len() as i32);
        buf.extend_from_slice(data);
        self
    }

    pub fn property_change(&mut self, entity_id: EntityId, is_slice: bool, data: &[u8]) -> &mut Self {
        let buf = self.tag(BlockType::PropertyChange);
        Self::put_i32(buf, entity_id);
        buf.push(is_slice as u8);
        Self::put_i32(buf, data.len() as i32);
        buf.extend_from_slice(data);
        self
    }

    pub fn player_state_change(
        &mut self,
        player_id: EntityId,
        has_become_player: bool,
        entities_in_aoi: &[EntityId],
    ) -> &mut Self {
        let buf = self.tag(BlockType::PlayerStateChange);
        Self::put_i32(buf, player_id);
        buf.push(has_become_player as u8);
        if has_become_player {
            buf.extend_from_slice(&(entities_in_aoi.len() as u32).to_le_bytes());
            for id in entities_in_aoi {
                Self::put_i32(buf, *id);
            }
        }
        self
    }

    pub fn aoi_change(&mut self, player_id: EntityId, entity_id: EntityId, has_entered: bool) -> &mut Self {
        let buf = self.tag(BlockType::AoiChange);
        Self::put_i32(buf, player_id);
        Self::put_i32(buf, entity_id);
        buf.push(has_entered as u8);
        self
    }

    pub fn entity_delete(&mut self, entity_id: EntityId) -> &mut Self {
        let buf = self.tag(BlockType::EntityDelete);
        Self::put_i32(buf, entity_id);
        self
    }

    pub fn space_data(&mut self, entry_id: u64, key: u16, value: &str) -> &mut Self {
        let buf = self.tag(BlockType::SpaceData);
        buf.extend_from_slice(&entry_id.to_le_bytes());
        buf.extend_from_slice(&key.to_le_bytes());
        // Values past the packed-string limit are stored empty.
        if write_string(buf, value).is_err() {
            buf.push(0);
        }
        self
    }

    pub fn final_marker(&mut self) -> &mut Self {
        self.tag(BlockType::Final);
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}
