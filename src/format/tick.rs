// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Per-tick framing inside a chunk payload.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::codec::{ByteReader, CodecResult};
use crate::compression::decompress;
use crate::error::ReplayResult;

/// `game_time(4) | data_len(4)`
pub const TICK_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickHeader {
    pub game_time: u32,
    pub data_len: u32,
}

impl TickHeader {
    pub fn read(reader: &mut ByteReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            game_time: reader.u32()?,
            data_len: reader.u32()?,
        })
    }

    pub fn write<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        out.write_u32::<LittleEndian>(self.game_time)?;
        out.write_u32::<LittleEndian>(self.data_len)
    }
}

/// Writes one framed tick. Empty data produces a bare header, which is
/// also how missing ticks are filled in.
pub fn write_tick<W: Write + ?Sized>(out: &mut W, game_time: u32, data: &[u8]) -> io::Result<()> {
    TickHeader {
        game_time,
        data_len: data.len() as u32,
    }
    .write(out)?;
    out.write_all(data)
}

/// One tick's worth of recorded data as it sits in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayTickData {
    pub game_time: u32,
    /// Still compressed unless the producing reader decompressed it.
    pub data: Vec<u8>,
    pub is_compressed: bool,
}

impl ReplayTickData {
    pub fn new(game_time: u32, data: Vec<u8>, is_compressed: bool) -> Self {
        Self {
            game_time,
            data,
            is_compressed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Block stream for this tick. Empty ticks stay empty.
    pub fn decoded(&self) -> ReplayResult<Vec<u8>> {
        if self.is_compressed && !self.data.is_empty() {
            decompress(&self.data)
        } else {
            Ok(self.data.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;

    #[test]
    fn test_filler_tick_is_eight_bytes() {
        let mut out = Vec::new();
        write_tick(&mut out, 42, &[]).unwrap();
        assert_eq!(out.len(), TICK_HEADER_SIZE);
        let header = TickHeader::read(&mut ByteReader::new(&out)).unwrap();
        assert_eq!(header, TickHeader { game_time: 42, data_len: 0 });
    }

    #[test]
    fn test_decoded_handles_empty_and_compressed() {
        let empty = ReplayTickData::new(1, Vec::new(), true);
        assert!(empty.decoded().unwrap().is_empty());

        let packed = Compression::Lz4.compress(b"blocks").unwrap();
        let tick = ReplayTickData::new(2, packed, true);
        assert_eq!(tick.decoded().unwrap(), b"blocks");

        let raw = ReplayTickData::new(3, b"plain".to_vec(), false);
        assert_eq!(raw.decoded().unwrap(), b"plain");
    }
}
