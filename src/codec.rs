// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Little-endian primitives shared by the file format and the tick blocks.
//!
//! Strings are length-prefixed with a packed count: one byte when the
//! length is below 255, otherwise `0xFF` followed by a 24-bit length.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

const PACKED_ESCAPE: u8 = 0xFF;
const MAX_PACKED_LEN: usize = 0x00FF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("String is not valid UTF-8")]
    InvalidUtf8,
    #[error("String of {0} bytes is too long to encode")]
    TooLong(usize),
}

pub type CodecResult<T> = Result<T, CodecError>;

impl From<CodecError> for io::Error {
    fn from(e: CodecError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

/// Zero-copy cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Consumes everything left.
    pub fn finish(&mut self) {
        self.pos = self.data.len();
    }

    pub fn bytes(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> CodecResult<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> CodecResult<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn i32(&mut self) -> CodecResult<i32> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> CodecResult<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    pub fn f32(&mut self) -> CodecResult<f32> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    pub fn string(&mut self) -> CodecResult<String> {
        let len = match self.u8()? {
            PACKED_ESCAPE => {
                let raw = self.bytes(3)?;
                LittleEndian::read_u24(raw) as usize
            }
            short => short as usize,
        };
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

/// Number of bytes `s` occupies once written with [`write_string`].
pub fn string_stream_size(s: &str) -> usize {
    let prefix = if s.len() < PACKED_ESCAPE as usize { 1 } else { 4 };
    prefix + s.len()
}

pub fn write_string<W: Write + ?Sized>(out: &mut W, s: &str) -> io::Result<()> {
    let len = s.len();
    if len > MAX_PACKED_LEN {
        return Err(CodecError::TooLong(len).into());
    }
    if len < PACKED_ESCAPE as usize {
        out.write_u8(len as u8)?;
    } else {
        out.write_u8(PACKED_ESCAPE)?;
        out.write_u24::<LittleEndian>(len as u32)?;
    }
    out.write_all(s.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(input: &mut R) -> io::Result<String> {
    let len = match input.read_u8()? {
        PACKED_ESCAPE => input.read_u24::<LittleEndian>()? as usize,
        short => short as usize,
    };
    let mut raw = vec![0u8; len];
    input.read_exact(&mut raw)?;
    String::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8.into())
}
