// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replay file header.
//!
//! ```text
//! version(4) | digest(16) | update_freq(1) | timestamp(4) | nonce(8)
//!   | sig_len(2) | signature(sig_len) | num_ticks(4)
//! ```
//!
//! `num_ticks` sits after the signature so it can be rewritten in place
//! once the recording is finalised.

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::{ChecksumReader, ChecksumScheme, ChecksumWriter};
use crate::codec::ByteReader;
use crate::error::{ReplayError, ReplayResult};

pub const DIGEST_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 8;

/// Bytes covered by the header signature.
pub const SIGNED_PREFIX_SIZE: usize = 4 + DIGEST_SIZE + 1 + 4 + NONCE_SIZE + 2;

const SIG_LEN_OFFSET: usize = SIGNED_PREFIX_SIZE - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion {
        major: 2,
        minor: 9,
        patch: 0,
    };

    pub const fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self { major, minor, patch }
    }

    /// Patch releases are wire compatible; anything else is not.
    pub fn supports(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayHeader {
    pub version: ProtocolVersion,
    /// Identifies the entity definitions the recording was made against.
    pub digest: [u8; DIGEST_SIZE],
    pub update_frequency: u8,
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    pub nonce: [u8; NONCE_SIZE],
    /// Lets readers without a key still skip signatures.
    pub reported_signature_length: u16,
    /// Zero while the recording is live.
    pub num_ticks: u32,
}

impl ReplayHeader {
    /// A fresh header stamped with the current time. A random nonce is
    /// drawn when none is supplied.
    pub fn new(
        scheme: &dyn ChecksumScheme,
        digest: [u8; DIGEST_SIZE],
        update_frequency: u8,
        nonce: Option<[u8; NONCE_SIZE]>,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Self {
            version: ProtocolVersion::CURRENT,
            digest,
            update_frequency,
            timestamp,
            nonce: nonce.unwrap_or_else(rand::random),
            reported_signature_length: scheme.stream_size() as u16,
            num_ticks: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.num_ticks == 0
    }

    /// Total header length given a buffered prefix, or `None` when the
    /// prefix is too short to contain the signature length.
    pub fn required_length(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < SIGNED_PREFIX_SIZE {
            return None;
        }
        let sig_len = u16::from_le_bytes([prefix[SIG_LEN_OFFSET], prefix[SIG_LEN_OFFSET + 1]]);
        Some(Self::stream_size(sig_len as usize))
    }

    /// True when `prefix` holds at least one whole header.
    pub fn check_sufficient_length(prefix: &[u8]) -> bool {
        Self::required_length(prefix).map_or(false, |needed| prefix.len() >= needed)
    }

    pub fn stream_size(signature_length: usize) -> usize {
        Self::num_ticks_field_offset(signature_length) + 4
    }

    /// File offset of the `num_ticks` field.
    pub fn num_ticks_field_offset(signature_length: usize) -> usize {
        SIGNED_PREFIX_SIZE + signature_length
    }

    fn write_signed_prefix<W: Write>(&self, out: &mut W) -> ReplayResult<()> {
        out.write_u8(self.version.major)?;
        out.write_u8(self.version.minor)?;
        out.write_u16::<LittleEndian>(self.version.patch)?;
        out.write_all(&self.digest)?;
        out.write_u8(self.update_frequency)?;
        out.write_u32::<LittleEndian>(self.timestamp)?;
        out.write_all(&self.nonce)?;
        out.write_u16::<LittleEndian>(self.reported_signature_length)?;
        Ok(())
    }

    /// Appends the signed header to `out` and returns its signature.
    pub fn write(&self, out: &mut Vec<u8>, scheme: &mut dyn ChecksumScheme) -> ReplayResult<Vec<u8>> {
        if self.reported_signature_length as usize != scheme.stream_size() {
            return Err(ReplayError::Key(format!(
                "header reports {} signature bytes but the scheme produces {}",
                self.reported_signature_length,
                scheme.stream_size()
            )));
        }
        let signature = {
            let mut writer = ChecksumWriter::new(&mut *out, scheme, true);
            self.write_signed_prefix(&mut writer)?;
            writer.finalise()
        };
        let signature = signature.ok_or_else(|| {
            ReplayError::Key(format!("could not sign header: {}", scheme.error_string()))
        })?;
        out.write_u32::<LittleEndian>(self.num_ticks)?;
        Ok(signature)
    }

    /// Parses a complete header from the front of `data`, returning the
    /// header, its raw signature bytes and the number of bytes consumed.
    ///
    /// The signature is checked only when a scheme is given. A version this
    /// build cannot read is refused either way.
    pub fn read(
        data: &[u8],
        scheme: Option<&mut dyn ChecksumScheme>,
    ) -> ReplayResult<(Self, Vec<u8>, usize)> {
        let total = Self::required_length(data)
            .filter(|needed| data.len() >= *needed)
            .ok_or_else(|| ReplayError::Corrupted("header is truncated".into()))?;

        let mut fixed = [0u8; SIGNED_PREFIX_SIZE];
        let mut signature = Vec::new();
        let verifying = scheme.is_some();
        if let Some(s) = scheme.as_deref() {
            let reported = Self::reported_sig_len(data);
            if reported != s.stream_size() {
                return Err(ReplayError::SignatureMismatch(format!(
                    "header reports {} signature bytes, expected {}",
                    reported,
                    s.stream_size()
                )));
            }
        }

        let mut reader = ChecksumReader::new(&data[..total - 4], scheme, true);
        reader.read_exact(&mut fixed)?;
        if verifying {
            if !reader.verify(Some(&mut signature)) {
                return Err(ReplayError::SignatureMismatch(
                    "header signature did not verify".into(),
                ));
            }
        } else {
            reader.read_to_end(&mut signature)?;
        }

        let mut fields = ByteReader::new(&fixed);
        let version = ProtocolVersion::new(fields.u8()?, fields.u8()?, fields.u16()?);
        if !ProtocolVersion::CURRENT.supports(&version) {
            return Err(ReplayError::UnsupportedVersion {
                found: version,
                expected: ProtocolVersion::CURRENT,
            });
        }
        let header = Self {
            version,
            digest: fields.array()?,
            update_frequency: fields.u8()?,
            timestamp: fields.u32()?,
            nonce: fields.array()?,
            reported_signature_length: fields.u16()?,
            num_ticks: ByteReader::new(&data[total - 4..total]).u32()?,
        };
        Ok((header, signature, total))
    }

    fn reported_sig_len(data: &[u8]) -> usize {
        u16::from_le_bytes([data[SIG_LEN_OFFSET], data[SIG_LEN_OFFSET + 1]]) as usize
    }
}
