// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Key/value metadata written once after the header.
//!
//! ```text
//! size(4) | (key: packed string, value: packed string)* | signature
//! ```
//!
//! The signature covers the size prefix and the entries. Callers prime the
//! scheme with the header signature before writing or verifying.

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::checksum::{ChecksumReader, ChecksumScheme, ChecksumWriter};
use crate::codec::{string_stream_size, write_string, ByteReader};
use crate::error::{ReplayError, ReplayResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMetaData {
    entries: Vec<(String, String)>,
}

impl ReplayMetaData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any previous value in place.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn entries_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(k, v)| string_stream_size(k) + string_stream_size(v))
            .sum()
    }

    /// Total record length, or `None` while the size prefix is incomplete.
    pub fn required_length(prefix: &[u8], signature_length: usize) -> Option<usize> {
        let size = ByteReader::new(prefix).u32().ok()?;
        Some(4 + size as usize + signature_length)
    }

    pub fn check_sufficient_length(prefix: &[u8], signature_length: usize) -> bool {
        Self::required_length(prefix, signature_length).map_or(false, |n| prefix.len() >= n)
    }

    /// Appends the signed record to `out`. The scheme is not reset.
    pub fn write(&self, out: &mut Vec<u8>, scheme: &mut dyn ChecksumScheme) -> ReplayResult<Vec<u8>> {
        let size = u32::try_from(self.entries_size())
            .map_err(|_| ReplayError::Serialization("metadata too large".into()))?;
        let signature = {
            let mut writer = ChecksumWriter::new(&mut *out, scheme, false);
            writer.write_u32::<LittleEndian>(size)?;
            for (key, value) in &self.entries {
                write_string(&mut writer, key)?;
                write_string(&mut writer, value)?;
            }
            writer.finalise()
        };
        signature.ok_or_else(|| {
            ReplayError::Key(format!("could not sign metadata: {}", scheme.error_string()))
        })
    }

    /// Parses a whole record from the front of `data`. Without a scheme
    /// the `signature_length` trailing bytes are taken as-is.
    pub fn read(
        data: &[u8],
        signature_length: usize,
        scheme: Option<&mut dyn ChecksumScheme>,
    ) -> ReplayResult<(Self, Vec<u8>, usize)> {
        let total = Self::required_length(data, signature_length)
            .filter(|n| data.len() >= *n)
            .ok_or_else(|| ReplayError::Corrupted("metadata is truncated".into()))?;
        let body_len = total - signature_length;
        let verifying = scheme.is_some();

        let mut reader = ChecksumReader::new(&data[..total], scheme, false);
        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body)?;
        let mut signature = Vec::new();
        if verifying {
            if !reader.verify(Some(&mut signature)) {
                return Err(ReplayError::SignatureMismatch(
                    "metadata signature did not verify".into(),
                ));
            }
        } else {
            reader.read_to_end(&mut signature)?;
        }

        let mut fields = ByteReader::new(&body[4..]);
        let mut metadata = Self::new();
        while !fields.is_empty() {
            let key = fields.string()?;
            let value = fields.string()?;
            metadata.add(key, value);
        }
        Ok((metadata, signature, total))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReplayMetaData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (k, v) in iter {
            metadata.add(k, v);
        }
        metadata
    }
}
