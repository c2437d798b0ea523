// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Unkeyed digest schemes.

use sha2::Digest;

use super::{ChecksumError, ChecksumResult, ChecksumScheme};

/// Any RustCrypto hash as a checksum scheme.
pub struct DigestScheme<D> {
    hasher: D,
    error: Option<ChecksumError>,
}

pub type Md5Scheme = DigestScheme<md5::Md5>;
pub type Sha256Scheme = DigestScheme<sha2::Sha256>;

impl<D: Digest + Clone + Send> DigestScheme<D> {
    pub fn new() -> Self {
        Self {
            hasher: D::new(),
            error: None,
        }
    }
}

impl<D: Digest + Clone + Send> Default for DigestScheme<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Digest + Clone + Send> ChecksumScheme for DigestScheme<D> {
    fn reset(&mut self) {
        self.hasher = D::new();
    }

    fn stream_size(&self) -> usize {
        <D as Digest>::output_size()
    }

    fn read_blob(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn compute(&mut self) -> ChecksumResult<Vec<u8>> {
        Ok(self.hasher.clone().finalize().to_vec())
    }

    fn last_error(&self) -> Option<&ChecksumError> {
        self.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ChecksumError>) {
        self.error = error;
    }
}

#[derive(Default)]
pub struct Blake3Scheme {
    hasher: blake3::Hasher,
    error: Option<ChecksumError>,
}

impl Blake3Scheme {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumScheme for Blake3Scheme {
    fn reset(&mut self) {
        self.hasher.reset();
    }

    fn stream_size(&self) -> usize {
        blake3::OUT_LEN
    }

    fn read_blob(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn compute(&mut self) -> ChecksumResult<Vec<u8>> {
        Ok(self.hasher.finalize().as_bytes().to_vec())
    }

    fn last_error(&self) -> Option<&ChecksumError> {
        self.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ChecksumError>) {
        self.error = error;
    }
}

/// CRC-64 (ECMA) stored little-endian.
pub struct Crc64Scheme {
    digest: crc64fast::Digest,
    error: Option<ChecksumError>,
}

impl Crc64Scheme {
    pub fn new() -> Self {
        Self {
            digest: crc64fast::Digest::new(),
            error: None,
        }
    }
}

impl Default for Crc64Scheme {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumScheme for Crc64Scheme {
    fn reset(&mut self) {
        self.digest = crc64fast::Digest::new();
    }

    fn stream_size(&self) -> usize {
        8
    }

    fn read_blob(&mut self, data: &[u8]) {
        self.digest.write(data);
    }

    fn compute(&mut self) -> ChecksumResult<Vec<u8>> {
        Ok(self.digest.sum64().to_le_bytes().to_vec())
    }

    fn last_error(&self) -> Option<&ChecksumError> {
        self.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ChecksumError>) {
        self.error = error;
    }
}
