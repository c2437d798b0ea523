// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! 32-bit XOR checksum.

use super::{ChecksumError, ChecksumResult, ChecksumScheme};

/// XORs the input together one little-endian 32-bit word at a time. A
/// trailing partial word is zero-padded in its high bytes.
#[derive(Debug, Default)]
pub struct XorScheme {
    value: u32,
    remainder: u32,
    remainder_len: u32,
    error: Option<ChecksumError>,
}

impl XorScheme {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_value(initial: u32) -> Self {
        Self {
            value: initial,
            ..Self::default()
        }
    }

    fn pad_remainder(&mut self) {
        if self.remainder_len > 0 {
            self.value ^= self.remainder;
            self.remainder = 0;
            self.remainder_len = 0;
        }
    }
}

impl ChecksumScheme for XorScheme {
    fn reset(&mut self) {
        self.value = 0;
        self.remainder = 0;
        self.remainder_len = 0;
    }

    fn stream_size(&self) -> usize {
        4
    }

    fn read_blob(&mut self, data: &[u8]) {
        let mut word = self.remainder;
        let mut len = self.remainder_len;
        for &byte in data {
            word |= (byte as u32) << (len * 8);
            len += 1;
            if len == 4 {
                self.value ^= word;
                word = 0;
                len = 0;
            }
        }
        self.remainder = word;
        self.remainder_len = len;
    }

    fn compute(&mut self) -> ChecksumResult<Vec<u8>> {
        self.pad_remainder();
        Ok(self.value.to_le_bytes().to_vec())
    }

    fn last_error(&self) -> Option<&ChecksumError> {
        self.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ChecksumError>) {
        self.error = error;
    }
}
