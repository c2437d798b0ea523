// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Composition of two schemes: the first digests the payload, the second
//! checksums (typically signs) the first's output.

use super::{ChecksumError, ChecksumResult, ChecksumScheme};

pub struct ChainedScheme {
    first: Box<dyn ChecksumScheme>,
    second: Box<dyn ChecksumScheme>,
    error: Option<ChecksumError>,
}

impl ChainedScheme {
    pub fn new(first: Box<dyn ChecksumScheme>, second: Box<dyn ChecksumScheme>) -> Self {
        Self {
            first,
            second,
            error: None,
        }
    }

    /// Feeds the first scheme's digest into the second.
    fn chain_into_second(&mut self) -> ChecksumResult<()> {
        let inner = self.first.compute()?;
        self.second.read_blob(&inner);
        Ok(())
    }
}

impl ChecksumScheme for ChainedScheme {
    fn reset(&mut self) {
        self.first.reset();
        self.second.reset();
    }

    fn stream_size(&self) -> usize {
        self.second.stream_size()
    }

    fn read_blob(&mut self, data: &[u8]) {
        self.first.read_blob(data);
    }

    fn compute(&mut self) -> ChecksumResult<Vec<u8>> {
        // The second scheme only ever sees one digest per payload.
        self.second.reset();
        self.chain_into_second()?;
        self.second.compute()
    }

    fn verify_checksum(&mut self, expected: &[u8]) -> ChecksumResult<()> {
        self.second.reset();
        self.chain_into_second()?;
        self.second.verify_checksum(expected)
    }

    fn last_error(&self) -> Option<&ChecksumError> {
        self.error
            .as_ref()
            .or_else(|| self.first.last_error())
            .or_else(|| self.second.last_error())
    }

    fn set_error(&mut self, error: Option<ChecksumError>) {
        if error.is_none() {
            self.first.clear_error();
            self.second.clear_error();
        }
        self.error = error;
    }
}
