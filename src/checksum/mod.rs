// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Pluggable checksum and signature schemes.
//!
//! Every scheme accumulates bytes through [`ChecksumScheme::read_blob`] and
//! produces a fixed-size trailer of [`ChecksumScheme::stream_size`] bytes.
//! Schemes carry a sticky error: a scheme built from bad key material, or
//! one that has just failed verification, reports `is_good() == false`
//! until the error is cleared.

pub mod chained;
pub mod digest;
pub mod signature;
pub mod stream;
pub mod xor;

use std::io::{self, Read, Write};
use thiserror::Error;

pub use chained::ChainedScheme;
pub use digest::{Blake3Scheme, Crc64Scheme, DigestScheme, Md5Scheme, Sha256Scheme};
pub use signature::{generate_key_pair, Ed25519Scheme};
pub use stream::{ChecksumReader, ChecksumWriter, RemainingLength};
pub use xor::XorScheme;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("Key error: {0}")]
    Key(String),
    #[error("Checksum mismatch")]
    Mismatch,
    #[error("Insufficient data on stream: needed {needed} bytes, found {found}")]
    Truncated { needed: usize, found: usize },
    #[error("Signing failed: {0}")]
    Signing(String),
    #[error("Stream error: {0}")]
    Io(#[from] io::Error),
}

pub type ChecksumResult<T> = Result<T, ChecksumError>;

pub trait ChecksumScheme: Send {
    /// Clears the running digest. The sticky error is left alone.
    fn reset(&mut self);

    /// Number of bytes this scheme appends to a stream.
    fn stream_size(&self) -> usize;

    fn read_blob(&mut self, data: &[u8]);

    /// Computes the checksum over everything fed since the last reset.
    /// Calling this twice without feeding more data yields the same bytes.
    fn compute(&mut self) -> ChecksumResult<Vec<u8>>;

    /// Checks `expected` against the running digest. Schemes with a native
    /// verify primitive override this instead of recomputing.
    fn verify_checksum(&mut self, expected: &[u8]) -> ChecksumResult<()> {
        let computed = self.compute()?;
        if computed.len() != self.stream_size() {
            return Err(ChecksumError::Signing(
                "scheme did not produce the advertised number of bytes".into(),
            ));
        }
        if computed.as_slice() == expected {
            Ok(())
        } else {
            Err(ChecksumError::Mismatch)
        }
    }

    fn last_error(&self) -> Option<&ChecksumError>;

    fn set_error(&mut self, error: Option<ChecksumError>);

    fn is_good(&self) -> bool {
        self.last_error().is_none()
    }

    fn error_string(&self) -> String {
        self.last_error().map(|e| e.to_string()).unwrap_or_default()
    }

    fn clear_error(&mut self) {
        self.set_error(None);
    }

    /// Appends the computed checksum to `out` and returns the bytes written.
    fn add_to_stream(&mut self, out: &mut dyn Write) -> ChecksumResult<Vec<u8>> {
        let checksum = match self.compute() {
            Ok(c) => c,
            Err(e) => {
                let message = e.to_string();
                self.set_error(Some(e));
                return Err(ChecksumError::Signing(message));
            }
        };
        out.write_all(&checksum)?;
        Ok(checksum)
    }

    /// Reads exactly `stream_size()` bytes from `input` and verifies them,
    /// optionally copying the raw checksum bytes to `checksum_out`.
    ///
    /// On failure the sticky error is set and `false` returned.
    fn verify_from_stream(
        &mut self,
        input: &mut dyn Read,
        checksum_out: Option<&mut Vec<u8>>,
    ) -> bool {
        let size = self.stream_size();
        let mut expected = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match input.read(&mut expected[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.set_error(Some(ChecksumError::Io(e)));
                    return false;
                }
            }
        }
        if filled < size {
            self.set_error(Some(ChecksumError::Truncated {
                needed: size,
                found: filled,
            }));
            return false;
        }

        if let Some(out) = checksum_out {
            out.extend_from_slice(&expected);
        }

        match self.verify_checksum(&expected) {
            Ok(()) => true,
            Err(e) => {
                self.set_error(Some(e));
                false
            }
        }
    }
}

/// Builds the recording scheme used by writers: SHA-256 over the payload,
/// then an Ed25519 signature over the digest.
pub fn replay_signer(private_key_hex: &str) -> Box<dyn ChecksumScheme> {
    Box::new(ChainedScheme::new(
        Box::new(Sha256Scheme::new()),
        Box::new(Ed25519Scheme::from_signing_hex(private_key_hex)),
    ))
}

/// Verify-only counterpart of [`replay_signer`].
pub fn replay_verifier(public_key_hex: &str) -> Box<dyn ChecksumScheme> {
    Box::new(ChainedScheme::new(
        Box::new(Sha256Scheme::new()),
        Box::new(Ed25519Scheme::from_verifying_hex(public_key_hex)),
    ))
}
