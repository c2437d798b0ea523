// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ed25519 signature scheme.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};

use super::{ChecksumError, ChecksumResult, ChecksumScheme};

enum KeyMaterial {
    Signing(SigningKey),
    Verifying(VerifyingKey),
    Invalid,
}

/// Signs (or verifies) the bytes fed since the last reset.
///
/// Ed25519 needs the whole message, so input is buffered; in practice it
/// sits behind a digest in a [`super::ChainedScheme`] and only ever sees
/// 32 bytes.
pub struct Ed25519Scheme {
    key: KeyMaterial,
    message: Vec<u8>,
    error: Option<ChecksumError>,
}

impl Ed25519Scheme {
    pub fn from_signing_key(key: SigningKey) -> Self {
        Self::with_key(KeyMaterial::Signing(key))
    }

    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self::with_key(KeyMaterial::Verifying(key))
    }

    /// Builds a signing scheme from a hex-encoded 32-byte seed. Bad input
    /// yields a scheme whose `is_good()` is false.
    pub fn from_signing_hex(hex_seed: &str) -> Self {
        match decode_key(hex_seed) {
            Ok(seed) => Self::from_signing_key(SigningKey::from_bytes(&seed)),
            Err(reason) => Self::invalid(format!("bad private key: {}", reason)),
        }
    }

    /// Builds a verify-only scheme from a hex-encoded public key.
    pub fn from_verifying_hex(hex_key: &str) -> Self {
        let parsed = decode_key(hex_key).and_then(|bytes| {
            VerifyingKey::from_bytes(&bytes).map_err(|e| e.to_string())
        });
        match parsed {
            Ok(key) => Self::from_verifying_key(key),
            Err(reason) => Self::invalid(format!("bad public key: {}", reason)),
        }
    }

    fn with_key(key: KeyMaterial) -> Self {
        Self {
            key,
            message: Vec::new(),
            error: None,
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            key: KeyMaterial::Invalid,
            message: Vec::new(),
            error: Some(ChecksumError::Key(reason)),
        }
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        match &self.key {
            KeyMaterial::Signing(k) => Some(k.verifying_key()),
            KeyMaterial::Verifying(k) => Some(*k),
            KeyMaterial::Invalid => None,
        }
    }

    pub fn verifying_key_hex(&self) -> Option<String> {
        self.verifying_key().map(|k| hex::encode(k.to_bytes()))
    }
}

/// A fresh random key pair as `(private seed hex, public key hex)`.
pub fn generate_key_pair() -> (String, String) {
    let seed: [u8; 32] = rand::random();
    let key = SigningKey::from_bytes(&seed);
    (hex::encode(seed), hex::encode(key.verifying_key().to_bytes()))
}

fn decode_key(hex_key: &str) -> Result<[u8; 32], String> {
    let raw = hex::decode(hex_key.trim()).map_err(|e| e.to_string())?;
    raw.as_slice()
        .try_into()
        .map_err(|_| format!("expected 32 bytes, got {}", raw.len()))
}

impl ChecksumScheme for Ed25519Scheme {
    fn reset(&mut self) {
        self.message.clear();
    }

    fn stream_size(&self) -> usize {
        SIGNATURE_LENGTH
    }

    fn read_blob(&mut self, data: &[u8]) {
        self.message.extend_from_slice(data);
    }

    fn compute(&mut self) -> ChecksumResult<Vec<u8>> {
        match &self.key {
            KeyMaterial::Signing(key) => Ok(key.sign(&self.message).to_bytes().to_vec()),
            KeyMaterial::Verifying(_) => Err(ChecksumError::Key(
                "cannot sign with a verify-only key".into(),
            )),
            KeyMaterial::Invalid => Err(ChecksumError::Key("no usable key".into())),
        }
    }

    fn verify_checksum(&mut self, expected: &[u8]) -> ChecksumResult<()> {
        let key = self
            .verifying_key()
            .ok_or_else(|| ChecksumError::Key("no usable key".into()))?;
        let bytes: [u8; SIGNATURE_LENGTH] = expected
            .try_into()
            .map_err(|_| ChecksumError::Mismatch)?;
        let signature = Signature::from_bytes(&bytes);
        key.verify_strict(&self.message, &signature)
            .map_err(|_| ChecksumError::Mismatch)
    }

    fn last_error(&self) -> Option<&ChecksumError> {
        self.error.as_ref()
    }

    fn set_error(&mut self, error: Option<ChecksumError>) {
        self.error = error;
    }
}
