// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;
use crate::format::header::ProtocolVersion;

/// Coarse classification of a failure, shared by the reader, the tick
/// loader and the controller when reporting to their owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The log was written by an incompatible protocol version.
    UnsupportedVersion,
    /// The signing or verifying key is unusable.
    Key,
    /// A signature or digest did not match its payload.
    SignatureMismatch,
    /// Malformed lengths, bad block types, out-of-order game times.
    Corrupted,
    /// A listener or handler refused the data.
    Rejected,
    /// The replay file could not be opened.
    FileMissing,
    /// Underlying IO failure.
    Io,
    /// Anything that does not fit the above.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UnsupportedVersion => "Unsupported version",
            ErrorKind::Key => "Key error",
            ErrorKind::SignatureMismatch => "Signature mismatch",
            ErrorKind::Corrupted => "File corrupted",
            ErrorKind::Rejected => "Rejected",
            ErrorKind::FileMissing => "File missing",
            ErrorKind::Io => "IO error",
            ErrorKind::Other => "Unknown error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported protocol version {found} (this build speaks {expected})")]
    UnsupportedVersion {
        found: ProtocolVersion,
        expected: ProtocolVersion,
    },

    #[error("Key error: {0}")]
    Key(String),

    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("File corrupted: {0}")]
    Corrupted(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("A recording is already being written to {0}")]
    PathInUse(PathBuf),

    #[error("File missing: {0}")]
    FileMissing(String),

    #[error("Writer is closed")]
    Closed,
}

impl ReplayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplayError::Io(_) => ErrorKind::Io,
            ReplayError::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            ReplayError::Key(_) => ErrorKind::Key,
            ReplayError::SignatureMismatch(_) => ErrorKind::SignatureMismatch,
            ReplayError::Corrupted(_) => ErrorKind::Corrupted,
            ReplayError::Rejected(_) => ErrorKind::Rejected,
            ReplayError::FileMissing(_) => ErrorKind::FileMissing,
            ReplayError::Compression(_) => ErrorKind::Corrupted,
            ReplayError::Serialization(_)
            | ReplayError::PathInUse(_)
            | ReplayError::Closed => ErrorKind::Other,
        }
    }

    /// Rebuilds an error from a stored `(kind, message)` pair.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Key => ReplayError::Key(message),
            ErrorKind::SignatureMismatch => ReplayError::SignatureMismatch(message),
            ErrorKind::Corrupted => ReplayError::Corrupted(message),
            ErrorKind::Rejected => ReplayError::Rejected(message),
            ErrorKind::FileMissing => ReplayError::FileMissing(message),
            ErrorKind::Io => ReplayError::Io(io::Error::new(io::ErrorKind::Other, message)),
            ErrorKind::UnsupportedVersion | ErrorKind::Other => ReplayError::Corrupted(message),
        }
    }
}

impl From<CodecError> for ReplayError {
    fn from(e: CodecError) -> Self {
        ReplayError::Corrupted(e.to_string())
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
