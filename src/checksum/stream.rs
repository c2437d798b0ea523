// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Stream adapters that checksum everything passing through them.

use std::io::{self, Cursor, Read, Write};

use super::ChecksumScheme;

/// Bytes still unread in an in-memory source.
pub trait RemainingLength {
    fn remaining_length(&self) -> usize;
}

impl RemainingLength for &[u8] {
    fn remaining_length(&self) -> usize {
        self.len()
    }
}

impl<T: AsRef<[u8]>> RemainingLength for Cursor<T> {
    fn remaining_length(&self) -> usize {
        let len = self.get_ref().as_ref().len() as u64;
        len.saturating_sub(self.position()) as usize
    }
}

/// Writes through to `inner` while feeding the scheme. The checksum is
/// appended on [`ChecksumWriter::finalise`] or, failing that, on drop.
pub struct ChecksumWriter<'a, W: Write> {
    inner: W,
    scheme: &'a mut dyn ChecksumScheme,
    signature: Option<Vec<u8>>,
    done: bool,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    /// With `should_reset` false the scheme keeps whatever it was primed
    /// with, which is how chunks chain onto the previous signature.
    pub fn new(inner: W, scheme: &'a mut dyn ChecksumScheme, should_reset: bool) -> Self {
        if should_reset {
            scheme.reset();
        }
        Self {
            inner,
            scheme,
            signature: None,
            done: false,
        }
    }

    /// Appends the checksum and returns it. Later calls return the same
    /// bytes without writing again. `None` means signing failed; the
    /// scheme carries the reason.
    pub fn finalise(&mut self) -> Option<Vec<u8>> {
        if !self.done {
            self.done = true;
            self.signature = self.scheme.add_to_stream(&mut self.inner).ok();
        }
        self.signature.clone()
    }

    /// Drops the trailer. Nothing further is appended.
    pub fn cancel(&mut self) {
        self.done = true;
    }

    pub fn into_inner(mut self) -> W
    where
        W: Default,
    {
        self.finalise();
        std::mem::take(&mut self.inner)
    }
}

impl<W: Write> Write for ChecksumWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.done {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "write after checksum was finalised",
            ));
        }
        let n = self.inner.write(buf)?;
        self.scheme.read_blob(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for ChecksumWriter<'_, W> {
    fn drop(&mut self) {
        self.finalise();
    }
}

/// Reads from `inner` while feeding the scheme. Call
/// [`ChecksumReader::verify`] once the payload has been consumed to read
/// and check the trailer.
///
/// Without a scheme the reader is a plain pass-through and verification
/// trivially succeeds.
pub struct ChecksumReader<'a, R: Read> {
    inner: R,
    scheme: Option<&'a mut dyn ChecksumScheme>,
    verified: Option<bool>,
}

impl<'a, R: Read> ChecksumReader<'a, R> {
    pub fn new(inner: R, scheme: Option<&'a mut dyn ChecksumScheme>, should_reset: bool) -> Self {
        let mut scheme = scheme;
        if should_reset {
            if let Some(s) = scheme.as_deref_mut() {
                s.reset();
            }
        }
        Self {
            inner,
            scheme,
            verified: None,
        }
    }

    pub fn stream_size(&self) -> usize {
        self.scheme.as_ref().map_or(0, |s| s.stream_size())
    }

    /// Verifies the trailer. The result is cached, so a second call does
    /// not consume more input.
    pub fn verify(&mut self, checksum_out: Option<&mut Vec<u8>>) -> bool {
        if let Some(result) = self.verified {
            return result;
        }
        let result = match self.scheme.as_deref_mut() {
            Some(scheme) => scheme.verify_from_stream(&mut self.inner, checksum_out),
            None => true,
        };
        self.verified = Some(result);
        result
    }

    /// Verifies (if not already) and hands back the inner reader.
    pub fn finish(mut self) -> (R, bool) {
        let ok = self.verify(None);
        (self.inner, ok)
    }
}

impl<R: Read + RemainingLength> ChecksumReader<'_, R> {
    /// Payload bytes left before the trailer.
    pub fn remaining_length(&self) -> usize {
        let raw = self.inner.remaining_length();
        if raw == 0 {
            return 0;
        }
        if self.verified.is_some() {
            return raw;
        }
        raw.saturating_sub(self.stream_size())
    }
}

impl<R: Read> Read for ChecksumReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(scheme) = self.scheme.as_deref_mut() {
            scheme.read_blob(&buf[..n]);
        }
        Ok(n)
    }
}
