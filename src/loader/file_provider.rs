// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Read-only file access for the tick loader.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::writer::MemoryFile;

/// Opens files for reading. End of file is a zero-length read and errors
/// surface through `io::Result`; dropping the handle closes it.
pub trait FileProvider: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileProvider;

impl FileProvider for StdFileProvider {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }
}

/// Serves [`MemoryFile`]s by path. A file may still be growing while it
/// is read; each open sees whatever has landed by the time it reads.
#[derive(Default)]
pub struct MemoryFileProvider {
    files: Mutex<FxHashMap<PathBuf, MemoryFile>>,
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, file: MemoryFile) {
        self.files.lock().insert(path.into(), file);
    }

    pub fn remove(&self, path: &Path) -> Option<MemoryFile> {
        self.files.lock().remove(path)
    }
}

impl FileProvider for MemoryFileProvider {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let file = self.files.lock().get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
        })?;
        Ok(Box::new(MemoryFileHandle { file, position: 0 }))
    }
}

struct MemoryFileHandle {
    file: MemoryFile,
    position: usize,
}

impl Read for MemoryFileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read_at(self.position, buf);
        self.position += n;
        Ok(n)
    }
}
