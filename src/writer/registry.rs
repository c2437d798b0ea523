// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Process-wide registry of paths with an active writer.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use super::ReplayWriter;
use crate::error::{ReplayError, ReplayResult};

static ACTIVE_PATHS: OnceLock<Mutex<FxHashSet<PathBuf>>> = OnceLock::new();

fn active_paths() -> &'static Mutex<FxHashSet<PathBuf>> {
    ACTIVE_PATHS.get_or_init(|| Mutex::new(FxHashSet::default()))
}

/// Exclusive claim on a path. Dropping it releases the path.
#[derive(Debug)]
pub struct PathLease {
    path: PathBuf,
}

impl PathLease {
    pub fn acquire(path: &Path) -> ReplayResult<Self> {
        let mut active = active_paths().lock();
        if !active.insert(path.to_path_buf()) {
            return Err(ReplayError::PathInUse(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        active_paths().lock().remove(&self.path);
    }
}

pub fn exists_for_path(path: &Path) -> bool {
    active_paths().lock().contains(path)
}

/// True when no writer anywhere in the process holds a path.
pub fn have_all_closed() -> bool {
    active_paths().lock().is_empty()
}

/// A set of writers owned together, typically every recording of one
/// server process.
#[derive(Default)]
pub struct WriterPool {
    writers: Vec<ReplayWriter>,
}

impl WriterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, writer: ReplayWriter) {
        self.writers.push(writer);
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&ReplayWriter> {
        self.writers.iter().find(|w| w.path() == path)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut ReplayWriter> {
        self.writers.iter_mut().find(|w| w.path() == path)
    }

    /// Closes every writer that is not already finalising. With
    /// `finalise` set each one writes its trailing chunk first.
    pub fn close_all(&mut self, finalise: bool) -> ReplayResult<()> {
        let mut first_error = None;
        for writer in self.writers.iter_mut().filter(|w| !w.is_finalising() && !w.is_closed()) {
            if let Err(e) = writer.close(finalise) {
                first_error.get_or_insert(e);
            }
        }
        self.pump();
        first_error.map_or(Ok(()), Err)
    }

    /// Handles outstanding completions and drops writers that have closed.
    /// Returns the number still open.
    pub fn pump(&mut self) -> usize {
        for writer in &mut self.writers {
            writer.process_completions();
        }
        let before = self.writers.len();
        self.writers.retain(|w| !w.is_closed());
        if self.writers.len() != before {
            debug!(closed = before - self.writers.len(), "released closed writers");
        }
        self.writers.len()
    }

    /// Blocks until every queued write has landed, then pumps.
    pub fn wait_idle(&mut self) -> usize {
        for writer in &mut self.writers {
            writer.wait_idle();
        }
        self.pump()
    }

    pub fn have_all_closed(&self) -> bool {
        self.writers.iter().all(|w| w.is_closed())
    }
}
