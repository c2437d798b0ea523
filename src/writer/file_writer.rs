// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ordered background file writes.
//!
//! A [`BackgroundFileWriter`] accepts write, seek, truncate and permission requests
//! and completes them strictly in submission order. Completions are
//! collected by polling, so the owner handles them on its own thread.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, trace};

use crate::error::ReplayResult;

/// Caller-chosen marker echoed back with each completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTag {
    None,
    Chunk(u64),
    Finalised,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// `position` is the file offset the request started at (for a seek,
    /// the offset sought to).
    Completed { position: u64, tag: WriteTag },
    Failed { tag: WriteTag, message: String },
}

pub trait BackgroundFileWriter: Send {
    fn path(&self) -> &Path;

    fn queue_write(&mut self, data: Vec<u8>, tag: WriteTag);

    fn queue_seek(&mut self, offset: u64, tag: WriteTag);

    /// Cuts the file to `len` bytes and continues writing from there.
    fn queue_truncate(&mut self, len: u64, tag: WriteTag);

    /// Marks the file read-only once everything before it is written.
    fn queue_set_read_only(&mut self, tag: WriteTag);

    /// Completions delivered since the last poll, in submission order.
    fn poll_completions(&mut self) -> Vec<FileEvent>;

    /// Blocks until every queued request has completed.
    fn wait_idle(&mut self);

    fn error(&self) -> Option<String>;

    fn has_error(&self) -> bool {
        self.error().is_some()
    }
}

enum Request {
    Write(Vec<u8>, WriteTag),
    Seek(u64, WriteTag),
    Truncate(u64, WriteTag),
    SetReadOnly(WriteTag),
}

/// File writer backed by one worker thread.
pub struct ThreadedFileWriter {
    path: PathBuf,
    requests: Option<Sender<Request>>,
    completions: Receiver<FileEvent>,
    worker: Option<JoinHandle<()>>,
    outstanding: usize,
    ready: Vec<FileEvent>,
    error: Option<String>,
}

impl ThreadedFileWriter {
    /// Opens `path` for writing. With `truncate` unset the existing
    /// contents are kept, which is what resuming a recording needs.
    pub fn open(path: impl Into<PathBuf>, truncate: bool) -> ReplayResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(&path)?;

        let (request_tx, request_rx) = unbounded::<Request>();
        let (completion_tx, completion_rx) = unbounded();
        let worker_path = path.clone();
        let worker = std::thread::Builder::new()
            .name("tickvault-file-writer".into())
            .spawn(move || run_worker(file, worker_path, request_rx, completion_tx))?;

        Ok(Self {
            path,
            requests: Some(request_tx),
            completions: completion_rx,
            worker: Some(worker),
            outstanding: 0,
            ready: Vec::new(),
            error: None,
        })
    }

    fn submit(&mut self, request: Request) {
        let tag = match &request {
            Request::Write(_, tag)
            | Request::Seek(_, tag)
            | Request::Truncate(_, tag)
            | Request::SetReadOnly(tag) => *tag,
        };
        let sent = self
            .requests
            .as_ref()
            .map_or(false, |tx| tx.send(request).is_ok());
        if sent {
            self.outstanding += 1;
        } else {
            self.ready.push(FileEvent::Failed {
                tag,
                message: "file writer thread has stopped".into(),
            });
        }
    }

    fn accept(&mut self, event: FileEvent) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if let FileEvent::Failed { message, .. } = &event {
            self.error.get_or_insert_with(|| message.clone());
        }
        self.ready.push(event);
    }
}

fn run_worker(mut file: File, path: PathBuf, requests: Receiver<Request>, completions: Sender<FileEvent>) {
    let mut failed: Option<String> = None;
    for request in requests {
        let (tag, result) = match request {
            Request::Write(data, tag) => (
                tag,
                file.stream_position()
                    .and_then(|pos| file.write_all(&data).map(|_| pos)),
            ),
            Request::Seek(offset, tag) => (tag, file.seek(SeekFrom::Start(offset))),
            Request::Truncate(len, tag) => (
                tag,
                file.set_len(len).and_then(|_| file.seek(SeekFrom::Start(len))),
            ),
            Request::SetReadOnly(tag) => (
                tag,
                file.flush()
                    .and_then(|_| file.sync_all())
                    .and_then(|_| fs::metadata(&path))
                    .and_then(|meta| {
                        let mut perms = meta.permissions();
                        perms.set_readonly(true);
                        fs::set_permissions(&path, perms)
                    })
                    .and_then(|_| file.stream_position()),
            ),
        };

        // Once a request fails, later ones would write at the wrong place.
        let event = match (&failed, result) {
            (Some(first), _) => FileEvent::Failed {
                tag,
                message: first.clone(),
            },
            (None, Ok(position)) => FileEvent::Completed { position, tag },
            (None, Err(e)) => {
                let message = format!("{}: {}", path.display(), e);
                error!(%message, "background file write failed");
                failed = Some(message.clone());
                FileEvent::Failed { tag, message }
            }
        };
        if completions.send(event).is_err() {
            break;
        }
    }
    trace!(path = %path.display(), "file writer thread exiting");
}

impl BackgroundFileWriter for ThreadedFileWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn queue_write(&mut self, data: Vec<u8>, tag: WriteTag) {
        self.submit(Request::Write(data, tag));
    }

    fn queue_seek(&mut self, offset: u64, tag: WriteTag) {
        self.submit(Request::Seek(offset, tag));
    }

    fn queue_truncate(&mut self, len: u64, tag: WriteTag) {
        self.submit(Request::Truncate(len, tag));
    }

    fn queue_set_read_only(&mut self, tag: WriteTag) {
        self.submit(Request::SetReadOnly(tag));
    }

    fn poll_completions(&mut self) -> Vec<FileEvent> {
        while let Ok(event) = self.completions.try_recv() {
            self.accept(event);
        }
        std::mem::take(&mut self.ready)
    }

    fn wait_idle(&mut self) {
        while self.outstanding > 0 {
            match self.completions.recv() {
                Ok(event) => self.accept(event),
                Err(_) => break,
            }
        }
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

impl Drop for ThreadedFileWriter {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[derive(Debug, Default)]
struct MemoryFileState {
    data: Vec<u8>,
    read_only: bool,
}

/// Shared in-memory file. Clones see the same bytes, so one side can
/// write while another reads what has landed so far.
#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    inner: Arc<Mutex<MemoryFileState>>,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(data: Vec<u8>) -> Self {
        let file = Self::new();
        file.inner.lock().data = data;
        file
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.lock().read_only
    }

    /// Copies bytes from `offset` into `buf`, returning how many were
    /// available.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let state = self.inner.lock();
        if offset >= state.data.len() {
            return 0;
        }
        let n = buf.len().min(state.data.len() - offset);
        buf[..n].copy_from_slice(&state.data[offset..offset + n]);
        n
    }

    fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<(), String> {
        let mut state = self.inner.lock();
        if state.read_only {
            return Err("file is read-only".into());
        }
        let end = offset + bytes.len();
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn set_len(&self, len: usize) -> Result<(), String> {
        let mut state = self.inner.lock();
        if state.read_only {
            return Err("file is read-only".into());
        }
        state.data.resize(len, 0);
        Ok(())
    }

    fn set_read_only(&self) {
        self.inner.lock().read_only = true;
    }
}

/// Writer over a [`MemoryFile`]. Requests complete immediately; their
/// events are held until the next poll.
pub struct MemoryFileWriter {
    path: PathBuf,
    file: MemoryFile,
    cursor: usize,
    ready: Vec<FileEvent>,
    error: Option<String>,
}

impl MemoryFileWriter {
    pub fn new(path: impl Into<PathBuf>, file: MemoryFile) -> Self {
        Self {
            path: path.into(),
            file,
            cursor: 0,
            ready: Vec::new(),
            error: None,
        }
    }

    pub fn file(&self) -> &MemoryFile {
        &self.file
    }

    fn complete(&mut self, tag: WriteTag, result: Result<u64, String>) {
        let event = match (&self.error, result) {
            (Some(first), _) => FileEvent::Failed {
                tag,
                message: first.clone(),
            },
            (None, Ok(position)) => FileEvent::Completed { position, tag },
            (None, Err(message)) => {
                self.error = Some(message.clone());
                FileEvent::Failed { tag, message }
            }
        };
        self.ready.push(event);
    }
}

impl BackgroundFileWriter for MemoryFileWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn queue_write(&mut self, data: Vec<u8>, tag: WriteTag) {
        let start = self.cursor;
        let result = self.file.write_at(start, &data).map(|_| start as u64);
        if result.is_ok() {
            self.cursor += data.len();
        }
        self.complete(tag, result);
    }

    fn queue_seek(&mut self, offset: u64, tag: WriteTag) {
        self.cursor = offset as usize;
        self.complete(tag, Ok(offset));
    }

    fn queue_truncate(&mut self, len: u64, tag: WriteTag) {
        let result = self.file.set_len(len as usize).map(|_| len);
        if result.is_ok() {
            self.cursor = len as usize;
        }
        self.complete(tag, result);
    }

    fn queue_set_read_only(&mut self, tag: WriteTag) {
        self.file.set_read_only();
        self.complete(tag, Ok(self.cursor as u64));
    }

    fn poll_completions(&mut self) -> Vec<FileEvent> {
        std::mem::take(&mut self.ready)
    }

    fn wait_idle(&mut self) {}

    fn error(&self) -> Option<String> {
        self.error.clone()
    }
}
