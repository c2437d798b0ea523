// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Background task submission.
//!
//! A scheduler only runs jobs. Results travel back to their owner over a
//! channel the owner drains on its own thread, so completion handling is
//! always single-threaded.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::thread::JoinHandle;
use tracing::{trace, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskScheduler: Send + Sync {
    fn submit(&self, job: Job);
}

/// Fixed pool of worker threads fed through a channel.
pub struct ThreadScheduler {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadScheduler {
    pub fn new(num_threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let workers = (0..num_threads.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("tickvault-task-{}", i))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                        trace!(worker = i, "task worker exiting");
                    })
                    .map_err(|e| warn!(error = %e, "could not spawn task worker"))
                    .ok()
            })
            .collect();
        Self {
            jobs: Some(tx),
            workers,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }
}

impl TaskScheduler for ThreadScheduler {
    fn submit(&self, job: Job) {
        let Some(tx) = &self.jobs else { return };
        if self.workers.is_empty() {
            // No worker could be spawned; run on the caller's thread.
            job();
            return;
        }
        if let Err(e) = tx.send(job) {
            (e.into_inner())();
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Queues jobs until [`InlineScheduler::run_pending`] is called, which
/// makes background work fully deterministic in tests and tools.
#[derive(Default)]
pub struct InlineScheduler {
    queue: Mutex<VecDeque<Job>>,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs queued jobs, including any they submit, until none are left.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl TaskScheduler for InlineScheduler {
    fn submit(&self, job: Job) {
        self.queue.lock().push_back(job);
    }
}
