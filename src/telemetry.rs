// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise logging. `RUST_LOG` overrides `default_filter`.
///
/// Returns false if a global subscriber was already installed, which is
/// the normal case when several tools or tests share a process.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Registers descriptions for the counters this crate emits. The
/// recorder itself is installed by the host application.
pub fn describe_metrics() {
    metrics::describe_counter!("tickvault_chunks_written_total", "Chunks signed and queued for writing");
    metrics::describe_counter!("tickvault_chunks_verified_total", "Chunk signatures checked by readers");
    metrics::describe_counter!("tickvault_ticks_dispatched_total", "Ticks played back to a handler");
}
