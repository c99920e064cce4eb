// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! # Accelara
//!
//! Segmented HTTP download engine with per-chunk resume, adaptive
//! single-stream fallback and a structured progress stream.
//!
//! ## Features
//!
//! - **Concurrent Range Downloads**: up to eight parallel byte-range workers
//! - **Incremental Resume**: per-chunk part files survive pauses and crashes
//! - **Adaptive Fallback**: one-way downgrade to a single connection when a
//!   server rejects parallel ranges
//! - **Verified Artifacts**: streaming SHA-256 verification and an atomic
//!   publish step
//! - **Uniform Progress Stream**: newline-delimited JSON events for an
//!   external supervisor (GUI, CLI or orchestrator)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use accelara::{DownloadEngine, DownloadJob, JsonLineReporter};
//!
//! #[tokio::main]
//! async fn main() -> accelara::Result<()> {
//!     let job = DownloadJob::new(
//!         "https://example.com/release.tar.gz",
//!         "/tmp/release.tar.gz",
//!         "job-1",
//!     );
//!
//!     let reporter = Arc::new(JsonLineReporter::stdout(job.download_id.clone()));
//!     let engine = DownloadEngine::new(job, reporter)?;
//!     let outcome = engine.run().await?;
//!
//!     println!("Downloaded {} bytes to {}", outcome.size, outcome.path.display());
//!     Ok(())
//! }
//! ```

// Initialize rustls crypto provider once (required when using the
// no-provider reqwest feature)
#[cfg(feature = "rustls-ring")]
use std::sync::Once;

#[cfg(feature = "rustls-ring")]
static INIT_RUSTLS: Once = Once::new();

/// Initialize the TLS crypto provider (ring backend).
/// Must run before the first reqwest `Client` is built.
#[cfg(feature = "rustls-ring")]
pub(crate) fn init_tls() {
    INIT_RUSTLS.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

#[cfg(not(feature = "rustls-ring"))]
pub(crate) fn init_tls() {}

pub mod assembler;
pub mod byte_size;
pub mod checksum;
pub mod chunking;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod failure_tracker;
pub mod logging;
pub mod probe;
pub mod progress;
pub mod rate_limiter;
pub mod reporter;
pub mod utils;

// Re-export commonly used types
pub use byte_size::{format_byte_size, parse_byte_size};
pub use chunking::{plan_chunks, Chunk};
pub use config::DownloadJob;
pub use engine::{DownloadEngine, DownloadOutcome, EngineMode};
pub use error::{AccelaraError, Result};
pub use events::{Event, EventSink};
pub use probe::{probe, ProbeResult};
pub use reporter::{JsonLineReporter, NullReporter, Reporter};
