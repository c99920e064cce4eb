// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Shared progress accounting.
//!
//! Workers race; the board keeps the per-chunk byte counts and the aggregate
//! under one mutex so `downloaded == sum(chunk_progress)` holds at every
//! observation point. The speed meter lives behind its own mutex so speed
//! sampling never contends with chunk updates.

use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Instant;

use crate::chunking::Chunk;

/// Per-chunk progress vector plus derived aggregate
#[derive(Debug)]
pub struct ProgressBoard {
    inner: Mutex<BoardInner>,
}

#[derive(Debug)]
struct BoardInner {
    chunks: Vec<Chunk>,
    progress: Vec<u64>,
}

/// One observation of the board
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    /// Bytes downloaded per chunk, index order
    pub chunk_progress: Vec<u64>,
    /// Aggregate downloaded bytes
    pub downloaded: u64,
}

impl ProgressBoard {
    /// Create a board over a chunk plan
    pub fn new(chunks: Vec<Chunk>) -> Self {
        let progress = vec![0; chunks.len()];
        Self {
            inner: Mutex::new(BoardInner { chunks, progress }),
        }
    }

    /// Number of chunks tracked
    pub fn chunk_count(&self) -> usize {
        self.inner.lock().unwrap().chunks.len()
    }

    /// Set a chunk's progress to an absolute byte count (resume pre-seed,
    /// already-complete part files). Returns the new aggregate.
    pub fn set_chunk(&self, index: usize, bytes: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.chunks[index].len();
        inner.progress[index] = bytes.min(cap);
        inner.progress.iter().sum()
    }

    /// Add freshly written bytes to a chunk. Returns the new aggregate.
    pub fn add_to_chunk(&self, index: usize, delta: u64) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.chunks[index].len();
        inner.progress[index] = (inner.progress[index] + delta).min(cap);
        inner.progress.iter().sum()
    }

    /// Reset every chunk to zero (adaptive fallback wipes the plan)
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.progress.iter_mut().for_each(|p| *p = 0);
    }

    /// Consistent snapshot of the vector and its sum
    pub fn snapshot(&self) -> BoardSnapshot {
        let inner = self.inner.lock().unwrap();
        BoardSnapshot {
            downloaded: inner.progress.iter().sum(),
            chunk_progress: inner.progress.clone(),
        }
    }

    /// Whether every chunk has reached its full length
    pub fn all_complete(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .chunks
            .iter()
            .zip(&inner.progress)
            .all(|(chunk, done)| *done == chunk.len())
    }

    /// Chunk-progress objects for the event stream
    pub fn to_event_value(&self) -> Value {
        let inner = self.inner.lock().unwrap();
        Value::Array(
            inner
                .chunks
                .iter()
                .zip(&inner.progress)
                .map(|(chunk, done)| {
                    json!({
                        "index": chunk.index,
                        "start": chunk.start,
                        "end": chunk.end,
                        "downloaded": done,
                    })
                })
                .collect(),
        )
    }
}

/// Aggregate wall-clock speed estimator.
///
/// Speed is derived from the aggregate downloaded count between two
/// successive samples, never from per-chunk deltas, so near-simultaneous
/// worker emissions cannot overcount.
#[derive(Debug)]
pub struct SpeedMeter {
    inner: Mutex<MeterInner>,
}

#[derive(Debug)]
struct MeterInner {
    last_downloaded: u64,
    last_time: Instant,
    last_speed: f64,
}

impl SpeedMeter {
    /// Start a meter from an initial byte count (non-zero on resume)
    pub fn new(initial_downloaded: u64) -> Self {
        Self {
            inner: Mutex::new(MeterInner {
                last_downloaded: initial_downloaded,
                last_time: Instant::now(),
                last_speed: 0.0,
            }),
        }
    }

    /// Record an observation and return the current bytes/sec estimate.
    ///
    /// Samples closer than 100 ms apart return the previous estimate to keep
    /// the figure stable across racing workers.
    pub fn sample(&self, downloaded: u64) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        let elapsed = inner.last_time.elapsed().as_secs_f64();
        if elapsed < 0.1 {
            return inner.last_speed;
        }

        let delta = downloaded.saturating_sub(inner.last_downloaded);
        inner.last_speed = delta as f64 / elapsed;
        inner.last_downloaded = downloaded;
        inner.last_time = Instant::now();
        inner.last_speed
    }

    /// Seconds remaining at the current speed, zero when unknowable
    pub fn eta(&self, downloaded: u64, total: u64) -> u64 {
        let speed = self.inner.lock().unwrap().last_speed;
        if speed > 0.0 && downloaded < total {
            ((total - downloaded) as f64 / speed) as u64
        } else {
            0
        }
    }
}
