// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Chunk planning.
//!
//! Partitions `[0, total_size)` into at most eight contiguous worker
//! assignments. The cap reflects per-client connection limits most servers
//! apply; more parallel ranges mostly buys anti-abuse responses.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_CHUNKS;

/// One contiguous byte range assigned to a worker.
///
/// `start..=end` is inclusive on both ends, matching the HTTP `Range` wire
/// format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the plan, ascending from zero
    pub index: usize,
    /// Start byte position
    pub start: u64,
    /// End byte position (inclusive)
    pub end: u64,
}

impl Chunk {
    /// Number of bytes this chunk covers
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A chunk always covers at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Plan chunks for a download of `total_size` bytes.
///
/// Returns an empty plan when the size is unknown or the server rejected
/// ranges; the engine then runs single-stream. Otherwise the plan tiles
/// `[0, total_size)` with `min(ceil(total/chunk_size), max_chunks)` chunks,
/// the last one absorbing the remainder.
pub fn plan_chunks(
    total_size: u64,
    accept_ranges: bool,
    concurrency: usize,
    min_chunk_size: u64,
) -> Vec<Chunk> {
    if total_size == 0 || !accept_ranges {
        return Vec::new();
    }

    let max_chunks = concurrency.clamp(1, MAX_CHUNKS) as u64;
    let chunk_size = total_size.div_ceil(max_chunks).max(min_chunk_size.max(1));
    let count = total_size.div_ceil(chunk_size).min(max_chunks);

    let mut chunks = Vec::with_capacity(count as usize);
    let mut start = 0u64;

    for index in 0..count {
        let end = if index == count - 1 {
            // Last chunk gets any remaining bytes
            total_size - 1
        } else {
            (start + chunk_size - 1).min(total_size - 1)
        };

        chunks.push(Chunk {
            index: index as usize,
            start,
            end,
        });

        start = end + 1;
    }

    chunks
}
