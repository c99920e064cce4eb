// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! # Constants
//!
//! Centralized constants for the accelara engine.
//! This module eliminates magic numbers and provides a single source of truth
//! for configurable values.

use std::time::Duration;

/// Hard ceiling on the number of chunks per download.
///
/// Most servers apply per-client connection limits; beyond 8 parallel ranges
/// the returns diminish and the odds of tripping anti-abuse responses rise.
pub const MAX_CHUNKS: usize = 8;

/// Streaming buffer granularity for chunk and single-stream reads (64 KiB)
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum interval between forwarded non-terminal events
pub const EVENT_COALESCE_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum interval between `downloading` emissions from a single worker
pub const WORKER_EVENT_INTERVAL: Duration = Duration::from_millis(200);

/// Base step for the between-attempt retry sleep: `(attempt + 1) * 500 ms`
pub const RETRY_DELAY_STEP: Duration = Duration::from_millis(500);

/// Consecutive connection failures tolerated before the engine pauses
pub const MAX_CONNECTION_FAILURES: u32 = 10;

/// Quiet period after which a failure burst is considered recovered
pub const FAILURE_RESET_WINDOW: Duration = Duration::from_secs(30);

/// Upper bound for the connection-failure exponential backoff
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Granularity at which backoff sleeps re-check the pause latch
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Token-bucket refill tick for the shared rate limiter
pub const RATE_LIMITER_TICK: Duration = Duration::from_millis(10);

/// Maximum redirect count
pub const MAX_REDIRECTS: usize = 10;

/// Default requested worker count
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default minimum chunk size (4 MiB)
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default per-chunk retry budget
pub const DEFAULT_RETRIES: u32 = 5;

/// Default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default read timeout in seconds
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Prefix for the per-job hidden temp directory
pub const TEMP_DIR_PREFIX: &str = ".accelara-temp-";

/// Last-resort output filename when none can be derived from the URL
pub const FALLBACK_FILENAME: &str = "download.tmp";
