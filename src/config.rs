// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MIN_CHUNK_SIZE, DEFAULT_RETRIES,
    DEFAULT_READ_TIMEOUT_SECS,
};
use crate::error::{AccelaraError, Result};

/// One logical download, immutable for the lifetime of an engine run.
///
/// The supervisor constructs a job, hands it to a [`crate::engine::DownloadEngine`]
/// and consumes the event stream tagged with `download_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    /// Absolute HTTP/HTTPS source URL
    pub source_url: String,

    /// Final destination path (file, or directory to derive a filename in)
    pub out_path: PathBuf,

    /// Supervisor-chosen identifier echoed in every event
    pub download_id: String,

    /// Desired worker count, >= 1 (the planner caps it at 8)
    pub concurrency: usize,

    /// Lower bound on per-chunk byte range
    pub min_chunk_size: u64,

    /// Aggregate download rate cap in bytes/sec; `None` means unlimited
    pub rate_limit: Option<u64>,

    /// HTTP(S) proxy URL; `None` honors the standard environment
    pub proxy: Option<String>,

    /// Per-chunk retry budget
    pub retries: u32,

    /// Connect timeout in seconds
    pub connect_timeout: u64,

    /// Read timeout in seconds
    pub read_timeout: u64,

    /// Expected SHA-256 digest of the final artifact (lowercase hex compare)
    pub expected_sha256: Option<String>,

    /// Completeness-gate slack in bytes. Zero demands exact equality between
    /// the aggregate chunk progress and the declared total; set it only for
    /// server classes known to misreport `Content-Length`.
    pub size_tolerance: u64,
}

impl DownloadJob {
    /// Create a job with default tuning for the given source, destination and id
    pub fn new(
        source_url: impl Into<String>,
        out_path: impl Into<PathBuf>,
        download_id: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            out_path: out_path.into(),
            download_id: download_id.into(),
            concurrency: DEFAULT_CONCURRENCY,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            rate_limit: None,
            proxy: None,
            retries: DEFAULT_RETRIES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout: DEFAULT_READ_TIMEOUT_SECS,
            expected_sha256: None,
            size_tolerance: 0,
        }
    }

    /// Validate the job before handing it to an engine
    pub fn validate(&self) -> Result<()> {
        if self.source_url.trim().is_empty() {
            return Err(AccelaraError::internal("Source URL must not be empty"));
        }

        let url = url::Url::parse(&self.source_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AccelaraError::internal(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        if self.download_id.trim().is_empty() {
            return Err(AccelaraError::internal("Download id must not be empty"));
        }

        if self.concurrency == 0 {
            return Err(AccelaraError::internal(
                "Concurrency must be greater than 0",
            ));
        }

        if self.connect_timeout == 0 {
            return Err(AccelaraError::internal(
                "Connect timeout must be greater than 0",
            ));
        }

        if self.read_timeout == 0 {
            return Err(AccelaraError::internal(
                "Read timeout must be greater than 0",
            ));
        }

        if let Some(hash) = &self.expected_sha256 {
            let ok = hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit());
            if !ok {
                return Err(AccelaraError::internal(
                    "Expected SHA-256 must be 64 hex characters",
                ));
            }
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Get read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout)
    }
}
