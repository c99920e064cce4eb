// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

use thiserror::Error;

/// Substrings that identify a transport-level connection failure when the
/// underlying stack only exposes a message string.
const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection timed out",
    "timeout",
    "no such host",
    "network is unreachable",
    "i/o timeout",
];

/// Main error type for accelara operations
#[derive(Error, Debug)]
pub enum AccelaraError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed human-readable size string (e.g. `--chunk-size`, `--limit`)
    #[error("Invalid size: {input}")]
    InvalidSize { input: String },

    /// The HEAD/GET probe exhausted every attempt
    #[error("Probe failed: {message}")]
    ProbeFailure { message: String },

    /// Non-2xx response during a chunk fetch that is not fallback-eligible
    #[error("Unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    /// The server rejected parallel range requests (fallback signal)
    #[error("Server rejected multi-connection download (HTTP {status})")]
    MultiConnectionRejected { status: u16 },

    /// A chunk stream ended before delivering its full byte range
    #[error("Chunk {index} incomplete: got {got} of {want} bytes")]
    IncompleteChunk { index: usize, got: u64, want: u64 },

    /// Aggregate downloaded bytes disagree with the declared total
    #[error("Size mismatch: got {got} bytes, expected {want}")]
    SizeMismatch { got: u64, want: u64 },

    /// Checksum validation errors
    #[error("Checksum validation failed: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The engine entered paused state; terminal for this engine run
    #[error("Download paused: {reason}")]
    Paused { reason: String },

    /// Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AccelaraError {
    /// Create a new invalid-size error
    pub fn invalid_size<S: Into<String>>(input: S) -> Self {
        Self::InvalidSize {
            input: input.into(),
        }
    }

    /// Create a new probe failure error
    pub fn probe<S: Into<String>>(message: S) -> Self {
        Self::ProbeFailure {
            message: message.into(),
        }
    }

    /// Create a new checksum mismatch error
    pub fn checksum_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        Self::ChecksumMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new paused error
    pub fn paused<S: Into<String>>(reason: S) -> Self {
        Self::Paused {
            reason: reason.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a transport-level connection failure.
    ///
    /// Prefers the structured categories reqwest exposes (connect, timeout)
    /// and the io error kinds buried in the source chain; substring matching
    /// over the rendered messages is the fallback for stacks that only
    /// surface a string. Walking the chain matters: a mid-body reset reaches
    /// us as a bare "error decoding response body" whose `ECONNRESET` cause
    /// sits two sources down.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Network(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                chain_is_connection_error(e)
            }
            Self::Io(e) => io_kind_is_connection(e) || chain_is_connection_error(e),
            Self::Internal { message } => message_is_connection_error(message),
            _ => false,
        }
    }

    /// HTTP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status } | Self::MultiConnectionRejected { status } => {
                Some(*status)
            }
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Error category for logging and event records
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Io(_) => "io",
            Self::InvalidUrl(_) => "url",
            Self::Json(_) => "json",
            Self::InvalidSize { .. } => "invalid_size",
            Self::ProbeFailure { .. } => "probe_failure",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::MultiConnectionRejected { .. } => "multi_connection_rejected",
            Self::IncompleteChunk { .. } => "incomplete_chunk",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::Paused { .. } => "paused",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Substring classification over a rendered error message.
pub fn message_is_connection_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONNECTION_ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

fn io_kind_is_connection(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::TimedOut
    )
}

/// Inspect an error and its whole source chain for connection-failure
/// signals, structured io kinds first, message markers second.
fn chain_is_connection_error(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io_kind_is_connection(io) {
                return true;
            }
        }
        if message_is_connection_error(&e.to_string()) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Result type alias for accelara operations
pub type Result<T> = std::result::Result<T, AccelaraError>;
