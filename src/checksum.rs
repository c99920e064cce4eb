// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Streaming SHA-256 verification.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::constants::STREAM_BUFFER_SIZE;
use crate::error::{AccelaraError, Result};

/// Compute the SHA-256 digest of a file as lowercase hex
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];

    loop {
        let count = file.read(&mut buffer).await?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a file against an expected digest (case-insensitive hex compare).
///
/// Fails with `ChecksumMismatch` carrying both digests; the caller decides
/// what to do with the offending file.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<String> {
    let actual = sha256_file(path).await?;
    let expected = expected.to_ascii_lowercase();

    if actual == expected {
        debug!("Checksum verified for {}", path.display());
        Ok(actual)
    } else {
        Err(AccelaraError::checksum_mismatch(expected, actual))
    }
}
