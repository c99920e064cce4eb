// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Human-readable byte-size strings.
//!
//! Accepts `<number>[<unit>]` with unit in `B`, `K`/`KB`, `M`/`MB`, `G`/`GB`,
//! `T`/`TB` (case-insensitive, 1024-based). A bare number means bytes, an
//! empty string parses to zero.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AccelaraError, Result};

static SIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([KMGT]B?|B)?\s*$").unwrap());

/// Parse a human-readable size string into bytes.
///
/// Fractional values are truncated after the multiplier is applied, so
/// `"1.5K"` is 1536 and `"0.5"` is 0.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    if input.trim().is_empty() {
        return Ok(0);
    }

    let caps = SIZE_PATTERN
        .captures(input)
        .ok_or_else(|| AccelaraError::invalid_size(input))?;

    let number: f64 = caps[1]
        .parse()
        .map_err(|_| AccelaraError::invalid_size(input))?;

    let multiplier = match caps.get(2).map(|m| m.as_str().as_bytes()[0].to_ascii_uppercase()) {
        None | Some(b'B') => 1u64,
        Some(b'K') => 1024,
        Some(b'M') => 1024 * 1024,
        Some(b'G') => 1024 * 1024 * 1024,
        Some(b'T') => 1024u64.pow(4),
        Some(_) => return Err(AccelaraError::invalid_size(input)),
    };

    Ok((number * multiplier as f64) as u64)
}

/// Format a byte count as a short human-readable string (1024-based)
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
