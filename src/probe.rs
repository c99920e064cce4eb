// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Size and range-support discovery.
//!
//! One HEAD request, then a single-byte ranged GET when the server withholds
//! `Content-Length` from HEAD. Redirects are followed by the client; the
//! post-redirect URL is what every subsequent request must use.

use reqwest::Client;
use tracing::debug;

use crate::error::{AccelaraError, Result};

/// What the probe learned about the source
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Declared total size in bytes; zero when the server never said
    pub total_size: u64,
    /// Whether the server advertises `Accept-Ranges: bytes`
    pub accept_ranges: bool,
    /// URL after redirects, used for all subsequent requests
    pub final_url: String,
}

impl ProbeResult {
    /// Whether the job can run segmented at all
    pub fn supports_segmented(&self) -> bool {
        self.accept_ranges && self.total_size > 0
    }
}

/// Discover total size and range support for `url`.
///
/// Succeeding with `total_size == 0` is legal; the engine degrades to
/// single-stream mode. Fails with `ProbeFailure` only when every attempt
/// errors.
pub async fn probe(client: &Client, url: &str) -> Result<ProbeResult> {
    let mut last_error = None;

    match head_probe(client, url).await {
        Ok(result) if result.total_size > 0 => return Ok(result),
        Ok(partial) => {
            // HEAD answered but withheld the size; fall through to the
            // single-byte GET and keep what we learned about ranges.
            match range_probe(client, &partial.final_url, partial.accept_ranges).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    debug!("Range probe failed after sizeless HEAD: {e}");
                    return Ok(partial);
                }
            }
        }
        Err(e) => {
            debug!("HEAD probe failed: {e}");
            last_error = Some(e);
        }
    }

    match range_probe(client, url, false).await {
        Ok(result) => Ok(result),
        Err(e) => {
            let message = last_error
                .map(|head_err| format!("HEAD: {head_err}; GET: {e}"))
                .unwrap_or_else(|| e.to_string());
            Err(AccelaraError::probe(message))
        }
    }
}

async fn head_probe(client: &Client, url: &str) -> Result<ProbeResult> {
    let response = client.head(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AccelaraError::probe(format!(
            "HEAD returned HTTP {}",
            status.as_u16()
        )));
    }

    let total_size = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let accept_ranges = header_is_bytes(response.headers());
    let final_url = response.url().to_string();

    debug!(
        "HEAD probe: size={}, accept_ranges={}, final_url={}",
        total_size, accept_ranges, final_url
    );

    Ok(ProbeResult {
        total_size,
        accept_ranges,
        final_url,
    })
}

/// Single-byte ranged GET, used when HEAD reveals no size.
///
/// A 206 with `Content-Range: bytes 0-0/N` yields the true total; a plain
/// 200 yields its `Content-Length`. `known_ranges` carries over a positive
/// HEAD signal so a sloppy 200 reply cannot erase it.
async fn range_probe(client: &Client, url: &str, known_ranges: bool) -> Result<ProbeResult> {
    let response = client
        .get(url)
        .header(reqwest::header::RANGE, "bytes=0-0")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AccelaraError::probe(format!(
            "Ranged GET returned HTTP {}",
            status.as_u16()
        )));
    }

    let ranged_reply = status.as_u16() == 206;
    let total_size = if ranged_reply {
        content_range_total(response.headers()).unwrap_or(0)
    } else {
        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0)
    };

    let accept_ranges = known_ranges || ranged_reply || header_is_bytes(response.headers());
    let final_url = response.url().to_string();

    debug!(
        "Range probe: size={}, accept_ranges={}, status={}",
        total_size,
        accept_ranges,
        status.as_u16()
    );

    Ok(ProbeResult {
        total_size,
        accept_ranges,
        final_url,
    })
}

fn header_is_bytes(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"))
}

/// Total size from `Content-Range: bytes <from>-<to>/<total>`
fn content_range_total(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.trim().parse::<u64>().ok())
}
