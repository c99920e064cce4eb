// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Shared download-rate limiting.
//!
//! One token bucket per engine, consumed by every worker and by the
//! single-stream path, so the aggregate rate stays at the cap instead of
//! each connection throttling itself into bursty traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::constants::RATE_LIMITER_TICK;

/// Token bucket shared across download workers.
///
/// The bucket holds at most one second's worth of tokens, which caps the
/// burst after a stall; refills happen on demand at 10 ms granularity.
#[derive(Debug)]
pub struct RateLimiter {
    /// Bytes per second
    limit: u64,
    tokens: AtomicU64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a limiter for `limit` bytes/sec. A zero limit never throttles.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            tokens: AtomicU64::new(limit),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// Consume `amount` tokens, sleeping until the bucket can supply them.
    ///
    /// Acquisition happens in increments so a single oversized read cannot
    /// deadlock against the one-second burst cap.
    pub async fn acquire(&self, amount: u64) {
        if self.limit == 0 {
            return;
        }

        let mut remaining = amount;
        while remaining > 0 {
            self.refill();

            let available = self.tokens.load(Ordering::Acquire);
            if available > 0 {
                let take = remaining.min(available);
                if self
                    .tokens
                    .compare_exchange(
                        available,
                        available - take,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    remaining -= take;
                    continue;
                }
            }

            tokio::time::sleep(RATE_LIMITER_TICK).await;
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock().unwrap();
        let elapsed = last.elapsed().as_secs_f64();
        if elapsed < RATE_LIMITER_TICK.as_secs_f64() {
            return;
        }

        let refill = (self.limit as f64 * elapsed) as u64;
        if refill > 0 {
            let current = self.tokens.load(Ordering::Acquire);
            let topped_up = (current + refill).min(self.limit);
            self.tokens.store(topped_up, Ordering::Release);
            *last = Instant::now();
        }
    }
}
