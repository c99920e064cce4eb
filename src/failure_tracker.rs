// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Connection-failure accounting and the pause latch.
//!
//! Every classified connection error flows through [`FailureTracker::handle`]:
//! either the engine pauses (failure burst hit the cap) or the caller gets an
//! exponential-backoff sleep and its original error back to retry. A >30 s
//! quiet gap resets the burst; any successful read resets the counter.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::constants::{
    FAILURE_RESET_WINDOW, MAX_BACKOFF, MAX_CONNECTION_FAILURES, PAUSE_POLL_INTERVAL,
};
use crate::error::{AccelaraError, Result};
use crate::events::{Event, EventSink};

/// Outcome of one connection-error consultation
#[derive(Debug)]
enum Verdict {
    /// Sleep this long, then let the caller retry
    Backoff { failures: u32, delay: Duration },
    /// The engine is now paused with this reason
    Pause { reason: String },
}

#[derive(Debug)]
struct TrackerState {
    failures: u32,
    last_failure: Option<Instant>,
}

/// Shared failure counter and pause latch for one engine instance
#[derive(Debug)]
pub struct FailureTracker {
    state: Mutex<TrackerState>,
    pause: Mutex<Option<String>>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                failures: 0,
                last_failure: None,
            }),
            pause: Mutex::new(None),
        }
    }

    /// Whether the engine is paused
    pub fn is_paused(&self) -> bool {
        self.pause.lock().unwrap().is_some()
    }

    /// Pause reason, when paused
    pub fn pause_reason(&self) -> Option<String> {
        self.pause.lock().unwrap().clone()
    }

    /// `PausedError` for the current pause state; used by loop-top checks
    pub fn check_paused(&self) -> Result<()> {
        match self.pause.lock().unwrap().as_ref() {
            Some(reason) => Err(AccelaraError::paused(reason.clone())),
            None => Ok(()),
        }
    }

    /// Latch the pause state directly (single-stream disconnects, shutdown)
    pub async fn pause_now(&self, reason: String, sink: &EventSink) -> AccelaraError {
        {
            let mut pause = self.pause.lock().unwrap();
            if pause.is_none() {
                *pause = Some(reason.clone());
            }
        }
        warn!("Engine paused: {reason}");
        sink.emit(
            Event::http("paused")
                .set("pause_reason", reason.clone())
                .set("message", reason.clone()),
        )
        .await;
        AccelaraError::paused(reason)
    }

    /// A read succeeded; past failures no longer count
    pub fn record_success(&self) {
        self.state.lock().unwrap().failures = 0;
    }

    /// Current consecutive-failure count
    pub fn failures(&self) -> u32 {
        self.state.lock().unwrap().failures
    }

    /// Process one classified connection error.
    ///
    /// Returns `Err(Paused)` when the burst cap is reached; otherwise emits a
    /// retry notice, sleeps the backoff and returns `Ok(())` so the caller can
    /// surface its original error to the retry loop.
    pub async fn handle(&self, message: &str, sink: &EventSink) -> Result<()> {
        match self.classify(message) {
            Verdict::Pause { reason } => Err(self.pause_now(reason, sink).await),
            Verdict::Backoff { failures, delay } => {
                info!(
                    "Connection failure #{failures}: {message}; retrying in {}s",
                    delay.as_secs()
                );
                sink.emit_now(Event::http("downloading").set(
                    "message",
                    format!(
                        "Connection error ({message}), retry {failures} in {}s",
                        delay.as_secs()
                    ),
                ))
                .await;

                // Responsive sleep: a sibling worker may hit the failure cap
                // while this one is backing off, and a paused engine must not
                // sit out a 30 s timer before noticing.
                let mut remaining = delay;
                while !remaining.is_zero() {
                    self.check_paused()?;
                    let step = remaining.min(PAUSE_POLL_INTERVAL);
                    tokio::time::sleep(step).await;
                    remaining -= step;
                }
                self.check_paused()?;
                Ok(())
            }
        }
    }

    fn classify(&self, message: &str) -> Verdict {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        // A long quiet spell means the earlier burst recovered.
        let burst_recovered = state
            .last_failure
            .is_some_and(|last| now.duration_since(last) > FAILURE_RESET_WINDOW);
        if burst_recovered {
            state.failures = 1;
        } else {
            state.failures += 1;
        }
        state.last_failure = Some(now);

        if state.failures >= MAX_CONNECTION_FAILURES {
            return Verdict::Pause {
                reason: format!(
                    "Connection lost: {message}. Paused after {} failures. \
                     Please check your connection and resume manually.",
                    state.failures
                ),
            };
        }

        let exponent = state.failures.saturating_sub(1).min(31);
        let delay = Duration::from_secs(1u64 << exponent).min(MAX_BACKOFF);
        Verdict::Backoff {
            failures: state.failures,
            delay,
        }
    }
}
