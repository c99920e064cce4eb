// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Engine-side event emission.
//!
//! [`EventSink`] sits between the engine and the reporter transport. It owns
//! the wire policy: non-terminal events are coalesced to one per 100 ms,
//! terminal events (`completed`, `error`, `paused`) always go out, exactly one
//! terminal event is forwarded per engine lifetime, and `progress` is clamped
//! to `[0.0, 1.0]` before it ever reaches the supervisor.

use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use crate::constants::EVENT_COALESCE_INTERVAL;
use crate::reporter::{EventRecord, Reporter};

/// Statuses that terminate an engine run on the wire
const TERMINAL_STATUSES: &[&str] = &["completed", "error", "paused"];

/// Builder for one event record
#[derive(Default)]
pub struct Event {
    fields: EventRecord,
}

impl Event {
    /// Start an `http`-typed event with the given status
    pub fn http(status: &str) -> Self {
        Self::default().set("type", "http").set("status", status)
    }

    /// Start an `error`-typed terminal event
    pub fn error(message: &str) -> Self {
        Self::default()
            .set("type", "error")
            .set("status", "error")
            .set("message", message)
    }

    /// Set one field
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set one field when the value is present
    pub fn set_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    /// Attach the standard byte-accounting triple and derived progress
    pub fn with_counters(self, downloaded: u64, total: u64, speed: f64, eta: u64) -> Self {
        let progress = if total > 0 {
            downloaded as f64 / total as f64
        } else {
            0.0
        };
        self.set("downloaded", downloaded)
            .set("total", total)
            .set("progress", progress)
            .set("speed", speed)
            .set("download_rate", speed)
            .set("eta", eta)
    }

    fn into_fields(self) -> EventRecord {
        self.fields
    }
}

struct SinkState {
    last_forwarded: Option<Instant>,
    terminal_sent: bool,
}

/// Rate-limiting event emitter shared by the engine and its workers
#[derive(Clone)]
pub struct EventSink {
    reporter: Arc<dyn Reporter>,
    state: Arc<Mutex<SinkState>>,
}

impl EventSink {
    /// Create a sink over a reporter transport
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            reporter,
            state: Arc::new(Mutex::new(SinkState {
                last_forwarded: None,
                terminal_sent: false,
            })),
        }
    }

    /// Emit one event, applying coalescing, clamping and terminal gating.
    ///
    /// Returns `true` when the record was forwarded to the reporter.
    pub async fn emit(&self, event: Event) -> bool {
        self.emit_inner(event, false).await
    }

    /// Emit a lifecycle event, bypassing coalescing.
    ///
    /// Status transitions (verifying, merging, the fallback notice, retry
    /// notices) must reach the supervisor even when they land within the
    /// coalescing window of the previous progress event. Terminal gating
    /// still applies.
    pub async fn emit_now(&self, event: Event) -> bool {
        self.emit_inner(event, true).await
    }

    async fn emit_inner(&self, event: Event, bypass_coalescing: bool) -> bool {
        let mut fields = event.into_fields();

        if let Some(progress) = fields.get("progress").and_then(Value::as_f64) {
            fields.insert(
                "progress".to_string(),
                Value::from(progress.clamp(0.0, 1.0)),
            );
        }

        let terminal = fields
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| TERMINAL_STATUSES.contains(&s));

        {
            let mut state = self.state.lock().unwrap();
            if state.terminal_sent {
                // The run already concluded on the wire; racing workers may
                // still try to report progress. Drop it.
                return false;
            }
            if terminal {
                state.terminal_sent = true;
            } else if !bypass_coalescing {
                if let Some(last) = state.last_forwarded {
                    if last.elapsed() < EVENT_COALESCE_INTERVAL {
                        return false;
                    }
                }
            }
            state.last_forwarded = Some(Instant::now());
        }

        self.reporter.report(fields).await;
        true
    }

    /// Whether a terminal event has already been forwarded
    pub fn finished(&self) -> bool {
        self.state.lock().unwrap().terminal_sent
    }
}
