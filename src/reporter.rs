// Licensed under the MIT License
// Copyright (c) 2025 Accelara contributors

//! Reporter transport.
//!
//! A reporter is a pure transport adapter: it receives a flat map of event
//! fields and forwards it to the supervisor as one newline-terminated JSON
//! record. Coalescing and clamping happen upstream in [`crate::events`], so
//! implementations stay trivial to unit-test.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

/// Structured event record as handed to a reporter
pub type EventRecord = Map<String, Value>;

/// Sink for structured progress and lifecycle events.
///
/// Implementations must be internally serialized: the engine invokes the
/// reporter from multiple racing workers.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Forward one event record to the supervisor
    async fn report(&self, record: EventRecord);
}

/// Reporter that writes one JSON line per event to a byte sink.
///
/// Injects `download_id` and a unix-second `timestamp` into every record.
/// The sink is guarded by a mutex so each record lands on the wire as a
/// single uninterrupted line.
pub struct JsonLineReporter {
    download_id: String,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl JsonLineReporter {
    /// Create a reporter writing to the given sink
    pub fn new(download_id: impl Into<String>, sink: Box<dyn Write + Send>) -> Self {
        Self {
            download_id: download_id.into(),
            sink: Mutex::new(sink),
        }
    }

    /// Create a reporter writing to stdout (the CLI event stream)
    pub fn stdout(download_id: impl Into<String>) -> Self {
        Self::new(download_id, Box::new(std::io::stdout()))
    }
}

#[async_trait]
impl Reporter for JsonLineReporter {
    async fn report(&self, mut record: EventRecord) {
        record.insert(
            "download_id".to_string(),
            Value::String(self.download_id.clone()),
        );
        record.insert(
            "timestamp".to_string(),
            Value::from(chrono::Utc::now().timestamp()),
        );

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping unserializable event record: {e}");
                return;
            }
        };

        let mut sink = self.sink.lock().unwrap();
        if writeln!(sink, "{line}").and_then(|()| sink.flush()).is_err() {
            // The supervisor hung up; nothing useful left to do with events.
            warn!("Failed to write event record to supervisor");
        }
    }
}

/// Reporter that discards every event, for library use without a supervisor
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn report(&self, _record: EventRecord) {}
}
