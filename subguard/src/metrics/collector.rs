//! Process-wide operational state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle state of a stream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Polling,
    Dispatching,
    Stopping,
    Stopped,
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Polling => "polling",
            Self::Dispatching => "dispatching",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stream progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub processed_count: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_item_id: Option<String>,
    pub state: WorkerState,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            processed_count: 0,
            last_processed_at: None,
            last_item_id: None,
            state: WorkerState::Starting,
        }
    }
}

/// Most recent error observed anywhere in the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MetricsState {
    streams: HashMap<String, StreamState>,
    messages_sent: u64,
    rule_triggers: HashMap<String, u64>,
    last_error: Option<LastError>,
}

/// Concurrent-safe metrics aggregator shared by every task.
///
/// All state lives behind a single lock so that [`snapshot`](Self::snapshot)
/// observes one consistent point in time.
#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    started_at: DateTime<Utc>,
    state: RwLock<MetricsState>,
}

impl MetricsCollector {
    /// Create a new collector; the uptime origin is now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            state: RwLock::new(MetricsState::default()),
        }
    }

    /// Create the zeroed entry for `stream`. Re-registering keeps existing progress.
    pub fn register_stream(&self, stream: &str) {
        self.state
            .write()
            .streams
            .entry(stream.to_string())
            .or_default();
    }

    /// Record that `item_id` from `stream` was handled.
    pub fn record_processed(&self, stream: &str, item_id: &str, timestamp: DateTime<Utc>) {
        let mut state = self.state.write();
        let entry = state.streams.entry(stream.to_string()).or_default();
        entry.processed_count += 1;
        entry.last_processed_at = Some(timestamp);
        entry.last_item_id = Some(item_id.to_string());
    }

    /// Update the worker state of `stream`.
    pub fn set_stream_state(&self, stream: &str, worker_state: WorkerState) {
        self.state
            .write()
            .streams
            .entry(stream.to_string())
            .or_default()
            .state = worker_state;
    }

    pub fn record_message_sent(&self) {
        self.state.write().messages_sent += 1;
    }

    /// Count one firing of the named decision rule.
    pub fn record_rule_triggered(&self, rule: &str) {
        *self
            .state
            .write()
            .rule_triggers
            .entry(rule.to_string())
            .or_insert(0) += 1;
    }

    /// Replace the last error. Most recent wins.
    pub fn record_error(&self, message: impl Into<String>, timestamp: DateTime<Utc>) {
        self.state.write().last_error = Some(LastError {
            message: message.into(),
            timestamp,
        });
    }

    /// [`record_error`](Self::record_error) stamped now, with a warning log.
    pub fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "Recording error");
        self.record_error(message, Utc::now());
    }

    /// Seconds since the collector was created.
    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Owned, point-in-time copy of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read();
        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            started_at: self.started_at,
            subreddits: state
                .streams
                .iter()
                .map(|(name, s)| (name.clone(), s.clone()))
                .collect(),
            messages_sent: state.messages_sent,
            rule_triggers: state
                .rule_triggers
                .iter()
                .map(|(name, count)| (name.clone(), *count))
                .collect(),
            last_error: state.last_error.clone(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of all metrics at a point in time, as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub subreddits: BTreeMap<String, StreamState>,
    pub messages_sent: u64,
    pub rule_triggers: BTreeMap<String, u64>,
    pub last_error: Option<LastError>,
}
