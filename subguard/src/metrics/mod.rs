//! Metrics aggregation.
//!
//! Every worker writes into one [`MetricsCollector`]; the status endpoint reads
//! [`MetricsSnapshot`]s from it on demand.

mod collector;

pub use collector::{LastError, MetricsCollector, MetricsSnapshot, StreamState, WorkerState};
