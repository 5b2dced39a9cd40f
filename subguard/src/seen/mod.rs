//! Persistent set of processed item identifiers.
//!
//! The file is a single JSON document, `{"ids": [...], "count": n}`. A bare
//! JSON array of ids is accepted on load.

mod store;

pub use store::{LoadOutcome, SeenStore, SeenStoreConfig, run_periodic_flush};
