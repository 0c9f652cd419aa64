//! BAM Monitor: deterministic, rule-based scanner for validator logs.
//!
//! Classifies raw log lines into typed datapoints, correlates them into
//! per-minute bundle/connection buckets and per-slot leader records, flags
//! median-relative outliers and skipped leader slots, and runs offset-tracked
//! incremental scans whose alert lines pass a normalize-then-hash dedup gate.
//!
//! Read-only against log data; no network, no mutation of the validator.

pub mod alert;
pub mod cli;
pub mod config;
pub mod correlation;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod normalize;
pub mod report;
pub mod scan;
pub mod source;
pub mod state;
pub mod stats;
pub mod types;

pub use alert::{AlertSink, JsonLinesSink};
pub use config::Config;
pub use engine::{AlertRun, Engine};
pub use error::EngineError;
pub use source::{FileSource, JournalSource, LineSource, MemorySource};
pub use state::{FileStateStore, MemoryStateStore, StateStore};
pub use types::{AlertBatch, AlertCategory, Report};
