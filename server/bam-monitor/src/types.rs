//! Core types for the monitor (datapoints, aggregates, report + alert contracts).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Datapoints (what the extractor produces)
// ---------------------------------------------------------------------------

/// Event family a classified line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatapointKind {
  ConnectionMetric,
  ConnectionEvent,
  SlotAnnounced,
  SlotProduced,
  BroadcastTiming,
  SchedulerTiming,
  SlotFrozen,
  BundleResult,
}

/// A single extracted field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
  Int(u64),
  Text(String),
}

impl FieldValue {
  pub fn as_u64(&self) -> Option<u64> {
    match self {
      Self::Int(v) => Some(*v),
      Self::Text(_) => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      Self::Int(_) => None,
    }
  }
}

/// One classified, structured extraction from a single raw log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datapoint {
  pub kind: DatapointKind,
  pub timestamp: DateTime<Utc>,
  pub fields: BTreeMap<String, FieldValue>,
}

impl Datapoint {
  pub fn int(&self, name: &str) -> Option<u64> {
    self.fields.get(name).and_then(FieldValue::as_u64)
  }

  pub fn text(&self, name: &str) -> Option<&str> {
    self.fields.get(name).and_then(FieldValue::as_str)
  }
}

// ---------------------------------------------------------------------------
// Severity (connection events)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Debug,
  Info,
  Warn,
  Error,
}

impl Severity {
  pub fn from_str_loose(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "debug" => Some(Self::Debug),
      "info" => Some(Self::Info),
      "warn" => Some(Self::Warn),
      "error" => Some(Self::Error),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Debug => "debug",
      Self::Info => "info",
      Self::Warn => "warn",
      Self::Error => "error",
    }
  }
}

// ---------------------------------------------------------------------------
// Aggregates (owned by the correlator for one run)
// ---------------------------------------------------------------------------

/// Connection metrics summed over one UTC minute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MinuteBucket {
  pub bundles: u64,
  pub results_sent: u64,
  pub scheduler_fail: u64,
  pub outbound_fail: u64,
  pub heartbeats: u64,
  pub heartbeats_sent: u64,
  pub leaderstate_sent: u64,
  pub unhealthy: u64,
  /// Number of connection-metric lines folded into this minute.
  pub samples: u64,
  pub min_slot: Option<u64>,
  pub max_slot: Option<u64>,
}

impl MinuteBucket {
  pub fn observe_slot(&mut self, slot: u64) {
    self.min_slot = Some(self.min_slot.map_or(slot, |m| m.min(slot)));
    self.max_slot = Some(self.max_slot.map_or(slot, |m| m.max(slot)));
  }

  pub fn slot_range(&self) -> Option<(u64, u64)> {
    Some((self.min_slot?, self.max_slot?))
  }
}

/// Per-slot leader metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotRecord {
  pub slot: u64,
  pub transaction_count: u64,
  pub vote_cost: u64,
  pub block_cost: u64,
  pub total_fee: u64,
  pub priority_fee: u64,
  pub broadcast_time_us: Option<u64>,
  /// Scheduler timings accumulate; a slot can log several entries.
  pub receive_time_us: u64,
  pub schedule_time_us: u64,
  pub produced: bool,
}

impl SlotRecord {
  pub fn new(slot: u64) -> Self {
    Self {
      slot,
      ..Self::default()
    }
  }

  pub fn votes(&self, vote_cu_cost: u64) -> u64 {
    if vote_cu_cost == 0 {
      return 0;
    }
    self.vote_cost / vote_cu_cost
  }

  pub fn user_transactions(&self, vote_cu_cost: u64) -> u64 {
    self.transaction_count.saturating_sub(self.votes(vote_cu_cost))
  }

  /// Block time in microseconds; scheduler timing stands in when no broadcast stat was seen.
  pub fn block_time_us(&self) -> Option<u64> {
    match self.broadcast_time_us {
      Some(us) if us > 0 => Some(us),
      _ => {
        let fallback = self.receive_time_us.saturating_add(self.schedule_time_us);
        (fallback > 0).then_some(fallback)
      }
    }
  }

  pub fn block_time_ms(&self) -> Option<f64> {
    self.block_time_us().map(|us| us as f64 / 1000.0)
  }
}

/// A connection state change or error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
  pub timestamp: DateTime<Utc>,
  pub event: String,
  pub severity: Severity,
  pub message: String,
}

// ---------------------------------------------------------------------------
// Analyzer flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outlier {
  High,
  Low,
}

// ---------------------------------------------------------------------------
// Report (output contract)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct BundleRow {
  pub minute: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slot_range: Option<(u64, u64)>,
  pub bundles: u64,
  pub results_sent: u64,
  pub pct_sent: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bundles_flag: Option<Outlier>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub results_flag: Option<Outlier>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRow {
  pub minute: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub slot_range: Option<(u64, u64)>,
  pub scheduler_fail: u64,
  pub outbound_fail: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRow {
  pub minute: String,
  pub heartbeats: u64,
  pub unhealthy: u64,
  pub bundles: u64,
  pub outbound_fail: u64,
}

/// Per-column outlier flags of a produced slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotFlags {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub transactions: Option<Outlier>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub votes: Option<Outlier>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user: Option<Outlier>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub block_cost: Option<Outlier>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub block_time: Option<Outlier>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotRow {
  Produced {
    slot: u64,
    transactions: u64,
    votes: u64,
    user: u64,
    block_cost: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_time_ms: Option<f64>,
    total_fee: u64,
    priority_fee: u64,
    flags: SlotFlags,
    small: bool,
  },
  Skipped {
    slot: u64,
  },
}

impl SlotRow {
  pub fn slot(&self) -> u64 {
    match self {
      Self::Produced { slot, .. } | Self::Skipped { slot } => *slot,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
  Healthy,
  MostlyHealthy,
  IssuesDetected,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BundleSummary {
  pub periods: usize,
  pub bundles: u64,
  pub results_sent: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub median_bundles: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub median_results: Option<f64>,
  pub send_rate_pct: f64,
  pub scheduler_fail: u64,
  pub outbound_fail: u64,
  pub failure_rate_pct: f64,
  /// Heartbeats inside active bundle periods vs. across the whole run.
  pub heartbeats_active: u64,
  pub heartbeats_total: u64,
  pub heartbeats_sent: u64,
  pub leaderstate_sent: u64,
  pub unhealthy_total: u64,
}

/// Bundle execution outcomes, keyed by result class (`success`, `lock_error`, ...).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BundleResultSummary {
  pub bundles: u64,
  pub transactions: u64,
  pub by_result: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SlotSummary {
  pub produced: usize,
  pub skipped: usize,
  pub skip_rate_pct: f64,
  pub transactions: u64,
  pub votes: u64,
  pub user: u64,
  pub block_cost: u64,
  pub total_fee: u64,
  pub priority_fee: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub median_transactions: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub median_block_time_ms: Option<f64>,
  pub small_blocks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
  pub established: usize,
  pub disconnections: usize,
  pub active_minutes: usize,
  pub healthy_minutes: usize,
  pub unhealthy_minutes: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub uptime_pct: Option<f64>,
  pub error_counts: BTreeMap<String, u64>,
  pub warning_counts: BTreeMap<String, u64>,
  pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
  pub source: String,
  pub lines_scanned: u64,
  pub datapoints: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub first_seen: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_seen: Option<DateTime<Utc>>,
  pub events: Vec<ConnectionEvent>,
  pub health: Vec<HealthRow>,
  pub bundle_activity: Vec<BundleRow>,
  pub failures: Vec<FailureRow>,
  pub leader_slots: Vec<SlotRow>,
  pub skipped_slots: BTreeSet<u64>,
  pub bundle_summary: BundleSummary,
  pub bundle_results: BundleResultSummary,
  pub slot_summary: SlotSummary,
  pub connection_summary: ConnectionSummary,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
  ConnectionError,
  MetricAnomaly,
}

impl AlertCategory {
  pub const ALL: [AlertCategory; 2] = [Self::ConnectionError, Self::MetricAnomaly];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::ConnectionError => "connection_error",
      Self::MetricAnomaly => "metric_anomaly",
    }
  }
}

/// One deduplicated batch of alert lines for a single category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertBatch {
  pub category: AlertCategory,
  pub new_count: usize,
  pub sample_lines: Vec<String>,
  pub host: String,
}

/// Persisted dedup state: hashes already alerted on plus the UTC day they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupState {
  pub hashes: BTreeSet<String>,
  pub last_reset: Option<NaiveDate>,
}
