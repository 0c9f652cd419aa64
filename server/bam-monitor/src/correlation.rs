//! Fold the datapoint stream into per-minute buckets and per-slot records.
//!
//! Arrival order is not assumed monotonic: every family folds into keyed maps,
//! so the final state depends only on the multiset of datapoints.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::types::{
  BundleResultSummary, ConnectionEvent, Datapoint, DatapointKind, MinuteBucket, Severity, SlotRecord,
};

/// Format a timestamp into a minute bucket key: "YYYY-MM-DDTHH:MM".
pub fn minute_bucket(ts: &DateTime<Utc>) -> String {
  ts.format("%Y-%m-%dT%H:%M").to_string()
}

/// Stateful aggregator for one run.
#[derive(Debug, Default)]
pub struct Correlator {
  minutes: BTreeMap<String, MinuteBucket>,
  slots: BTreeMap<u64, SlotRecord>,
  announced: BTreeSet<u64>,
  events: Vec<ConnectionEvent>,
  bundle_results: BundleResultSummary,
  first_seen: Option<DateTime<Utc>>,
  last_seen: Option<DateTime<Utc>>,
  datapoints: u64,
}

/// Read-only view of the aggregates, handed to the analyzer and report builder.
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
  pub minutes: BTreeMap<String, MinuteBucket>,
  pub slots: BTreeMap<u64, SlotRecord>,
  pub announced: BTreeSet<u64>,
  pub events: Vec<ConnectionEvent>,
  pub bundle_results: BundleResultSummary,
  pub first_seen: Option<DateTime<Utc>>,
  pub last_seen: Option<DateTime<Utc>>,
  pub datapoints: u64,
}

impl Aggregates {
  pub fn produced(&self) -> impl Iterator<Item = &SlotRecord> {
    self.slots.values().filter(|r| r.produced)
  }

  pub fn produced_slots(&self) -> BTreeSet<u64> {
    self.produced().map(|r| r.slot).collect()
  }
}

impl Correlator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fold one datapoint into the aggregates.
  pub fn record(&mut self, dp: &Datapoint) {
    self.datapoints += 1;
    self.first_seen = Some(self.first_seen.map_or(dp.timestamp, |t| t.min(dp.timestamp)));
    self.last_seen = Some(self.last_seen.map_or(dp.timestamp, |t| t.max(dp.timestamp)));

    match dp.kind {
      DatapointKind::ConnectionMetric => {
        let bucket = self.bucket(&dp.timestamp);
        bucket.samples += 1;
        add(&mut bucket.bundles, dp.int("bundle_received"));
        add(&mut bucket.results_sent, dp.int("bundleresult_sent"));
        add(&mut bucket.scheduler_fail, dp.int("bundle_forward_to_scheduler_fail"));
        add(&mut bucket.outbound_fail, dp.int("outbound_fail"));
        add(&mut bucket.heartbeats, dp.int("heartbeat_received"));
        add(&mut bucket.heartbeats_sent, dp.int("heartbeat_sent"));
        add(&mut bucket.leaderstate_sent, dp.int("leaderstate_sent"));
        add(&mut bucket.unhealthy, dp.int("unhealthy_connection_count"));
      }
      DatapointKind::SlotProduced => {
        let Some(slot) = dp.int("slot") else { return };
        let record = self.slots.entry(slot).or_insert_with(|| SlotRecord::new(slot));
        record.produced = true;
        record.block_cost = dp.int("block_cost").unwrap_or(0);
        record.vote_cost = dp.int("vote_cost").unwrap_or(0);
        record.transaction_count = dp.int("transaction_count").unwrap_or(0);
        record.total_fee = dp.int("total_fee").unwrap_or(0);
        record.priority_fee = dp.int("priority_fee").unwrap_or(0);
        self.bucket(&dp.timestamp).observe_slot(slot);
      }
      DatapointKind::SlotFrozen => {
        if let Some(slot) = dp.int("slot") {
          self.bucket(&dp.timestamp).observe_slot(slot);
        }
      }
      DatapointKind::SlotAnnounced => {
        if let Some(slot) = dp.int("slot") {
          self.announced.insert(slot);
        }
      }
      DatapointKind::BroadcastTiming => {
        let Some(slot) = dp.int("slot") else { return };
        let record = self.slots.entry(slot).or_insert_with(|| SlotRecord::new(slot));
        record.broadcast_time_us = dp.int("broadcast_time_us");
      }
      DatapointKind::SchedulerTiming => {
        let Some(slot) = dp.int("slot") else { return };
        let record = self.slots.entry(slot).or_insert_with(|| SlotRecord::new(slot));
        add(&mut record.receive_time_us, dp.int("receive_time_us"));
        add(&mut record.schedule_time_us, dp.int("schedule_time_us"));
      }
      DatapointKind::BundleResult => {
        let results = &mut self.bundle_results;
        results.bundles += 1;
        add(&mut results.transactions, dp.int("transactions"));
        let class = dp.text("result").unwrap_or("unknown").to_string();
        *results.by_result.entry(class).or_default() += 1;
      }
      DatapointKind::ConnectionEvent => {
        let severity = dp
          .text("severity")
          .and_then(Severity::from_str_loose)
          .unwrap_or(Severity::Info);
        self.events.push(ConnectionEvent {
          timestamp: dp.timestamp,
          event: dp.text("event").unwrap_or("unknown").to_string(),
          severity,
          message: dp.text("message").unwrap_or_default().to_string(),
        });
      }
    }
  }

  fn bucket(&mut self, ts: &DateTime<Utc>) -> &mut MinuteBucket {
    self.minutes.entry(minute_bucket(ts)).or_default()
  }

  /// Finish the run. Events are ordered by time; ties keep arrival order.
  pub fn finish(mut self) -> Aggregates {
    self.events.sort_by_key(|e| e.timestamp);
    Aggregates {
      minutes: self.minutes,
      slots: self.slots,
      announced: self.announced,
      events: self.events,
      bundle_results: self.bundle_results,
      first_seen: self.first_seen,
      last_seen: self.last_seen,
      datapoints: self.datapoints,
    }
  }
}

/// Counters come from log text; an absurd value saturates instead of overflowing.
fn add(total: &mut u64, value: Option<u64>) {
  *total = total.saturating_add(value.unwrap_or(0));
}
