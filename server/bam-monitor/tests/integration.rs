//! Integration tests for the monitor.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use bam_monitor::stats::median;
use bam_monitor::types::{Outlier, SlotRow};
use bam_monitor::{
  AlertBatch, AlertCategory, AlertSink, Config, Engine, EngineError, FileSource, FileStateStore,
  LineSource, MemorySource, MemoryStateStore, StateStore,
};
use chrono::{DateTime, TimeZone, Utc};

/// 22 one-minute windows of bundle traffic spread over a day.
const WINDOW_BUNDLES: [u64; 22] = [
  2150, 2198, 3012, 4410, 3875, 2920, 5120, 4788, 3301, 2765, 6040, 3550, 4120, 2980, 3694, 5210,
  4005, 3340, 2812, 3460, 13337, 15840,
];

fn engine() -> Engine {
  Engine::new(Config {
    alert_pacing_ms: 0,
    alert_sample_cap: 1000,
    host: "validator-1".into(),
    ..Config::default()
  })
  .unwrap()
}

fn day(d: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 1, d, 12, 0, 0).unwrap()
}

fn metrics_line(ts: &str, fields: &str) -> String {
  format!(
    "[{}.000000000Z INFO  solana_metrics::metrics] datapoint: bam_connection-metrics {}\n",
    ts, fields
  )
}

#[derive(Default)]
struct Recorder {
  batches: Vec<AlertBatch>,
}

impl Recorder {
  fn lines(&self, category: AlertCategory) -> Vec<String> {
    self
      .batches
      .iter()
      .filter(|b| b.category == category)
      .flat_map(|b| b.sample_lines.clone())
      .collect()
  }
}

impl AlertSink for Recorder {
  fn submit(&mut self, batch: &AlertBatch) -> Result<(), EngineError> {
    self.batches.push(batch.clone());
    Ok(())
  }
}

/// Rejects one category, records the rest.
struct FlakySink {
  reject: AlertCategory,
  delivered: Vec<AlertBatch>,
}

impl AlertSink for FlakySink {
  fn submit(&mut self, batch: &AlertBatch) -> Result<(), EngineError> {
    if batch.category == self.reject {
      return Err(EngineError::sink("webhook returned 502"));
    }
    self.delivered.push(batch.clone());
    Ok(())
  }
}

#[test]
fn day_of_bundle_windows_totals_and_median() {
  let mut log = String::new();
  for (i, bundles) in WINDOW_BUNDLES.iter().enumerate() {
    let hour = i as u32;
    let minute = (i as u32 * 7) % 60;
    // Quiet minute before each window: heartbeats only.
    log.push_str(&metrics_line(
      &format!("2025-01-15T{:02}:{:02}:05", hour, (minute + 1) % 60),
      "bundle_received=0i heartbeat_received=6i",
    ));
    log.push_str(&format!(
      "[2025-01-15T{:02}:{:02}:10Z INFO solana_core::replay_stage] unrelated chatter\n",
      hour, minute
    ));
    // Each window is split over two samples in the same minute.
    let first = bundles / 2;
    log.push_str(&metrics_line(
      &format!("2025-01-15T{:02}:{:02}:20", hour, minute),
      &format!("bundle_received={}i bundleresult_sent={}i heartbeat_received=3i", first, first),
    ));
    log.push_str(&metrics_line(
      &format!("2025-01-15T{:02}:{:02}:50", hour, minute),
      &format!("bundle_received={}i bundleresult_sent=0i", bundles - first),
    ));
  }

  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(log.as_bytes()).unwrap();
  let report = engine().report_source(&FileSource::new(file.path())).unwrap();

  let summary = &report.bundle_summary;
  assert_eq!(summary.periods, 22);
  assert_eq!(summary.bundles, 102_927);
  assert_eq!(WINDOW_BUNDLES.iter().sum::<u64>(), 102_927);

  let mut sorted = WINDOW_BUNDLES.to_vec();
  sorted.sort_unstable();
  let manual = (sorted[10] + sorted[11]) as f64 / 2.0;
  assert_eq!(manual, 3622.0);
  assert_eq!(summary.median_bundles, Some(manual));
  assert_eq!(median(&WINDOW_BUNDLES), Some(manual));

  let row = |bundles: u64| {
    report
      .bundle_activity
      .iter()
      .find(|r| r.bundles == bundles)
      .unwrap()
  };
  assert_eq!(row(15840).bundles_flag, Some(Outlier::High));
  assert_eq!(row(2150).bundles_flag, Some(Outlier::Low));
  assert_eq!(row(3550).bundles_flag, None);

  assert_eq!(summary.heartbeats_active, 22 * 3);
  assert_eq!(summary.heartbeats_total, 22 * 9);
  assert_eq!(report.health.len(), 44);
}

#[test]
fn skipped_slot_scenario() {
  let lines = [
    "[2025-01-15T10:00:00Z INFO] datapoint: replay_stage-my_leader_slot slot=10i",
    "[2025-01-15T10:00:00Z INFO] datapoint: replay_stage-my_leader_slot slot=11i",
    "[2025-01-15T10:00:01Z INFO] datapoint: cost_tracker_stats,is_leader=true bank_slot=13i block_cost=30000000i vote_cost=685600i transaction_count=900i total_transaction_fee=4500000i total_priority_fee=1000000i",
    "[2025-01-15T10:00:01Z INFO] datapoint: replay_stage-my_leader_slot slot=12i",
    "[2025-01-15T10:00:02Z INFO] datapoint: cost_tracker_stats,is_leader=true bank_slot=10i block_cost=31000000i vote_cost=685600i transaction_count=950i total_transaction_fee=4600000i total_priority_fee=1100000i",
    "[2025-01-15T10:00:02Z INFO] datapoint: replay_stage-my_leader_slot slot=13i",
    "[2025-01-15T10:00:03Z INFO] datapoint: broadcast-process-shreds-stats slot=12i slot_broadcast_time=380000i",
    "[2025-01-15T10:00:03Z INFO] datapoint: cost_tracker_stats,is_leader=true bank_slot=11i block_cost=29000000i vote_cost=685600i transaction_count=880i total_transaction_fee=4400000i total_priority_fee=900000i",
  ];
  let report = engine().report("mem", lines);

  assert_eq!(report.skipped_slots.iter().copied().collect::<Vec<_>>(), vec![12]);
  let slots: Vec<u64> = report.leader_slots.iter().map(SlotRow::slot).collect();
  assert_eq!(slots, vec![10, 11, 12, 13]);
  assert!(matches!(report.leader_slots[2], SlotRow::Skipped { slot: 12 }));
  match &report.leader_slots[0] {
    SlotRow::Produced { votes, user, .. } => {
      assert_eq!(*votes, 200);
      assert_eq!(*user, 750);
    }
    other => panic!("expected produced slot, got {:?}", other),
  }
  assert_eq!(report.slot_summary.produced, 3);
  assert_eq!(report.slot_summary.skip_rate_pct, 25.0);
}

fn alert_log() -> String {
  [
    "[2025-01-15T10:00:00Z WARN solana_core::bam_manager] BAM connection not healthy\n",
    "[2025-01-15T10:00:01Z INFO solana_metrics::metrics] datapoint: bam_connection-metrics bundle_received=4i outbound_fail=2i\n",
    "[2025-01-15T10:00:02Z ERROR solana_core::bam_connection] Failed to connect to BAM with url: https://ny.mainnet.bam.example.com: connection refused\n",
    "[2025-01-15T10:00:03Z INFO solana_core::bam_manager] BAM connection established\n",
    "[2025-01-15T10:00:04Z WARN solana_core::bam_manager] BAM connection not healthy\n",
    "[2025-01-15T10:00:05Z ERROR solana_core::bam_connection] Failed to connect to BAM with url: https://ams.mainnet.bam.example.com: connection refused\n",
    "[2025-01-15T10:00:06Z INFO solana_metrics::metrics] datapoint: bam_connection-metrics bundle_received=4i unhealthy_connection_count=1i\n",
    "[2025-01-15T10:00:07Z ERROR solana_core::bam_connection] Inbound stream closed\n",
  ]
  .concat()
}

#[test]
fn resume_equivalence_for_every_split_point() {
  let log = alert_log();
  let engine = engine();

  let mut whole_store = MemoryStateStore::new();
  let mut whole_sink = Recorder::default();
  let whole = MemorySource::new("validator.log", log.clone());
  engine
    .scan_alerts(&whole, &mut whole_store, &mut whole_sink, day(15))
    .unwrap();
  let expected_offset = whole_store.offset("validator.log").unwrap();
  assert_eq!(expected_offset, Some(log.len() as u64));

  for k in 0..=log.len() {
    let mut store = MemoryStateStore::new();
    let mut sink = Recorder::default();
    let mut source = MemorySource::new("validator.log", &log.as_bytes()[..k]);
    engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
    source.replace(log.as_bytes());
    engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();

    for category in AlertCategory::ALL {
      assert_eq!(
        sink.lines(category),
        whole_sink.lines(category),
        "split at byte {} differs for {}",
        k,
        category.as_str()
      );
    }
    assert_eq!(store.offset("validator.log").unwrap(), expected_offset, "split at {}", k);
  }
}

#[test]
fn cosmetic_duplicates_collapse_and_reappear_next_day() {
  let engine = engine();
  let mut store = MemoryStateStore::new();
  let mut sink = Recorder::default();
  let mut source = MemorySource::new("validator.log", alert_log());

  let first = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  // Two "not healthy" and two connect failures differ only cosmetically.
  assert_eq!(first.candidates, 7);
  assert_eq!(first.suppressed, 2);
  assert_eq!(sink.lines(AlertCategory::ConnectionError).len(), 3);
  assert_eq!(sink.lines(AlertCategory::MetricAnomaly).len(), 2);

  source.append(b"[2025-01-15T18:30:00Z WARN solana_core::bam_manager] BAM connection not healthy\n");
  let later = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  assert_eq!(later.lines_scanned, 1);
  assert_eq!(later.suppressed, 1);
  assert!(later.batches.is_empty());

  source.append(b"[2025-01-16T00:10:00Z WARN solana_core::bam_manager] BAM connection not healthy\n");
  let next_day = engine.scan_alerts(&source, &mut store, &mut sink, day(16)).unwrap();
  assert_eq!(next_day.batches.len(), 1);
  assert_eq!(next_day.batches[0].new_count, 1);
  assert_eq!(
    store.dedup("validator.log").unwrap().last_reset,
    Some(day(16).date_naive())
  );
}

#[test]
fn rotation_rescans_from_start() {
  let dir = tempfile::tempdir().unwrap();
  let log_path = dir.path().join("validator.log");
  fs::write(&log_path, alert_log()).unwrap();

  let engine = engine();
  let source = FileSource::new(&log_path);
  let mut store = FileStateStore::open(dir.path().join("state")).unwrap();
  let mut sink = Recorder::default();

  let first = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  assert!(!first.rotated);

  let unchanged = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  assert_eq!(unchanged.lines_scanned, 0);

  let rotated_log = "[2025-01-15T11:00:00Z ERROR solana_core::bam_manager] Failed to get config: deadline exceeded\n";
  fs::write(&log_path, rotated_log).unwrap();
  let after = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  assert!(after.rotated);
  assert_eq!(after.lines_scanned, 1);
  assert_eq!(after.batches.len(), 1);
  assert_eq!(after.batches[0].category, AlertCategory::ConnectionError);

  // State survives a fresh store handle on the same directory.
  let reopened = FileStateStore::open(dir.path().join("state")).unwrap();
  assert_eq!(
    reopened.offset(source.name()).unwrap(),
    Some(rotated_log.len() as u64)
  );
}

#[test]
fn sink_failure_does_not_block_other_categories_or_roll_back() {
  let engine = engine();
  let mut store = MemoryStateStore::new();
  let mut sink = FlakySink {
    reject: AlertCategory::ConnectionError,
    delivered: Vec::new(),
  };
  let mut source = MemorySource::new("validator.log", alert_log());

  let run = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  assert_eq!(run.failed, 1);
  assert_eq!(run.delivered, 1);
  assert_eq!(sink.delivered.len(), 1);
  assert_eq!(sink.delivered[0].category, AlertCategory::MetricAnomaly);

  source.append(b"[2025-01-15T13:00:00Z ERROR solana_core::bam_connection] Inbound stream closed\n");
  let again = engine.scan_alerts(&source, &mut store, &mut sink, day(15)).unwrap();
  assert_eq!(again.suppressed, 1);
  assert!(again.batches.is_empty());
}

#[test]
fn unavailable_source_persists_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let mut store = FileStateStore::open(dir.path()).unwrap();
  let source = FileSource::new(dir.path().join("missing.log"));
  let err = engine()
    .scan_alerts(&source, &mut store, &mut Recorder::default(), day(15))
    .unwrap_err();
  assert!(matches!(err, EngineError::Source { .. }));
  assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn extraction_is_context_free() {
  let engine = engine();
  let line = "[2025-01-15T10:00:01Z INFO] datapoint: bam_connection-metrics bundle_received=4i outbound_fail=2i";
  let alone = engine.extractor().classify(line);
  for noise in alert_log().lines() {
    engine.extractor().classify(noise);
  }
  assert_eq!(engine.extractor().classify(line), alone);
  assert!(alone.is_some());
}

#[test]
fn deterministic_report_json_across_runs() {
  let log = alert_log();
  let a = serde_json::to_string(&engine().report("x", log.lines())).unwrap();
  let b = serde_json::to_string(&engine().report("x", log.lines())).unwrap();
  assert_eq!(a, b);

  let value: serde_json::Value = serde_json::from_str(&a).unwrap();
  assert_eq!(value["connection_summary"]["status"], "issues_detected");
  let counts: BTreeMap<String, u64> =
    serde_json::from_value(value["connection_summary"]["error_counts"].clone()).unwrap();
  assert_eq!(counts["connect_failed"], 2);
  assert_eq!(counts["inbound_closed"], 1);
}
