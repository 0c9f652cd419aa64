//! Assemble the activity report from the aggregates and their analysis.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{Config, Verbosity};
use crate::correlation::Aggregates;
use crate::stats::Analysis;
use crate::types::*;

/// Events shown without `--verbose`: state transitions plus anything warn or worse.
const TRANSITION_EVENTS: [&str; 3] = ["connected", "disconnected", "connection_lost"];
const DISCONNECT_EVENTS: [&str; 3] = ["connection_lost", "disconnected", "not_healthy"];

pub fn build(
  source: &str,
  lines_scanned: u64,
  agg: &Aggregates,
  analysis: &Analysis,
  config: &Config,
) -> Report {
  let bundle_activity = bundle_rows(agg, analysis);
  let leader_slots = slot_rows(agg, analysis, config);

  Report {
    source: source.to_string(),
    lines_scanned,
    datapoints: agg.datapoints,
    first_seen: agg.first_seen,
    last_seen: agg.last_seen,
    events: visible_events(&agg.events, config.verbosity),
    health: health_rows(agg),
    failures: failure_rows(agg),
    bundle_summary: bundle_summary(agg, analysis, &bundle_activity),
    bundle_results: agg.bundle_results.clone(),
    slot_summary: slot_summary(agg, analysis, config),
    connection_summary: connection_summary(agg),
    bundle_activity,
    leader_slots,
    skipped_slots: analysis.skipped.clone(),
  }
}

fn visible_events(events: &[ConnectionEvent], verbosity: Verbosity) -> Vec<ConnectionEvent> {
  match verbosity {
    Verbosity::All => events.to_vec(),
    Verbosity::EventsOnly => events
      .iter()
      .filter(|e| {
        matches!(e.severity, Severity::Warn | Severity::Error)
          || TRANSITION_EVENTS.contains(&e.event.as_str())
      })
      .cloned()
      .collect(),
  }
}

fn health_rows(agg: &Aggregates) -> Vec<HealthRow> {
  agg
    .minutes
    .iter()
    .filter(|(_, b)| b.samples > 0)
    .map(|(minute, b)| HealthRow {
      minute: minute.clone(),
      heartbeats: b.heartbeats,
      unhealthy: b.unhealthy,
      bundles: b.bundles,
      outbound_fail: b.outbound_fail,
    })
    .collect()
}

fn bundle_rows(agg: &Aggregates, analysis: &Analysis) -> Vec<BundleRow> {
  analysis
    .active_minutes
    .iter()
    .filter_map(|minute| {
      let b = agg.minutes.get(minute)?;
      Some(BundleRow {
        minute: minute.clone(),
        slot_range: b.slot_range(),
        bundles: b.bundles,
        results_sent: b.results_sent,
        pct_sent: percent(b.results_sent, b.bundles),
        bundles_flag: analysis.minutes.bundles.classify(b.bundles),
        results_flag: analysis.minutes.results.classify(b.results_sent),
      })
    })
    .collect()
}

fn failure_rows(agg: &Aggregates) -> Vec<FailureRow> {
  agg
    .minutes
    .iter()
    .filter(|(_, b)| b.scheduler_fail > 0 || b.outbound_fail > 0)
    .map(|(minute, b)| FailureRow {
      minute: minute.clone(),
      slot_range: b.slot_range(),
      scheduler_fail: b.scheduler_fail,
      outbound_fail: b.outbound_fail,
    })
    .collect()
}

/// Produced and skipped slots together, in slot order.
fn slot_rows(agg: &Aggregates, analysis: &Analysis, config: &Config) -> Vec<SlotRow> {
  let vote_cu = config.vote_cu_cost;
  let mut all: BTreeSet<u64> = agg.produced_slots();
  all.extend(analysis.skipped.iter().copied());

  all
    .into_iter()
    .map(|slot| match agg.slots.get(&slot).filter(|r| r.produced) {
      None => SlotRow::Skipped { slot },
      Some(r) => {
        let slot_analysis = analysis.slots.get(&slot).cloned().unwrap_or_default();
        SlotRow::Produced {
          slot,
          transactions: r.transaction_count,
          votes: r.votes(vote_cu),
          user: r.user_transactions(vote_cu),
          block_cost: r.block_cost,
          block_time_ms: r.block_time_ms(),
          total_fee: r.total_fee,
          priority_fee: r.priority_fee,
          flags: slot_analysis.flags,
          small: slot_analysis.small,
        }
      }
    })
    .collect()
}

fn bundle_summary(agg: &Aggregates, analysis: &Analysis, rows: &[BundleRow]) -> BundleSummary {
  let mut summary = BundleSummary {
    periods: rows.len(),
    median_bundles: analysis.minutes.bundles.median(),
    median_results: analysis.minutes.results.median(),
    ..BundleSummary::default()
  };
  for minute in &analysis.active_minutes {
    if let Some(b) = agg.minutes.get(minute) {
      add(&mut summary.bundles, b.bundles);
      add(&mut summary.results_sent, b.results_sent);
      add(&mut summary.scheduler_fail, b.scheduler_fail);
      add(&mut summary.outbound_fail, b.outbound_fail);
      add(&mut summary.heartbeats_active, b.heartbeats);
    }
  }
  for b in agg.minutes.values() {
    add(&mut summary.heartbeats_total, b.heartbeats);
    add(&mut summary.heartbeats_sent, b.heartbeats_sent);
    add(&mut summary.leaderstate_sent, b.leaderstate_sent);
    add(&mut summary.unhealthy_total, b.unhealthy);
  }
  summary.send_rate_pct = percent(summary.results_sent, summary.bundles);
  summary.failure_rate_pct = percent(
    summary.scheduler_fail.saturating_add(summary.outbound_fail),
    summary.bundles,
  );
  summary
}

fn slot_summary(agg: &Aggregates, analysis: &Analysis, config: &Config) -> SlotSummary {
  let vote_cu = config.vote_cu_cost;
  let mut summary = SlotSummary {
    skipped: analysis.skipped.len(),
    median_transactions: analysis.transactions.median(),
    median_block_time_ms: analysis.block_time.median().map(|us| us / 1000.0),
    small_blocks: analysis.slots.values().filter(|s| s.small).count(),
    ..SlotSummary::default()
  };
  for r in agg.produced() {
    summary.produced += 1;
    add(&mut summary.transactions, r.transaction_count);
    add(&mut summary.votes, r.votes(vote_cu));
    add(&mut summary.user, r.user_transactions(vote_cu));
    add(&mut summary.block_cost, r.block_cost);
    add(&mut summary.total_fee, r.total_fee);
    add(&mut summary.priority_fee, r.priority_fee);
  }
  summary.skip_rate_pct = percent(summary.skipped as u64, (summary.produced + summary.skipped) as u64);
  summary
}

fn connection_summary(agg: &Aggregates) -> ConnectionSummary {
  let mut error_counts: BTreeMap<String, u64> = BTreeMap::new();
  let mut warning_counts: BTreeMap<String, u64> = BTreeMap::new();
  for e in &agg.events {
    match e.severity {
      Severity::Error => *error_counts.entry(e.event.clone()).or_default() += 1,
      Severity::Warn => *warning_counts.entry(e.event.clone()).or_default() += 1,
      _ => {}
    }
  }

  let active_minutes = agg.minutes.values().filter(|b| b.samples > 0).count();
  let unhealthy_minutes = agg
    .minutes
    .values()
    .filter(|b| b.samples > 0 && b.unhealthy > 0)
    .count();
  let healthy_minutes = active_minutes - unhealthy_minutes;
  let uptime_pct = (active_minutes > 0).then(|| round2(healthy_minutes as f64 / active_minutes as f64 * 100.0));

  let status = if !error_counts.is_empty() {
    HealthStatus::IssuesDetected
  } else if !warning_counts.is_empty() {
    HealthStatus::MostlyHealthy
  } else {
    HealthStatus::Healthy
  };

  ConnectionSummary {
    established: agg.events.iter().filter(|e| e.event == "connected").count(),
    disconnections: agg
      .events
      .iter()
      .filter(|e| DISCONNECT_EVENTS.contains(&e.event.as_str()))
      .count(),
    active_minutes,
    healthy_minutes,
    unhealthy_minutes,
    uptime_pct,
    error_counts,
    warning_counts,
    status,
  }
}

fn add(total: &mut u64, value: u64) {
  *total = total.saturating_add(value);
}

/// `part / whole` as a percentage rounded to two decimals; 0 when `whole` is 0.
fn percent(part: u64, whole: u64) -> f64 {
  if whole == 0 {
    return 0.0;
  }
  round2(part as f64 / whole as f64 * 100.0)
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}
