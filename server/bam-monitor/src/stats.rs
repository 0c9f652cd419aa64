//! Median-relative outlier flags, skipped-slot detection and small-block flags.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::correlation::Aggregates;
use crate::types::{Outlier, SlotFlags, SlotRecord};

/// Ratios are compared in basis points so that threshold checks stay exact.
const BASIS: u128 = 10_000;

fn basis_points(ratio: f64) -> u128 {
  (ratio * BASIS as f64).round() as u128
}

/// Twice the median, so an even-count median stays integral; `None` for an empty slice.
fn twice_median(values: &[u64]) -> Option<u128> {
  if values.is_empty() {
    return None;
  }
  let mut sorted = values.to_vec();
  sorted.sort_unstable();
  let mid = sorted.len() / 2;
  if sorted.len() % 2 == 0 {
    Some(u128::from(sorted[mid - 1]) + u128::from(sorted[mid]))
  } else {
    Some(u128::from(sorted[mid]) * 2)
  }
}

/// Median of the values; `None` for an empty slice. Even counts average the two middle values.
pub fn median(values: &[u64]) -> Option<f64> {
  twice_median(values).map(|m| m as f64 / 2.0)
}

/// Outlier classifier for one column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnStats {
  twice_median: Option<u128>,
  /// False when the column has too few observations to compare against.
  pub comparable: bool,
  high_bp: u128,
  low_bp: u128,
}

impl ColumnStats {
  pub fn new(values: &[u64], config: &Config) -> Self {
    Self {
      twice_median: twice_median(values),
      comparable: values.len() >= config.min_outlier_observations.max(2),
      high_bp: basis_points(config.outlier_high_ratio),
      low_bp: basis_points(config.outlier_low_ratio),
    }
  }

  pub fn median(&self) -> Option<f64> {
    self.twice_median.map(|m| m as f64 / 2.0)
  }

  /// Twice the median when flags can be computed: enough observations and a non-zero baseline.
  fn baseline(&self) -> Option<u128> {
    if !self.comparable {
      return None;
    }
    self.twice_median.filter(|m| *m > 0)
  }

  /// Strict comparison: a value sitting exactly on a threshold is not flagged.
  pub fn classify(&self, value: u64) -> Option<Outlier> {
    let twice = self.baseline()?;
    let scaled = scale(value);
    if scaled > twice.saturating_mul(self.high_bp) {
      Some(Outlier::High)
    } else if scaled < twice.saturating_mul(self.low_bp) {
      Some(Outlier::Low)
    } else {
      None
    }
  }

  /// Strictly below `ratio_bp` basis points of the median.
  fn below(&self, value: u64, ratio_bp: u128) -> bool {
    self
      .baseline()
      .is_some_and(|twice| scale(value) < twice.saturating_mul(ratio_bp))
  }
}

/// A value on the same footing as `twice_median * ratio_bp`.
fn scale(value: u64) -> u128 {
  u128::from(value) * 2 * BASIS
}

/// Announced minus produced. Pure set difference, independent of arrival order.
pub fn skipped_slots(announced: &BTreeSet<u64>, produced: &BTreeSet<u64>) -> BTreeSet<u64> {
  announced.difference(produced).copied().collect()
}

/// Outlier flags for the per-minute bundle columns.
#[derive(Debug, Clone)]
pub struct MinuteAnalysis {
  pub bundles: ColumnStats,
  pub results: ColumnStats,
}

/// Flags for one produced slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotAnalysis {
  pub flags: SlotFlags,
  pub small: bool,
}

/// Everything the analyzer derives from one run's aggregates.
#[derive(Debug, Clone)]
pub struct Analysis {
  /// Minutes that carried bundle traffic, in time order.
  pub active_minutes: Vec<String>,
  pub minutes: MinuteAnalysis,
  pub transactions: ColumnStats,
  pub votes: ColumnStats,
  pub user: ColumnStats,
  pub block_cost: ColumnStats,
  pub block_time: ColumnStats,
  pub slots: BTreeMap<u64, SlotAnalysis>,
  pub skipped: BTreeSet<u64>,
}

/// Run every analysis once over the final aggregated state.
pub fn analyze(agg: &Aggregates, config: &Config) -> Analysis {
  let active_minutes: Vec<String> = agg
    .minutes
    .iter()
    .filter(|(_, b)| b.bundles > 0)
    .map(|(k, _)| k.clone())
    .collect();
  let bundle_values: Vec<u64> = active_minutes
    .iter()
    .map(|m| agg.minutes[m].bundles)
    .collect();
  let result_values: Vec<u64> = active_minutes
    .iter()
    .map(|m| agg.minutes[m].results_sent)
    .collect();

  let produced: Vec<&SlotRecord> = agg.produced().collect();
  let vote_cu = config.vote_cu_cost;
  let small_bp = basis_points(config.small_block_ratio);
  let transactions = ColumnStats::new(&column(&produced, |r| Some(r.transaction_count)), config);
  let votes = ColumnStats::new(&column(&produced, |r| Some(r.votes(vote_cu))), config);
  let user = ColumnStats::new(&column(&produced, |r| Some(r.user_transactions(vote_cu))), config);
  let block_cost = ColumnStats::new(&column(&produced, |r| Some(r.block_cost)), config);
  let block_time = ColumnStats::new(&column(&produced, SlotRecord::block_time_us), config);

  let slots = produced
    .iter()
    .map(|r| {
      let user_count = r.user_transactions(vote_cu);
      let analysis = SlotAnalysis {
        flags: SlotFlags {
          transactions: transactions.classify(r.transaction_count),
          votes: votes.classify(r.votes(vote_cu)),
          user: user.classify(user_count),
          block_cost: block_cost.classify(r.block_cost),
          block_time: r.block_time_us().and_then(|t| block_time.classify(t)),
        },
        small: is_small_block(user_count, r.block_cost, &user, &block_cost, small_bp),
      };
      (r.slot, analysis)
    })
    .collect();

  Analysis {
    minutes: MinuteAnalysis {
      bundles: ColumnStats::new(&bundle_values, config),
      results: ColumnStats::new(&result_values, config),
    },
    active_minutes,
    transactions,
    votes,
    user,
    block_cost,
    block_time,
    slots,
    skipped: skipped_slots(&agg.announced, &agg.produced_slots()),
  }
}

/// Values of one slot column; slots without a defined value are left out.
fn column(produced: &[&SlotRecord], value: impl Fn(&SlotRecord) -> Option<u64>) -> Vec<u64> {
  produced.iter().filter_map(|&r| value(r)).collect()
}

/// Both user transactions and block CUs strictly under `ratio_bp` of their medians.
fn is_small_block(
  user_count: u64,
  block_cost: u64,
  user: &ColumnStats,
  cost: &ColumnStats,
  ratio_bp: u128,
) -> bool {
  user.below(user_count, ratio_bp) && cost.below(block_cost, ratio_bp)
}
