//! Core engine: owns the config and compiled rule table, runs reports and alert scans.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::alert::{self, AlertSink};
use crate::config::Config;
use crate::correlation::Correlator;
use crate::dedup::DedupGate;
use crate::error::EngineError;
use crate::extract::{Extraction, Extractor};
use crate::report;
use crate::scan;
use crate::source::LineSource;
use crate::state::StateStore;
use crate::stats;
use crate::types::*;

/// Outcome of one alert scan.
#[derive(Debug, Clone, Default)]
pub struct AlertRun {
  pub lines_scanned: usize,
  /// Lines that fell into an alert category, before dedup.
  pub candidates: usize,
  pub suppressed: usize,
  pub batches: Vec<AlertBatch>,
  pub delivered: usize,
  pub failed: usize,
  pub rotated: bool,
  pub partial: bool,
}

/// The monitor engine. Stateless across calls apart from what the `StateStore` holds.
pub struct Engine {
  config: Config,
  extractor: Extractor,
}

impl Engine {
  pub fn new(config: Config) -> Result<Self, EngineError> {
    if let Err(errors) = config.validate() {
      let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
      return Err(EngineError::config(joined.join("; ")));
    }
    Ok(Self {
      config,
      extractor: Extractor::new()?,
    })
  }

  pub fn with_defaults() -> Result<Self, EngineError> {
    Self::new(Config::default())
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn extractor(&self) -> &Extractor {
    &self.extractor
  }

  /// Build a report from an in-memory sequence of lines.
  pub fn report<I, S>(&self, source: &str, lines: I) -> Report
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut correlator = Correlator::new();
    let mut scanned = 0u64;
    for line in lines {
      scanned += 1;
      if let Some(dp) = self.classify(line.as_ref()) {
        correlator.record(&dp);
      }
    }
    let agg = correlator.finish();
    let analysis = stats::analyze(&agg, &self.config);
    info!(
      source,
      lines = scanned,
      datapoints = agg.datapoints,
      minutes = agg.minutes.len(),
      slots = agg.slots.len(),
      "report built"
    );
    report::build(source, scanned, &agg, &analysis, &self.config)
  }

  /// Read a whole source and report on it.
  pub fn report_source(&self, source: &dyn LineSource) -> Result<Report, EngineError> {
    let lines = scan::read_all_lines(source)?;
    Ok(self.report(source.name(), lines))
  }

  /// Incremental alert scan: new lines since the stored offset, deduplicated
  /// against today's hashes, delivered one batch per category.
  ///
  /// Dedup state and offset are persisted before delivery; a failing sink
  /// loses that batch rather than repeating it on the next run.
  pub fn scan_alerts(
    &self,
    source: &dyn LineSource,
    store: &mut dyn StateStore,
    sink: &mut dyn AlertSink,
    now: DateTime<Utc>,
  ) -> Result<AlertRun, EngineError> {
    let name = source.name();
    let stored = store.offset(name)?;
    let outcome = scan::read_new_lines(source, stored)?;

    let mut run = AlertRun {
      lines_scanned: outcome.lines.len(),
      rotated: outcome.rotated,
      partial: outcome.partial,
      ..AlertRun::default()
    };

    let mut gate = DedupGate::new(store.dedup(name)?);
    gate.roll_date(now.date_naive());

    let mut new_lines: BTreeMap<AlertCategory, Vec<String>> = BTreeMap::new();
    for line in &outcome.lines {
      let Some(category) = self.classify(line).as_ref().and_then(alert::categorize) else {
        continue;
      };
      run.candidates += 1;
      if gate.admit(line) {
        new_lines.entry(category).or_default().push(line.clone());
      } else {
        run.suppressed += 1;
      }
    }

    store.put_dedup(name, gate.state())?;
    if let Some(end) = outcome.end_offset {
      store.put_offset(name, end)?;
    }

    run.batches = alert::build_batches(&new_lines, self.config.alert_sample_cap, &self.config.host);
    let pacing = self.config.alert_pacing();
    for (i, batch) in run.batches.iter().enumerate() {
      if i > 0 && !pacing.is_zero() {
        std::thread::sleep(pacing);
      }
      match sink.submit(batch) {
        Ok(()) => run.delivered += 1,
        Err(e) => {
          run.failed += 1;
          warn!(category = batch.category.as_str(), error = %e, "alert delivery failed");
        }
      }
    }

    info!(
      source = name,
      lines = run.lines_scanned,
      candidates = run.candidates,
      suppressed = run.suppressed,
      batches = run.batches.len(),
      "alert scan complete"
    );
    Ok(run)
  }

  /// Classify one line, logging and dropping malformed ones.
  fn classify(&self, line: &str) -> Option<Datapoint> {
    match self.extractor.extract(line) {
      Extraction::Matched { datapoint, .. } => Some(datapoint),
      Extraction::Malformed { rule, reason } => {
        debug!(rule, reason = %reason, "dropping malformed line");
        None
      }
      Extraction::Unmatched => None,
    }
  }
}
