//! Alert candidates, batching and delivery.

use std::collections::BTreeMap;
use std::io::Write;

use crate::error::EngineError;
use crate::extract::FAILURE_FIELDS;
use crate::types::{AlertBatch, AlertCategory, Datapoint, DatapointKind, Severity};

/// Delivery seam for alert batches.
pub trait AlertSink {
  fn submit(&mut self, batch: &AlertBatch) -> Result<(), EngineError>;
}

/// Writes each batch as one JSON line.
pub struct JsonLinesSink<W: Write> {
  out: W,
}

impl<W: Write> JsonLinesSink<W> {
  pub fn new(out: W) -> Self {
    Self { out }
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write> AlertSink for JsonLinesSink<W> {
  fn submit(&mut self, batch: &AlertBatch) -> Result<(), EngineError> {
    serde_json::to_writer(&mut self.out, batch)?;
    writeln!(self.out).map_err(|e| EngineError::sink(e.to_string()))?;
    self.out.flush().map_err(|e| EngineError::sink(e.to_string()))
  }
}

/// Alert category of a classified line, if it warrants one.
pub fn categorize(dp: &Datapoint) -> Option<AlertCategory> {
  match dp.kind {
    DatapointKind::ConnectionEvent => {
      let severity = dp.text("severity").and_then(Severity::from_str_loose)?;
      matches!(severity, Severity::Warn | Severity::Error).then_some(AlertCategory::ConnectionError)
    }
    DatapointKind::ConnectionMetric => FAILURE_FIELDS
      .iter()
      .any(|f| dp.int(f).unwrap_or(0) > 0)
      .then_some(AlertCategory::MetricAnomaly),
    _ => None,
  }
}

/// One batch per category with new lines, in category order. Samples keep the first `cap` lines.
pub fn build_batches(
  new_lines: &BTreeMap<AlertCategory, Vec<String>>,
  cap: usize,
  host: &str,
) -> Vec<AlertBatch> {
  AlertCategory::ALL
    .iter()
    .filter_map(|category| {
      let lines = new_lines.get(category).filter(|l| !l.is_empty())?;
      Some(AlertBatch {
        category: *category,
        new_count: lines.len(),
        sample_lines: lines.iter().take(cap).cloned().collect(),
        host: host.to_string(),
      })
    })
    .collect()
}
