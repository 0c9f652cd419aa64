//! Cross-invocation alert dedup: suppress lines whose fingerprint was already seen today.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::fingerprint;
use crate::types::DedupState;

/// Working copy of the dedup state for one run.
#[derive(Debug, Clone, Default)]
pub struct DedupGate {
  state: DedupState,
}

impl DedupGate {
  pub fn new(state: DedupState) -> Self {
    Self { state }
  }

  /// Clear the hash set when `today` differs from the stored day.
  ///
  /// Returns true when a reset happened.
  pub fn roll_date(&mut self, today: NaiveDate) -> bool {
    if self.state.last_reset == Some(today) {
      return false;
    }
    let cleared = self.state.hashes.len();
    self.state.hashes.clear();
    self.state.last_reset = Some(today);
    info!(%today, cleared, "dedup state reset for new day");
    true
  }

  /// True when the line is new (and records it); false when already seen.
  pub fn admit(&mut self, line: &str) -> bool {
    let fp = fingerprint::of_line(line);
    let fresh = self.state.hashes.insert(fp);
    if !fresh {
      debug!(line, "suppressed duplicate alert line");
    }
    fresh
  }

  pub fn state(&self) -> &DedupState {
    &self.state
  }
}
