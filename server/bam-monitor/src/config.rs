//! Monitor configuration with sane defaults, optionally loaded from YAML.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineError;

/// Solana `SIMPLE_VOTE_USAGE_COST`: compute units charged per vote transaction.
pub const DEFAULT_VOTE_CU_COST: u64 = 3428;

pub const DEFAULT_JOURNAL_SERVICE: &str = "sol.service";
pub const DEFAULT_JOURNAL_HOURS: u32 = 24;

/// Where log lines come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSelector {
  File { path: PathBuf },
  Journal { service: String, hours: u32 },
}

impl Default for SourceSelector {
  fn default() -> Self {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    Self::File {
      path: home.join("logs").join("validator.log"),
    }
  }
}

/// Which connection events make it into the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
  /// Warnings, errors and connect/disconnect transitions only.
  #[default]
  EventsOnly,
  All,
}

/// Tunable thresholds and paths.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub source: SourceSelector,
  pub verbosity: Verbosity,
  /// Flag a value "high" when strictly above this multiple of the column median.
  pub outlier_high_ratio: f64,
  /// Flag a value "low" when strictly below this multiple of the column median.
  pub outlier_low_ratio: f64,
  /// A slot is small when user txns and block CUs are both below this multiple of their medians.
  pub small_block_ratio: f64,
  pub vote_cu_cost: u64,
  /// Columns with fewer observations than this get no outlier flags.
  pub min_outlier_observations: usize,
  /// Max lines carried in one alert batch.
  pub alert_sample_cap: usize,
  /// Delay between successive alert category submissions.
  pub alert_pacing_ms: u64,
  /// Host label attached to alert batches.
  pub host: String,
  pub state_dir: PathBuf,
}

impl Default for Config {
  fn default() -> Self {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    Self {
      source: SourceSelector::default(),
      verbosity: Verbosity::EventsOnly,
      outlier_high_ratio: 1.20,
      outlier_low_ratio: 0.80,
      small_block_ratio: 0.25,
      vote_cu_cost: DEFAULT_VOTE_CU_COST,
      min_outlier_observations: 2,
      alert_sample_cap: 20,
      alert_pacing_ms: 2000,
      host: local_hostname(),
      state_dir: home.join(".local").join("state").join("bam-monitor"),
    }
  }
}

impl Config {
  /// Load a YAML config file; missing keys keep their defaults.
  pub fn load(path: &Path) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)
      .map_err(|e| EngineError::config(format!("{}: {}", path.display(), e)))?;
    Self::from_yaml(&raw)
  }

  pub fn from_yaml(raw: &str) -> Result<Self, EngineError> {
    // An empty document deserializes to unit, not a map.
    if raw.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(raw).map_err(|e| EngineError::config(e.to_string()))
  }

  /// Collect every validation problem rather than stopping at the first.
  pub fn validate(&self) -> Result<(), Vec<EngineError>> {
    let mut errors = Vec::new();
    if !(self.outlier_low_ratio > 0.0) {
      errors.push(EngineError::config("outlier_low_ratio must be > 0"));
    }
    if !(self.outlier_high_ratio > self.outlier_low_ratio) {
      errors.push(EngineError::config(
        "outlier_high_ratio must be greater than outlier_low_ratio",
      ));
    }
    if !(self.small_block_ratio > 0.0) {
      errors.push(EngineError::config("small_block_ratio must be > 0"));
    }
    if self.vote_cu_cost == 0 {
      errors.push(EngineError::config("vote_cu_cost must be > 0"));
    }
    if self.min_outlier_observations < 2 {
      errors.push(EngineError::config("min_outlier_observations must be >= 2"));
    }
    if self.alert_sample_cap == 0 {
      errors.push(EngineError::config("alert_sample_cap must be >= 1"));
    }
    if let SourceSelector::Journal { service, hours } = &self.source {
      if service.trim().is_empty() {
        errors.push(EngineError::config("journal service must not be empty"));
      }
      if *hours == 0 {
        errors.push(EngineError::config("journal hours must be >= 1"));
      }
    }
    if errors.is_empty() {
      Ok(())
    } else {
      Err(errors)
    }
  }

  pub fn alert_pacing(&self) -> Duration {
    Duration::from_millis(self.alert_pacing_ms)
  }
}

fn local_hostname() -> String {
  if let Ok(h) = std::env::var("HOSTNAME") {
    if !h.trim().is_empty() {
      return h.trim().to_string();
    }
  }
  std::fs::read_to_string("/etc/hostname")
    .ok()
    .map(|h| h.trim().to_string())
    .filter(|h| !h.is_empty())
    .unwrap_or_else(|| "unknown".to_string())
}
