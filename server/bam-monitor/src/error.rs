//! Structured error types for the monitor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// The line source could not be opened, sized or queried. Fatal for the run.
  #[error("source {source_name}: {reason}")]
  Source { source_name: String, reason: String },

  #[error("state: {0}")]
  State(String),

  #[error("config: {0}")]
  Config(String),

  #[error("sink: {0}")]
  Sink(String),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn source_unavailable(name: &str, reason: impl Into<String>) -> Self {
    Self::Source {
      source_name: name.to_string(),
      reason: reason.into(),
    }
  }

  pub fn state(msg: impl Into<String>) -> Self {
    Self::State(msg.into())
  }

  pub fn config(msg: impl Into<String>) -> Self {
    Self::Config(msg.into())
  }

  pub fn sink(msg: impl Into<String>) -> Self {
    Self::Sink(msg.into())
  }
}
