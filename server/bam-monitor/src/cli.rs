//! Command-line interface using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{Config, SourceSelector, Verbosity, DEFAULT_JOURNAL_HOURS, DEFAULT_JOURNAL_SERVICE};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
  /// Human-readable text (default).
  #[default]
  Text,
  /// Structured JSON for log aggregation.
  Json,
}

/// BAM connectivity and leader-activity monitor for validator logs.
#[derive(Parser, Debug)]
#[command(name = "bam-monitor")]
#[command(version)]
#[command(about = "BAM connectivity and leader-activity monitor for validator logs")]
pub struct Cli {
  /// Path to a YAML configuration file.
  #[arg(short = 'c', long = "config", global = true)]
  pub config: Option<PathBuf>,

  /// Log format: text or json.
  #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, env = "LOG_FORMAT", global = true)]
  pub log_format: LogFormat,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Print an activity report for the whole source as JSON.
  Report {
    #[command(flatten)]
    source: SourceArgs,

    /// Show all connection events, not just state changes and problems.
    #[arg(long)]
    verbose: bool,
  },
  /// Scan lines appended since the last run and emit deduplicated alert batches.
  Alert {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,

    /// Compute alerts without persisting offsets or dedup state.
    #[arg(long = "dry-run")]
    dry_run: bool,
  },
  /// Forget stored offset and dedup state for a source.
  Reset {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long = "state-dir")]
    state_dir: Option<PathBuf>,
  },
}

/// Where to read lines from; overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
  /// Read a log file.
  #[arg(short = 'f', long = "file", conflicts_with = "journal")]
  pub file: Option<PathBuf>,

  /// Read from journalctl for a systemd unit.
  #[arg(short = 'j', long = "journal", num_args = 0..=1, default_missing_value = DEFAULT_JOURNAL_SERVICE)]
  pub journal: Option<String>,

  /// Journal lookback window in hours.
  #[arg(long = "hours", requires = "journal")]
  pub hours: Option<u32>,
}

impl SourceArgs {
  /// Apply the flags on top of the configured source.
  pub fn apply(&self, config: &mut Config) {
    if let Some(path) = &self.file {
      config.source = SourceSelector::File { path: path.clone() };
    } else if let Some(service) = &self.journal {
      let configured_hours = match &config.source {
        SourceSelector::Journal { hours, .. } => *hours,
        SourceSelector::File { .. } => DEFAULT_JOURNAL_HOURS,
      };
      config.source = SourceSelector::Journal {
        service: service.clone(),
        hours: self.hours.unwrap_or(configured_hours),
      };
    }
  }
}

impl Command {
  /// Fold subcommand flags into the loaded config.
  pub fn apply(&self, config: &mut Config) {
    match self {
      Self::Report { source, verbose } => {
        source.apply(config);
        if *verbose {
          config.verbosity = Verbosity::All;
        }
      }
      Self::Alert {
        source, state_dir, ..
      }
      | Self::Reset { source, state_dir } => {
        source.apply(config);
        if let Some(dir) = state_dir {
          config.state_dir = dir.clone();
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn report_with_file_and_verbose() {
    let cli = Cli::try_parse_from(["bam-monitor", "report", "--file", "/tmp/v.log", "--verbose"]).unwrap();
    let mut config = Config::default();
    cli.command.apply(&mut config);
    assert_eq!(
      config.source,
      SourceSelector::File {
        path: PathBuf::from("/tmp/v.log")
      }
    );
    assert_eq!(config.verbosity, Verbosity::All);
  }

  #[test]
  fn bare_journal_flag_uses_default_service_and_hours() {
    let cli = Cli::try_parse_from(["bam-monitor", "report", "-j"]).unwrap();
    let mut config = Config::default();
    cli.command.apply(&mut config);
    assert_eq!(
      config.source,
      SourceSelector::Journal {
        service: "sol.service".into(),
        hours: 24
      }
    );
  }

  #[test]
  fn journal_with_hours() {
    let cli = Cli::try_parse_from(["bam-monitor", "alert", "--journal", "sol", "--hours", "4", "--dry-run"]).unwrap();
    let mut config = Config::default();
    cli.command.apply(&mut config);
    assert_eq!(
      config.source,
      SourceSelector::Journal {
        service: "sol".into(),
        hours: 4
      }
    );
    assert!(matches!(cli.command, Command::Alert { dry_run: true, .. }));
  }

  #[test]
  fn file_and_journal_conflict() {
    assert!(Cli::try_parse_from(["bam-monitor", "report", "-f", "a.log", "-j", "sol"]).is_err());
  }

  #[test]
  fn state_dir_override() {
    let cli = Cli::try_parse_from(["bam-monitor", "reset", "--state-dir", "/tmp/state"]).unwrap();
    let mut config = Config::default();
    cli.command.apply(&mut config);
    assert_eq!(config.state_dir, PathBuf::from("/tmp/state"));
  }

  #[test]
  fn log_format_json_and_global_config() {
    let cli = Cli::try_parse_from(["bam-monitor", "report", "--log-format", "json", "-c", "/etc/bam.yaml"]).unwrap();
    assert!(matches!(cli.log_format, LogFormat::Json));
    assert_eq!(cli.config, Some(PathBuf::from("/etc/bam.yaml")));
  }

  #[test]
  fn subcommand_is_required() {
    assert!(Cli::try_parse_from(["bam-monitor"]).is_err());
  }
}
