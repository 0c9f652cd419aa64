//! Binary entrypoint: parse flags, load config, run one report, alert scan or reset.
//!
//! Reports and alert batches go to stdout as JSON; logs go to stderr.

use std::io::{self, Write};

use anyhow::{Context, Result};
use bam_monitor::cli::{Cli, Command, LogFormat};
use bam_monitor::source::from_selector;
use bam_monitor::{Config, Engine, FileStateStore, JsonLinesSink, MemoryStateStore, StateStore};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

fn init_logging(format: LogFormat) {
  let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

  match format {
    LogFormat::Text => {
      tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
    }
    LogFormat::Json => {
      tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true)
        .with_env_filter(filter)
        .init();
    }
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.log_format);

  let mut config = match &cli.config {
    Some(path) => {
      info!(config_path = %path.display(), "loading configuration");
      Config::load(path)?
    }
    None => Config::default(),
  };
  cli.command.apply(&mut config);

  if let Err(errors) = config.validate() {
    for e in &errors {
      error!(error = %e, "invalid configuration");
    }
    std::process::exit(1);
  }

  let engine = Engine::new(config)?;
  let source = from_selector(&engine.config().source);

  match &cli.command {
    Command::Report { .. } => {
      let report = engine
        .report_source(source.as_ref())
        .with_context(|| format!("reading {}", source.name()))?;
      let stdout = io::stdout();
      let mut out = stdout.lock();
      serde_json::to_writer_pretty(&mut out, &report)?;
      writeln!(out)?;
    }
    Command::Alert { dry_run, .. } => {
      let mut store = FileStateStore::open(&engine.config().state_dir)?;
      let mut sink = JsonLinesSink::new(io::stdout().lock());
      let result = if *dry_run {
        let mut scratch = snapshot(&store, source.name())?;
        engine.scan_alerts(source.as_ref(), &mut scratch, &mut sink, Utc::now())
      } else {
        engine.scan_alerts(source.as_ref(), &mut store, &mut sink, Utc::now())
      };
      let run = result.with_context(|| format!("scanning {}", source.name()))?;
      info!(
        delivered = run.delivered,
        failed = run.failed,
        suppressed = run.suppressed,
        dry_run = *dry_run,
        "alert run finished"
      );
    }
    Command::Reset { .. } => {
      let mut store = FileStateStore::open(&engine.config().state_dir)?;
      store.reset(source.name())?;
      info!(source = source.name(), state_dir = %store.dir().display(), "state reset");
    }
  }

  Ok(())
}

/// Copy one source's persisted state so a dry run can mutate it freely.
fn snapshot(store: &dyn StateStore, name: &str) -> Result<MemoryStateStore> {
  let mut scratch = MemoryStateStore::new();
  if let Some(offset) = store.offset(name)? {
    scratch.put_offset(name, offset)?;
  }
  scratch.put_dedup(name, &store.dedup(name)?)?;
  Ok(scratch)
}
