//! Classify raw validator log lines into typed datapoints.
//!
//! The rule table is ordered data compiled once: the first rule whose
//! predicate matches a line owns it, even if extraction then fails. Rules are
//! listed from most to least specific so no line can count under two kinds.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::EngineError;
use crate::types::{Datapoint, DatapointKind, FieldValue, Severity};

pub type Fields = BTreeMap<String, FieldValue>;

type ExtractFn = Box<dyn Fn(&str, &KeyValues<'_>) -> Result<Fields, String> + Send + Sync>;

/// Integer fields carried by `bam_connection-metrics` datapoints.
pub const METRIC_FIELDS: [&str; 8] = [
  "bundle_received",
  "bundleresult_sent",
  "bundle_forward_to_scheduler_fail",
  "outbound_fail",
  "unhealthy_connection_count",
  "heartbeat_received",
  "heartbeat_sent",
  "leaderstate_sent",
];

/// Metric fields whose non-zero value marks a line as an anomaly.
pub const FAILURE_FIELDS: [&str; 3] = [
  "unhealthy_connection_count",
  "outbound_fail",
  "bundle_forward_to_scheduler_fail",
];

/// Result of running one line through the rule table.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
  /// No rule predicate matched.
  Unmatched,
  /// A rule claimed the line but its fields could not be extracted.
  Malformed { rule: &'static str, reason: String },
  Matched { rule: &'static str, datapoint: Datapoint },
}

struct Rule {
  name: &'static str,
  kind: DatapointKind,
  predicate: Regex,
  extract: ExtractFn,
}

/// Influx-style `key=value` pairs of one line, parsed lazily.
pub struct KeyValues<'a> {
  pairs: HashMap<&'a str, &'a str>,
}

impl<'a> KeyValues<'a> {
  fn parse(re: &Regex, line: &'a str) -> Self {
    let mut pairs = HashMap::new();
    for caps in re.captures_iter(line) {
      if let (Some(k), Some(v)) = (caps.get(1), caps.get(2)) {
        pairs.entry(k.as_str()).or_insert(v.as_str());
      }
    }
    Self { pairs }
  }

  /// An integer field (`name=123i`). `Ok(None)` when absent.
  fn int(&self, name: &str) -> Result<Option<u64>, String> {
    match self.pairs.get(name) {
      None => Ok(None),
      Some(raw) => raw
        .strip_suffix('i')
        .and_then(|digits| digits.parse::<u64>().ok())
        .map(Some)
        .ok_or_else(|| format!("{}: not an integer field: {}", name, raw)),
    }
  }

  fn required_int(&self, name: &str) -> Result<u64, String> {
    self.int(name)?.ok_or_else(|| format!("{}: missing", name))
  }

  fn quoted(&self, name: &str) -> Option<String> {
    self
      .pairs
      .get(name)
      .map(|v| v.trim_matches('"').to_string())
  }
}

/// Ordered, immutable rule table plus the shared timestamp and key/value patterns.
pub struct Extractor {
  rules: Vec<Rule>,
  validator_timestamp: Regex,
  timestamp: Regex,
  key_values: Regex,
}

impl Extractor {
  pub fn new() -> Result<Self, EngineError> {
    Ok(Self {
      rules: build_rules()?,
      validator_timestamp: compile(r"\[(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})")?,
      timestamp: compile(r"(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})")?,
      key_values: compile(r#"([A-Za-z_][A-Za-z0-9_]*)=("[^"]*"|[^\s,]+)"#)?,
    })
  }

  /// Rule names in evaluation order.
  #[cfg(test)]
  pub fn rule_names(&self) -> Vec<&'static str> {
    self.rules.iter().map(|r| r.name).collect()
  }

  /// Convenience wrapper: the datapoint, if any.
  pub fn classify(&self, line: &str) -> Option<Datapoint> {
    match self.extract(line) {
      Extraction::Matched { datapoint, .. } => Some(datapoint),
      _ => None,
    }
  }

  pub fn extract(&self, line: &str) -> Extraction {
    let rule = match self.rules.iter().find(|r| r.predicate.is_match(line)) {
      Some(r) => r,
      None => return Extraction::Unmatched,
    };

    let timestamp = match self.parse_timestamp(line) {
      Some(ts) => ts,
      None => {
        return Extraction::Malformed {
          rule: rule.name,
          reason: "missing or invalid timestamp".into(),
        }
      }
    };

    let kv = KeyValues::parse(&self.key_values, line);
    match (rule.extract)(line, &kv) {
      Ok(fields) => Extraction::Matched {
        rule: rule.name,
        datapoint: Datapoint {
          kind: rule.kind,
          timestamp,
          fields,
        },
      },
      Err(reason) => Extraction::Malformed {
        rule: rule.name,
        reason,
      },
    }
  }

  /// The validator's own `[YYYY-MM-DDTHH:MM:SS` stamp (UTC), else the first bare one.
  ///
  /// Journal output prefixes its own stamp, which may be in local time.
  pub fn parse_timestamp(&self, line: &str) -> Option<DateTime<Utc>> {
    let caps = self
      .validator_timestamp
      .captures(line)
      .or_else(|| self.timestamp.captures(line))?;
    NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%dT%H:%M:%S")
      .ok()
      .map(|naive| naive.and_utc())
  }
}

fn compile(pattern: &str) -> Result<Regex, EngineError> {
  Regex::new(pattern).map_err(|e| EngineError::config(format!("pattern {}: {}", pattern, e)))
}

fn int_fields(pairs: &[(&str, u64)]) -> Fields {
  pairs
    .iter()
    .map(|(k, v)| (k.to_string(), FieldValue::Int(*v)))
    .collect()
}

fn event_fields(event: &str, severity: Severity, message: String) -> Fields {
  let mut fields = Fields::new();
  fields.insert("event".into(), FieldValue::Text(event.to_string()));
  fields.insert("severity".into(), FieldValue::Text(severity.as_str().to_string()));
  fields.insert("message".into(), FieldValue::Text(message));
  fields
}

fn clip(s: &str, max: usize) -> String {
  s.trim().chars().take(max).collect()
}

type MessageFn = fn(&regex::Captures<'_>) -> String;

/// Connection log messages, most specific first.
fn connection_messages() -> [(&'static str, Severity, &'static str, MessageFn); 15] {
  [
    ("connected", Severity::Info, r"BAM connection established", |_| {
      "BAM connection established".into()
    }),
    ("url_changed", Severity::Info, r"BAM URL changed", |_| {
      "BAM URL changed (will reconnect)".into()
    }),
    (
      "identity_updater",
      Severity::Info,
      r"BAM Manager: Added BAM connection key updater",
      |_| "BAM Manager initialized".into(),
    ),
    (
      "new_identity",
      Severity::Info,
      r"BAM Manager: detected new identity (\S+)",
      |c| format!("New identity detected: {}", &c[1]),
    ),
    ("not_healthy", Severity::Warn, r"BAM connection not healthy", |_| {
      "Connection not healthy (no heartbeat for 6s)".into()
    }),
    ("connection_lost", Severity::Warn, r"BAM connection lost", |_| {
      "BAM connection lost".into()
    }),
    (
      "identity_timeout",
      Severity::Warn,
      r"BAM Manager: timed out waiting for new identity",
      |_| "Timed out waiting for new identity in cluster info".into(),
    ),
    (
      "connect_failed",
      Severity::Error,
      r"Failed to connect to BAM with url: (\S+?): (.+)",
      |c| format!("Connection failed to {}: {}", &c[1], clip(&c[2], 50)),
    ),
    (
      "stream_failed",
      Severity::Error,
      r"Failed to start scheduler stream: (.+)",
      |c| format!("Scheduler stream failed: {}", clip(&c[1], 50)),
    ),
    (
      "auth_failed",
      Severity::Error,
      r"Failed to (prepare auth response|send initial auth proof|get auth challenge)",
      |c| format!("Authentication failed: {}", &c[1]),
    ),
    ("inbound_closed", Severity::Error, r"Inbound stream closed", |_| {
      "Inbound stream closed unexpectedly".into()
    }),
    (
      "inbound_error",
      Severity::Error,
      r"Failed to receive message from inbound stream: (.+)",
      |c| format!("Inbound stream error: {}", clip(&c[1], 50)),
    ),
    (
      "config_failed",
      Severity::Error,
      r"Failed to get config: (.+)",
      |c| format!("Config fetch failed: {}", clip(&c[1], 50)),
    ),
    (
      "unsupported_msg",
      Severity::Error,
      r"Received unsupported versioned message",
      |_| "Received unsupported protocol message".into(),
    ),
    (
      "set_bam_url",
      Severity::Debug,
      r"set_bam_url old=\s*([^,]+),\s*new=(.+)",
      |c| format!("BAM URL changed via RPC: {} -> {}", c[1].trim(), c[2].trim()),
    ),
  ]
}

fn rule<F>(name: &'static str, kind: DatapointKind, predicate: Regex, extract: F) -> Rule
where
  F: Fn(&str, &KeyValues<'_>) -> Result<Fields, String> + Send + Sync + 'static,
{
  Rule {
    name,
    kind,
    predicate,
    extract: Box::new(extract),
  }
}

fn build_rules() -> Result<Vec<Rule>, EngineError> {
  let mut rules = vec![
    rule(
      "connection_metrics",
      DatapointKind::ConnectionMetric,
      compile(r"bam_connection-metrics")?,
      |_, kv| {
        let mut fields = Fields::new();
        for name in METRIC_FIELDS {
          if let Some(v) = kv.int(name)? {
            fields.insert(name.to_string(), FieldValue::Int(v));
          }
        }
        Ok(fields)
      },
    ),
    rule(
      "manually_disconnected",
      DatapointKind::ConnectionEvent,
      compile(r"bam_manually_disconnected")?,
      |_, kv| {
        let prev = kv
          .quoted("previous_bam_url")
          .unwrap_or_else(|| "unknown".into());
        Ok(event_fields(
          "disconnected",
          Severity::Info,
          format!("BAM manually disconnected (was: {})", prev),
        ))
      },
    ),
    rule(
      "identity_changed",
      DatapointKind::ConnectionEvent,
      compile(r"bam-manager_identity-changed")?,
      |_, kv| {
        let id = kv
          .quoted("identity_changed_to")
          .unwrap_or_else(|| "unknown".into());
        Ok(event_fields(
          "identity_change",
          Severity::Info,
          format!("Identity changed to {}", id),
        ))
      },
    ),
    rule(
      "leader_slot_announced",
      DatapointKind::SlotAnnounced,
      compile(r"replay_stage-my_leader_slot")?,
      |_, kv| Ok(int_fields(&[("slot", kv.required_int("slot")?)])),
    ),
    rule(
      "leader_slot_cost",
      DatapointKind::SlotProduced,
      compile(r"cost_tracker_stats,is_leader=true")?,
      |_, kv| {
        Ok(int_fields(&[
          ("slot", kv.required_int("bank_slot")?),
          ("block_cost", kv.required_int("block_cost")?),
          ("vote_cost", kv.required_int("vote_cost")?),
          ("transaction_count", kv.required_int("transaction_count")?),
          ("total_fee", kv.required_int("total_transaction_fee")?),
          ("priority_fee", kv.required_int("total_priority_fee")?),
        ]))
      },
    ),
    rule(
      "broadcast_shreds",
      DatapointKind::BroadcastTiming,
      compile(r"broadcast-process-shreds-stats")?,
      |_, kv| {
        Ok(int_fields(&[
          ("slot", kv.required_int("slot")?),
          ("broadcast_time_us", kv.required_int("slot_broadcast_time")?),
        ]))
      },
    ),
    rule(
      "scheduler_slot_timing",
      DatapointKind::SchedulerTiming,
      compile(r"banking_stage_scheduler_slot_timing")?,
      |_, kv| {
        Ok(int_fields(&[
          ("slot", kv.required_int("slot")?),
          ("receive_time_us", kv.required_int("receive_time_us")?),
          ("schedule_time_us", kv.required_int("schedule_time_us")?),
        ]))
      },
    ),
  ];

  let bundle_exec = compile(r"execution results: bundle signatures: (\[.*?\]), result: ([^,]+)")?;
  let signature = compile(r"[1-9A-HJ-NP-Za-km-z]{43,88}")?;
  rules.push(rule(
    "bundle_result",
    DatapointKind::BundleResult,
    compile(r"execution results: bundle signatures:")?,
    move |line, _| {
      let caps = bundle_exec
        .captures(line)
        .ok_or_else(|| "bundle result: unrecognized layout".to_string())?;
      // Transaction signatures are 64 bytes, 87-88 base58 characters.
      let signatures = signature
        .find_iter(&caps[1])
        .filter(|m| (80..=90).contains(&m.len()))
        .count();
      if signatures == 0 {
        return Err("bundle result: no signatures".into());
      }
      let mut fields = int_fields(&[("transactions", signatures as u64)]);
      fields.insert(
        "result".into(),
        FieldValue::Text(bundle_result_class(&caps[2]).to_string()),
      );
      Ok(fields)
    },
  ));

  let frozen = compile(r"bank frozen: (\d+)")?;
  rules.push(rule(
    "bank_frozen",
    DatapointKind::SlotFrozen,
    compile(r"bank frozen:")?,
    move |line, _| {
      let slot = frozen
        .captures(line)
        .and_then(|c| c[1].parse::<u64>().ok())
        .ok_or_else(|| "bank frozen: slot missing".to_string())?;
      Ok(int_fields(&[("slot", slot)]))
    },
  ));

  for (event, severity, pattern, message) in connection_messages() {
    let re = compile(pattern)?;
    rules.push(rule(
      event,
      DatapointKind::ConnectionEvent,
      re.clone(),
      move |line, _| {
        let caps = re
          .captures(line)
          .ok_or_else(|| format!("{}: pattern did not capture", event))?;
        Ok(event_fields(event, severity, message(&caps)))
      },
    ));
  }

  // Catch-all: any other ERROR line that mentions BAM.
  let body = compile(r"^\[[^\]]*\]\s*(.*)$")?;
  rules.push(rule(
    "bam_error",
    DatapointKind::ConnectionEvent,
    compile(r"(?i:bam).* ERROR | ERROR .*(?i:bam)")?,
    move |line, _| {
      let text = body
        .captures(line)
        .and_then(|c| c.get(1))
        .map_or(line, |m| m.as_str());
      Ok(event_fields(
        "bam_error",
        Severity::Error,
        format!("BAM error: {}", clip(text, 80)),
      ))
    },
  ));

  Ok(rules)
}

/// Result class of a bundle execution, from the debug-formatted result value.
fn bundle_result_class(result: &str) -> &'static str {
  if result.contains("Ok(") {
    "success"
  } else if result.contains("LockError") {
    "lock_error"
  } else if result.contains("TransactionFailure") {
    "tx_failure"
  } else if result.contains("ExceedsBlockCostLimit") {
    "cost_limit"
  } else if result.contains("ExceedsBundleCost") {
    "bundle_cost_limit"
  } else if result.contains("TipError") {
    "tip_error"
  } else if result.contains("Err(") {
    "error"
  } else {
    "unknown"
  }
}
