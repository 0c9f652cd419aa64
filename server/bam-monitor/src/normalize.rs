//! Normalize alert lines so cosmetic variation hashes to the same key.
//!
//! Timestamps, addresses, slot numbers, long numeric ids and URL host
//! prefixes change from one occurrence of a problem to the next; the rest of
//! the line is what identifies it.

use std::sync::LazyLock;

use regex::Regex;

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\[?\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
    .expect("valid regex")
});

static URL_HOST: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"([A-Za-z][A-Za-z0-9+.-]*://)(?:[A-Za-z0-9-]+\.)+([A-Za-z0-9-]+\.[A-Za-z]{2,})")
    .expect("valid regex")
});

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}(?::\d{1,5})?\b").expect("valid regex")
});

static SLOT: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b(bank_slot|slot)([= ])\d+i?\b").expect("valid regex")
});

static LONG_NUMBER: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\b\d{5,}i?\b").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Canonical form of an alert line. Pure; equal output means "same alert".
pub fn normalize_alert_line(line: &str) -> String {
  let s = TIMESTAMP.replace_all(line, "");
  let s = URL_HOST.replace_all(&s, "$1$2");
  let s = IPV4.replace_all(&s, "<ip>");
  let s = SLOT.replace_all(&s, "$1$2<slot>");
  let s = LONG_NUMBER.replace_all(&s, "<n>");
  WHITESPACE.replace_all(&s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_are_stripped() {
    let a = normalize_alert_line("[2025-01-15T10:30:00.123456789Z ERROR x] Inbound stream closed");
    let b = normalize_alert_line("[2025-01-16T23:01:59.000000001Z ERROR x] Inbound stream closed");
    assert_eq!(a, b);
    assert!(!a.contains("2025"));
  }

  #[test]
  fn ip_and_port_are_masked() {
    assert_eq!(
      normalize_alert_line("connect to 10.0.0.1:8899 refused"),
      "connect to <ip> refused"
    );
    assert_eq!(
      normalize_alert_line("connect to 192.168.1.20 refused"),
      "connect to <ip> refused"
    );
  }

  #[test]
  fn slot_numbers_are_masked() {
    assert_eq!(
      normalize_alert_line("bank_slot=301i failed slot 42 and slot=7"),
      "bank_slot=<slot> failed slot <slot> and slot=<slot>"
    );
  }

  #[test]
  fn long_numbers_masked_short_numbers_kept() {
    assert_eq!(normalize_alert_line("code 503 after 123456 us"), "code 503 after <n> us");
  }

  #[test]
  fn influx_integer_counters_are_masked() {
    let a = normalize_alert_line("datapoint: bam_connection-metrics bundle_received=123456i outbound_fail=2i");
    let b = normalize_alert_line("datapoint: bam_connection-metrics bundle_received=98765i outbound_fail=2i");
    assert_eq!(a, b);
    assert_eq!(a, "datapoint: bam_connection-metrics bundle_received=<n> outbound_fail=2i");
  }

  #[test]
  fn url_host_prefix_keeps_registrable_tail() {
    let a = normalize_alert_line("Failed to connect to BAM with url: https://ny.mainnet.bam.example.com: refused");
    let b = normalize_alert_line("Failed to connect to BAM with url: https://ams.mainnet.bam.example.com: refused");
    assert_eq!(a, b);
    assert!(a.contains("https://example.com"));
  }

  #[test]
  fn whitespace_collapsed_and_trimmed() {
    assert_eq!(normalize_alert_line("  a \t  b\n"), "a b");
  }

  #[test]
  fn idempotent() {
    let line = "[2025-01-15T10:30:00Z WARN] BAM connection lost 10.1.1.1:443 slot=99999";
    let once = normalize_alert_line(line);
    assert_eq!(normalize_alert_line(&once), once);
  }
}
