//! Stable fingerprint of a normalized alert line.

use crate::normalize::normalize_alert_line;

/// Hash an already-normalized line.
///
/// Uses blake3 for a fast, deterministic hash.
pub fn compute(normalized: &str) -> String {
  let hash = blake3::hash(normalized.as_bytes());
  // Use first 16 bytes (32 hex chars) for a compact but collision-resistant ID.
  let hex = hash.to_hex();
  hex[..32].to_string()
}

/// Normalize then hash a raw log line.
pub fn of_line(line: &str) -> String {
  compute(&normalize_alert_line(line))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_input_same_fingerprint() {
    assert_eq!(compute("BAM connection lost"), compute("BAM connection lost"));
  }

  #[test]
  fn different_text_different_fingerprint() {
    assert_ne!(compute("BAM connection lost"), compute("BAM connection not healthy"));
  }

  #[test]
  fn cosmetic_variation_same_fingerprint() {
    let a = of_line("[2025-01-15T10:30:00Z WARN x] BAM connection lost 10.0.0.1:443");
    let b = of_line("[2025-01-15T11:45:12Z WARN x] BAM connection lost 10.0.0.9:8443");
    assert_eq!(a, b);
  }

  #[test]
  fn fingerprint_is_32_hex_chars() {
    let fp = of_line("anything");
    assert_eq!(fp.len(), 32);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
