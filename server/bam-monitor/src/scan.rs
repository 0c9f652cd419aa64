//! Offset-tracked incremental reads.
//!
//! A sized source is read from the stored offset up to the length observed at
//! the start of the scan. Only complete lines are consumed: an unterminated
//! trailing fragment stays unread and its bytes are not counted, so the next
//! scan sees it again once the writer finishes the line. That keeps any split
//! of the log into successive scans equivalent to one scan of the whole.

use std::io::{BufRead, Read};

use tracing::{info, warn};

use crate::error::EngineError;
use crate::source::LineSource;

/// What one incremental read produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
  pub lines: Vec<String>,
  /// Offset the read started from (0 after rotation).
  pub start_offset: u64,
  /// Offset to persist; `None` for unsized sources.
  pub end_offset: Option<u64>,
  /// The stored offset was past the end of the source.
  pub rotated: bool,
  /// The read failed part-way; `end_offset` is the observed length regardless.
  pub partial: bool,
}

/// Read the lines appended since `stored`.
///
/// Fails only when the source cannot be sized or opened; nothing should be
/// persisted in that case.
pub fn read_new_lines(
  source: &dyn LineSource,
  stored: Option<u64>,
) -> Result<ScanOutcome, EngineError> {
  let name = source.name();
  let Some(len) = source.byte_len()? else {
    let mut reader = source.open_at(0)?;
    let (lines, _, failed) = read_lines(&mut reader, u64::MAX, name);
    return Ok(ScanOutcome {
      lines,
      partial: failed,
      ..ScanOutcome::default()
    });
  };

  let mut offset = stored.unwrap_or(0);
  let mut rotated = false;
  if offset > len {
    warn!(source = name, stored = offset, len, "source shrank; assuming rotation and rescanning from 0");
    offset = 0;
    rotated = true;
  }

  if offset == len {
    return Ok(ScanOutcome {
      start_offset: offset,
      end_offset: Some(len),
      rotated,
      ..ScanOutcome::default()
    });
  }

  let mut reader = source.open_at(offset)?;
  let (lines, consumed, failed) = read_lines(&mut reader, len - offset, name);
  let end = if failed { len } else { offset + consumed };
  info!(source = name, from = offset, to = end, lines = lines.len(), "incremental scan");

  Ok(ScanOutcome {
    lines,
    start_offset: offset,
    end_offset: Some(end),
    rotated,
    partial: failed,
  })
}

/// Every line of a source, including an unterminated last line.
pub fn read_all_lines(source: &dyn LineSource) -> Result<Vec<String>, EngineError> {
  let mut reader = source.open_at(0)?;
  let mut lines = Vec::new();
  let mut buf = Vec::new();
  loop {
    buf.clear();
    let n = reader
      .read_until(b'\n', &mut buf)
      .map_err(|e| EngineError::source_unavailable(source.name(), e.to_string()))?;
    if n == 0 {
      break;
    }
    lines.push(decode(&buf));
  }
  Ok(lines)
}

/// Complete lines within the first `limit` bytes: (lines, bytes consumed, read failed).
fn read_lines(reader: &mut dyn BufRead, limit: u64, source: &str) -> (Vec<String>, u64, bool) {
  let mut bounded = reader.take(limit);
  let mut lines = Vec::new();
  let mut consumed = 0u64;
  let mut buf = Vec::new();
  loop {
    buf.clear();
    match bounded.read_until(b'\n', &mut buf) {
      Ok(0) => break,
      Ok(n) => {
        if buf.last() != Some(&b'\n') {
          // Trailing fragment: leave it for the next scan.
          break;
        }
        consumed += n as u64;
        lines.push(decode(&buf));
      }
      Err(e) => {
        warn!(source, consumed, error = %e, "read failed mid-scan; keeping partial progress");
        return (lines, consumed, true);
      }
    }
  }
  (lines, consumed, false)
}

/// Lossy UTF-8 without the line terminator.
fn decode(raw: &[u8]) -> String {
  let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
  let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
  String::from_utf8_lossy(trimmed).into_owned()
}
