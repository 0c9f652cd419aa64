//! Line sources: a log file on disk or a journald query.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::config::SourceSelector;
use crate::error::EngineError;

/// Ordered text lines plus, when the source is sized, a byte-offset contract:
/// `open_at(n)` yields exactly the bytes after the first `n`.
pub trait LineSource {
  /// Stable identifier; also the state key for offsets and dedup.
  fn name(&self) -> &str;

  /// Current total length in bytes, or `None` when the source cannot be sized.
  fn byte_len(&self) -> Result<Option<u64>, EngineError>;

  fn open_at(&self, offset: u64) -> Result<Box<dyn BufRead + '_>, EngineError>;
}

/// A plain log file.
#[derive(Debug, Clone)]
pub struct FileSource {
  path: PathBuf,
  name: String,
}

impl FileSource {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let name = path.display().to_string();
    Self { path, name }
  }

  fn unavailable(&self, e: impl std::fmt::Display) -> EngineError {
    EngineError::source_unavailable(&self.name, e.to_string())
  }
}

impl LineSource for FileSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn byte_len(&self) -> Result<Option<u64>, EngineError> {
    let meta = std::fs::metadata(&self.path).map_err(|e| self.unavailable(e))?;
    Ok(Some(meta.len()))
  }

  fn open_at(&self, offset: u64) -> Result<Box<dyn BufRead + '_>, EngineError> {
    let mut file = File::open(&self.path).map_err(|e| self.unavailable(e))?;
    file
      .seek(SeekFrom::Start(offset))
      .map_err(|e| self.unavailable(e))?;
    Ok(Box::new(BufReader::new(file)))
  }
}

/// `journalctl -u <service>` over a lookback window. Unsized: always read in full.
#[derive(Debug, Clone)]
pub struct JournalSource {
  service: String,
  hours: u32,
  name: String,
}

impl JournalSource {
  pub fn new(service: impl Into<String>, hours: u32) -> Self {
    let service = service.into();
    let name = format!("journal:{}", service);
    Self {
      service,
      hours,
      name,
    }
  }

  fn command(&self) -> Command {
    let mut cmd = Command::new("journalctl");
    cmd
      .arg("-u")
      .arg(&self.service)
      .arg("--no-pager")
      .arg("-o")
      .arg("short-iso")
      .arg("--utc")
      .arg("--since")
      .arg(format!("{} hours ago", self.hours));
    cmd
  }
}

impl LineSource for JournalSource {
  fn name(&self) -> &str {
    &self.name
  }

  fn byte_len(&self) -> Result<Option<u64>, EngineError> {
    Ok(None)
  }

  fn open_at(&self, offset: u64) -> Result<Box<dyn BufRead + '_>, EngineError> {
    debug!(service = %self.service, hours = self.hours, "querying journal");
    let output = self
      .command()
      .output()
      .map_err(|e| EngineError::source_unavailable(&self.name, format!("journalctl: {}", e)))?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(EngineError::source_unavailable(
        &self.name,
        format!("journalctl exited with {}: {}", output.status, stderr.trim()),
      ));
    }
    let mut cursor = Cursor::new(output.stdout);
    cursor.set_position(offset);
    Ok(Box::new(cursor))
  }
}

/// In-memory bytes; sized unless built with [`MemorySource::without_length`].
#[derive(Debug, Clone)]
pub struct MemorySource {
  name: String,
  bytes: Vec<u8>,
  sized: bool,
}

impl MemorySource {
  pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      name: name.into(),
      bytes: bytes.into(),
      sized: true,
    }
  }

  pub fn without_length(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      sized: false,
      ..Self::new(name, bytes)
    }
  }

  pub fn append(&mut self, more: &[u8]) {
    self.bytes.extend_from_slice(more);
  }

  /// Replace the contents, as a rotated or truncated file would look.
  pub fn replace(&mut self, bytes: impl Into<Vec<u8>>) {
    self.bytes = bytes.into();
  }
}

impl LineSource for MemorySource {
  fn name(&self) -> &str {
    &self.name
  }

  fn byte_len(&self) -> Result<Option<u64>, EngineError> {
    Ok(self.sized.then_some(self.bytes.len() as u64))
  }

  fn open_at(&self, offset: u64) -> Result<Box<dyn BufRead + '_>, EngineError> {
    let start = usize::try_from(offset)
      .unwrap_or(usize::MAX)
      .min(self.bytes.len());
    Ok(Box::new(&self.bytes[start..]))
  }
}

/// Build the source a config selects.
pub fn from_selector(selector: &SourceSelector) -> Box<dyn LineSource> {
  match selector {
    SourceSelector::File { path } => Box::new(FileSource::new(path.clone())),
    SourceSelector::Journal { service, hours } => Box::new(JournalSource::new(service.clone(), *hours)),
  }
}
