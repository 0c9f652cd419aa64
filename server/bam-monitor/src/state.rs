//! Persisted scan state: byte offsets and dedup hashes per source.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::EngineError;
use crate::types::DedupState;

/// Storage seam for offsets and dedup state.
///
/// Callers hold at most one store per state directory; no locking is done here.
pub trait StateStore {
  fn offset(&self, source: &str) -> Result<Option<u64>, EngineError>;
  fn put_offset(&mut self, source: &str, offset: u64) -> Result<(), EngineError>;
  fn dedup(&self, source: &str) -> Result<DedupState, EngineError>;
  fn put_dedup(&mut self, source: &str, state: &DedupState) -> Result<(), EngineError>;
  /// Forget the offset and dedup state of one source together.
  fn reset(&mut self, source: &str) -> Result<(), EngineError>;
}

/// Map a source name onto a file-name-safe key.
pub fn state_key(source: &str) -> String {
  let key: String = source
    .trim_start_matches('/')
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
    .collect();
  if key.is_empty() {
    "default".to_string()
  } else {
    key
  }
}

/// One directory; `<key>.offset`, `<key>.hashes` and `<key>.date` per source.
#[derive(Debug, Clone)]
pub struct FileStateStore {
  dir: PathBuf,
}

impl FileStateStore {
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
    let dir = dir.into();
    fs::create_dir_all(&dir)
      .map_err(|e| EngineError::state(format!("{}: {}", dir.display(), e)))?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path(&self, source: &str, ext: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", state_key(source), ext))
  }

  fn read(&self, path: &Path) -> Result<Option<String>, EngineError> {
    match fs::read_to_string(path) {
      Ok(s) => Ok(Some(s)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(EngineError::state(format!("{}: {}", path.display(), e))),
    }
  }

  /// Write through a temp file and rename so readers never see a half-written file.
  fn write_atomic(&self, path: &Path, contents: &str) -> Result<(), EngineError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let result = fs::File::create(&tmp)
      .and_then(|mut f| {
        f.write_all(contents.as_bytes())?;
        f.sync_all()
      })
      .and_then(|_| fs::rename(&tmp, path));
    result.map_err(|e| EngineError::state(format!("{}: {}", path.display(), e)))
  }

  fn remove(&self, path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(EngineError::state(format!("{}: {}", path.display(), e))),
    }
  }
}

impl StateStore for FileStateStore {
  fn offset(&self, source: &str) -> Result<Option<u64>, EngineError> {
    let path = self.path(source, "offset");
    let Some(raw) = self.read(&path)? else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<u64>()
      .map(Some)
      .map_err(|e| EngineError::state(format!("{}: bad offset {:?}: {}", path.display(), raw.trim(), e)))
  }

  fn put_offset(&mut self, source: &str, offset: u64) -> Result<(), EngineError> {
    debug!(source, offset, "persisting offset");
    self.write_atomic(&self.path(source, "offset"), &format!("{}\n", offset))
  }

  fn dedup(&self, source: &str) -> Result<DedupState, EngineError> {
    let hashes: BTreeSet<String> = self
      .read(&self.path(source, "hashes"))?
      .map(|raw| {
        raw
          .lines()
          .map(str::trim)
          .filter(|l| !l.is_empty())
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default();

    let date_path = self.path(source, "date");
    let last_reset = match self.read(&date_path)? {
      None => None,
      Some(raw) => Some(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        EngineError::state(format!("{}: bad date {:?}: {}", date_path.display(), raw.trim(), e))
      })?),
    };

    Ok(DedupState { hashes, last_reset })
  }

  fn put_dedup(&mut self, source: &str, state: &DedupState) -> Result<(), EngineError> {
    let mut body = String::new();
    for hash in &state.hashes {
      body.push_str(hash);
      body.push('\n');
    }
    self.write_atomic(&self.path(source, "hashes"), &body)?;
    match state.last_reset {
      Some(day) => self.write_atomic(
        &self.path(source, "date"),
        &format!("{}\n", day.format("%Y-%m-%d")),
      ),
      None => self.remove(&self.path(source, "date")),
    }
  }

  fn reset(&mut self, source: &str) -> Result<(), EngineError> {
    for ext in ["offset", "hashes", "date"] {
      self.remove(&self.path(source, ext))?;
    }
    Ok(())
  }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
  offsets: BTreeMap<String, u64>,
  dedup: BTreeMap<String, DedupState>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl StateStore for MemoryStateStore {
  fn offset(&self, source: &str) -> Result<Option<u64>, EngineError> {
    Ok(self.offsets.get(source).copied())
  }

  fn put_offset(&mut self, source: &str, offset: u64) -> Result<(), EngineError> {
    self.offsets.insert(source.to_string(), offset);
    Ok(())
  }

  fn dedup(&self, source: &str) -> Result<DedupState, EngineError> {
    Ok(self.dedup.get(source).cloned().unwrap_or_default())
  }

  fn put_dedup(&mut self, source: &str, state: &DedupState) -> Result<(), EngineError> {
    self.dedup.insert(source.to_string(), state.clone());
    Ok(())
  }

  fn reset(&mut self, source: &str) -> Result<(), EngineError> {
    self.offsets.remove(source);
    self.dedup.remove(source);
    Ok(())
  }
}
