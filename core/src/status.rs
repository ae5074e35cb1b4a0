use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

/// Destination for run results and parameters. Keys are dotted paths into a
/// nested document; a leading dot is tolerated.
pub trait StatusSink {
    fn set(&mut self, key: &str, value: Value);

    fn get(&self, key: &str) -> Option<&Value>;

    /// Read a key as a UTC datetime, accepting RFC 3339 or a bare
    /// `YYYY-mm-dd HH:MM:SS[.ffffff]` taken as UTC.
    fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(Value::as_str).and_then(parse_date)
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// JSON status document backed by a file, in the shape the surrounding test
/// harness reads and extends run after run.
pub struct JsonStatus {
    root: Value,
    path: Option<PathBuf>,
}

impl JsonStatus {
    /// In-memory document with no backing file; `save` is a no-op.
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            path: None,
        }
    }

    /// Open an existing document, or start an empty one bound to `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let root = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        } else {
            Value::Object(Map::new())
        };
        Ok(Self {
            root,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let rendered = serde_json::to_string_pretty(&self.root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, rendered)?;
        debug!("Status data written to {}", path.display());
        Ok(())
    }
}

impl Default for JsonStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for JsonStatus {
    fn set(&mut self, key: &str, value: Value) {
        let parts: Vec<&str> = key.split('.').filter(|part| !part.is_empty()).collect();
        if parts.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for part in parts {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            // Indexing an object inserts Null for a missing key, which the
            // next round turns into an object.
            node = &mut node[part];
        }
        *node = value;
    }

    fn get(&self, key: &str) -> Option<&Value> {
        let mut node = &self.root;
        let mut descended = false;
        for part in key.split('.').filter(|part| !part.is_empty()) {
            descended = true;
            node = node.get(part)?;
        }
        descended.then_some(node)
    }
}
