use crate::error::{StoreError, StoreResult};
use crate::storage::{CommandDefinition, InputValueSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";

/// Which directory under the settings root a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Commands,
    Inputs,
}

impl RecordKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Commands => "commands",
            RecordKind::Inputs => "inputs",
        }
    }
}

/// A value that can be persisted as one `<id>.json` file.
pub trait StoredRecord: Serialize + DeserializeOwned {
    const KIND: RecordKind;

    /// Identifier carried inside the record, if the record has one.
    fn embedded_id(&self) -> Option<&str> {
        None
    }

    /// Called on load when the record did not carry its own identifier.
    fn adopt_id(&mut self, _id: &str) {}
}

impl StoredRecord for CommandDefinition {
    const KIND: RecordKind = RecordKind::Commands;

    fn embedded_id(&self) -> Option<&str> {
        Some(self.id.as_str()).filter(|id| !id.is_empty())
    }

    fn adopt_id(&mut self, id: &str) {
        self.id = id.to_string();
    }
}

impl StoredRecord for InputValueSet {
    const KIND: RecordKind = RecordKind::Inputs;
}

/// File-per-record store rooted at the settings directory.
#[derive(Debug, Clone)]
pub struct StoreManager {
    base_dir: PathBuf,
}

impl StoreManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn dir_path(&self, kind: RecordKind) -> PathBuf {
        self.base_dir.join(kind.dir_name())
    }

    pub fn record_path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.dir_path(kind).join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    pub fn ensure_dir(&self, kind: RecordKind) -> StoreResult<PathBuf> {
        let dir = self.dir_path(kind);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(dir)
    }

    /// Loads every parseable record of `T`'s kind, keyed by id.
    ///
    /// Files that cannot be read or parsed are logged and skipped. A missing
    /// or uncreatable directory yields an empty map.
    pub fn load_all<T: StoredRecord>(&self) -> BTreeMap<String, T> {
        let mut records = BTreeMap::new();

        let dir = match self.ensure_dir(T::KIND) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "records directory unavailable");
                return records;
            }
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return records,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to list records directory");
                return records;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match Self::read_record::<T>(&path) {
                Ok(mut record) => {
                    let id = match record.embedded_id() {
                        Some(id) => id.to_string(),
                        None => {
                            record.adopt_id(stem);
                            stem.to_string()
                        }
                    };
                    debug!(kind = T::KIND.dir_name(), id = %id, "loaded record");
                    records.insert(id, record);
                }
                Err(e) => warn!(error = %e, "skipping unreadable record"),
            }
        }

        records
    }

    fn read_record<T: StoredRecord>(path: &Path) -> StoreResult<T> {
        let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| StoreError::json(path, e))
    }

    /// Writes `record` to `<id>.json`, replacing any previous file.
    pub fn save<T: StoredRecord>(&self, id: &str, record: &T) -> StoreResult<()> {
        let dir = self.ensure_dir(T::KIND)?;
        let path = self.record_path(T::KIND, id);
        let content = serde_json::to_string_pretty(record).map_err(|e| StoreError::json(&path, e))?;

        // Write next to the target and rename so readers never see half a file.
        let temp_path = dir.join(format!(
            ".{}.{}.tmp-{}",
            id,
            RECORD_EXTENSION,
            std::process::id()
        ));
        fs::write(&temp_path, content).map_err(|e| StoreError::io(&temp_path, e))?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(&path, e));
        }
        Ok(())
    }

    /// Removes `<id>.json`. A file that is already gone counts as deleted.
    pub fn delete(&self, kind: RecordKind, id: &str) -> StoreResult<()> {
        let path = self.record_path(kind, id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}
