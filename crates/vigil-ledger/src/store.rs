//! Append-only JSON-lines persistence.
//!
//! One record per line. Corrupt lines are skipped with a warning on load
//! so a torn write never poisons the whole log. Records round-trip
//! unknown fields (see the flattened `extra` maps on the record types).

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use vigil_core::errors::{GuidanceError, Result};

/// Append-only store of JSON-lines records of type `T`.
#[derive(Clone, Debug)]
pub struct JsonlStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonlStore<T> {
    /// Create a store backed by the given file. The file is created on
    /// first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line.
    pub fn append(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| GuidanceError::config(format!("unserializable record: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GuidanceError::persistence(self.path.display().to_string(), e))?;

        writeln!(file, "{line}")
            .map_err(|e| GuidanceError::persistence(self.path.display().to_string(), e))?;
        Ok(())
    }

    /// Load all records, skipping corrupt lines.
    ///
    /// A missing file reads as empty.
    pub fn load(&self) -> Result<Vec<T>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(GuidanceError::persistence(self.path.display().to_string(), e))
            }
        };

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.map_err(|e| GuidanceError::persistence(self.path.display().to_string(), e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_no + 1,
                        error = %e,
                        "skipping corrupt record"
                    );
                }
            }
        }
        Ok(records)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        value: u32,
    }

    fn store(dir: &tempfile::TempDir) -> JsonlStore<Record> {
        JsonlStore::new(dir.path().join("records.log"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn append_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let a = Record {
            name: "a".into(),
            value: 1,
        };
        let b = Record {
            name: "b".into(),
            value: 2,
        };
        store.append(&a).unwrap();
        store.append(&b).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![a, b]);
    }

    #[test]
    fn append_preserves_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for i in 0..5 {
            store
                .append(&Record {
                    name: format!("r{i}"),
                    value: i,
                })
                .unwrap();
        }
        // Prefix property: earlier snapshot is a prefix of the later one.
        let first_three: Vec<Record> = store.load().unwrap().into_iter().take(3).collect();
        store
            .append(&Record {
                name: "r5".into(),
                value: 5,
            })
            .unwrap();
        let after: Vec<Record> = store.load().unwrap();
        assert_eq!(&after[..3], &first_three[..]);
        assert_eq!(after.len(), 6);
    }

    #[test]
    fn corrupt_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .append(&Record {
                name: "good".into(),
                value: 1,
            })
            .unwrap();
        std::fs::write(
            store.path(),
            format!(
                "{}\nnot json at all\n{}\n",
                serde_json::to_string(&Record {
                    name: "a".into(),
                    value: 1
                })
                .unwrap(),
                serde_json::to_string(&Record {
                    name: "b".into(),
                    value: 2
                })
                .unwrap()
            ),
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].name, "b");
    }

    #[test]
    fn unwritable_path_surfaces_persistence_error() {
        let store: JsonlStore<Record> = JsonlStore::new("/nonexistent-dir/records.log");
        let err = store
            .append(&Record {
                name: "x".into(),
                value: 0,
            })
            .unwrap_err();
        assert_eq!(err.code(), "PERSISTENCE_ERROR");
    }
}
