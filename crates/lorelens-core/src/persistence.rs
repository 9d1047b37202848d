//! Durable key-value slot the vector store persists into, and the record format stored there.
//!
//! The whole store lives in one JSON record:
//!
//! ```json
//! { "formatVersion": 1, "entries": { "doc1": [[1.0, 2.0], [3.0, 4.0]] } }
//! ```
//!
//! Records written by another format version go through a registered [`Migration`].

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::store::ValidationReason;

/// Format version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Storage key of the store when no namespace is configured.
pub const STORAGE_KEY: &str = "lorelens.vector-store";

/// Document id → chunk vectors, in insertion order.
pub type Entries = IndexMap<String, Vec<Vec<f32>>>;

/// Key for a store, suffixed with `namespace` so several stores can share one storage.
pub fn storage_key(namespace: Option<&str>) -> String {
    match namespace.filter(|ns| !ns.is_empty()) {
        Some(ns) => format!("{STORAGE_KEY}.{ns}"),
        None => STORAGE_KEY.to_string(),
    }
}

/// A synchronous string key-value slot (local storage, a directory of files, ...).
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

/// Process-local storage. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`. Characters outside `[A-Za-z0-9._-]` are replaced by `_`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(path, e)),
        }
    }

    /// Writes to a sibling temp file first, then renames over the target.
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::Io(self.dir.clone(), e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(|e| PersistenceError::Io(tmp.clone(), e))?;
        std::fs::rename(&tmp, &path).map_err(|e| PersistenceError::Io(path, e))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordRef<'a> {
    format_version: u32,
    entries: &'a Entries,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionTag {
    format_version: u32,
}

#[derive(Deserialize)]
struct CurrentRecord {
    #[serde(default)]
    entries: Entries,
}

#[derive(Deserialize)]
struct ForeignRecord {
    #[serde(default)]
    entries: serde_json::Value,
}

/// Serialize `entries` as a current-version record.
pub fn encode(entries: &Entries) -> Result<String, PersistenceError> {
    let record = RecordRef {
        format_version: FORMAT_VERSION,
        entries,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Entries read back from a record.
#[derive(Debug, Default)]
pub struct Decoded {
    pub entries: Entries,
    /// Stored format version, when it differed from [`FORMAT_VERSION`].
    pub migrated_from: Option<u32>,
}

/// Parse a record, running the migration registered for its version if it is not current.
pub fn decode(raw: &str, migrations: &Migrations) -> Result<Decoded, PersistenceError> {
    let VersionTag { format_version } = serde_json::from_str(raw)?;
    if format_version == FORMAT_VERSION {
        let record: CurrentRecord = serde_json::from_str(raw)?;
        return Ok(Decoded {
            entries: record.entries,
            migrated_from: None,
        });
    }
    let migration = migrations
        .get(format_version)
        .ok_or(PersistenceError::UnsupportedVersion {
            found: format_version,
            supported: FORMAT_VERSION,
        })?;
    let record: ForeignRecord = serde_json::from_str(raw)?;
    let entries = migration.migrate(record.entries)?;
    Ok(Decoded {
        entries,
        migrated_from: Some(format_version),
    })
}

/// Converts the `entries` payload of an older record into current entries.
pub trait Migration: Send + Sync {
    fn migrate(&self, entries: serde_json::Value) -> Result<Entries, PersistenceError>;
}

impl<F> Migration for F
where
    F: Fn(serde_json::Value) -> Result<Entries, PersistenceError> + Send + Sync,
{
    fn migrate(&self, entries: serde_json::Value) -> Result<Entries, PersistenceError> {
        self(entries)
    }
}

/// Migrations keyed by the stored format version they read. Empty by default,
/// so any foreign version is rejected.
#[derive(Clone, Default)]
pub struct Migrations {
    by_version: HashMap<u32, Arc<dyn Migration>>,
}

impl Migrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, from_version: u32, migration: impl Migration + 'static) -> Self {
        self.by_version.insert(from_version, Arc::new(migration));
        self
    }

    pub fn get(&self, from_version: u32) -> Option<&dyn Migration> {
        self.by_version.get(&from_version).map(|m| m.as_ref())
    }
}

impl std::fmt::Debug for Migrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut versions: Vec<_> = self.by_version.keys().collect();
        versions.sort();
        f.debug_struct("Migrations").field("versions", &versions).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage I/O failed for {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported format version {found} (this build reads {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("migration from version {from} failed: {message}")]
    Migration { from: u32, message: String },
    #[error("persisted document {id} is invalid: {reason}")]
    InvalidEntry { id: String, reason: ValidationReason },
    #[error("storage backend: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entries {
        let mut e = Entries::new();
        e.insert("b".into(), vec![vec![1.0, 2.0]]);
        e.insert("a".into(), vec![vec![3.0, 4.0], vec![5.0, 6.0]]);
        e
    }

    #[test]
    fn record_shape() {
        let json = encode(&sample()).unwrap();
        assert_eq!(
            json,
            r#"{"formatVersion":1,"entries":{"b":[[1.0,2.0]],"a":[[3.0,4.0],[5.0,6.0]]}}"#
        );
    }

    #[test]
    fn decode_keeps_entry_order() {
        let decoded = decode(&encode(&sample()).unwrap(), &Migrations::new()).unwrap();
        assert_eq!(decoded.entries.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(decoded.migrated_from.is_none());
    }

    #[test]
    fn decode_keeps_order_of_unsorted_ids() {
        let raw = r#"{"formatVersion":1,"entries":{"z":[[1]],"m":[[2]],"a":[[3]]}}"#;
        let decoded = decode(raw, &Migrations::new()).unwrap();
        assert_eq!(decoded.entries.keys().collect::<Vec<_>>(), vec!["z", "m", "a"]);
        assert_eq!(encode(&decoded.entries).unwrap(), r#"{"formatVersion":1,"entries":{"z":[[1.0]],"m":[[2.0]],"a":[[3.0]]}}"#);
    }

    #[test]
    fn record_without_entries_is_empty() {
        let decoded = decode(r#"{"formatVersion":1}"#, &Migrations::new()).unwrap();
        assert!(decoded.entries.is_empty());
    }

    #[test]
    fn foreign_version_without_migration_is_rejected() {
        let err = decode(r#"{"formatVersion":0,"entries":{}}"#, &Migrations::new()).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedVersion { found: 0, supported: 1 }
        ));
    }

    #[test]
    fn registered_migration_runs() {
        // Version 0 stored a single vector per document.
        let migrations = Migrations::new().register(0, |value: serde_json::Value| -> Result<Entries, PersistenceError> {
            let old: IndexMap<String, Vec<f32>> =
                serde_json::from_value(value).map_err(|e| PersistenceError::Migration {
                    from: 0,
                    message: e.to_string(),
                })?;
            Ok(old.into_iter().map(|(id, v)| (id, vec![v])).collect())
        });
        let decoded = decode(r#"{"formatVersion":0,"entries":{"x":[1,2]}}"#, &migrations).unwrap();
        assert_eq!(decoded.entries["x"], vec![vec![1.0, 2.0]]);
        assert_eq!(decoded.migrated_from, Some(0));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            decode("{not json", &Migrations::new()),
            Err(PersistenceError::Json(_))
        ));
    }

    #[test]
    fn storage_key_namespacing() {
        assert_eq!(storage_key(None), "lorelens.vector-store");
        assert_eq!(storage_key(Some("")), "lorelens.vector-store");
        assert_eq!(storage_key(Some("world-1")), "lorelens.vector-store.world-1");
    }

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v1").unwrap();
        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(
            storage.path_for("a/b c"),
            dir.path().join("nested").join("a_b_c.json")
        );
    }

    #[test]
    fn memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
    }
}
