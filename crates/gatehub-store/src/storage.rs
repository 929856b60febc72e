use std::fs;
use std::path::{Path, PathBuf};

use gatehub_events::{Bus, TOPIC_STORE_WRITE_FAILED};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::{check_segment, StoreError};

/// File-per-key JSON store rooted at a state directory.
///
/// Keys are `/`-delimited; each segment becomes a directory except the last,
/// which becomes `<segment>.json`. Writes go through a sibling temp file and
/// a rename, so readers only ever see a complete document or nothing.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
    bus: Option<Bus>,
}

/// One enumerated collection member: file stem plus parsed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    pub value: T,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "local store opened");
        Ok(Self { root, bus: None })
    }

    /// Attach a bus; failed best-effort writes are announced on it.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its on-disk path, refusing traversal.
    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "empty key",
            });
        }
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(seg) = segments.next() {
            check_segment(key, seg)?;
            if segments.peek().is_some() {
                path.push(seg);
            } else {
                path.push(format!("{seg}.json"));
            }
        }
        Ok(path)
    }

    /// Serialize `value` and persist it under `key`, atomically.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        let result = self.write_json(&path, value);
        if let Err(err) = &result {
            warn!(key, error = %err, "record write failed");
            if let Some(bus) = &self.bus {
                bus.publish(
                    TOPIC_STORE_WRITE_FAILED,
                    None,
                    &json!({ "key": key, "error": err.to_string() }),
                );
            }
        }
        result
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read and parse the record under `key`. Missing files, invalid keys,
    /// and unparsable content all read as absent; the latter is logged.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = match self.key_path(key) {
            Ok(p) => p,
            Err(err) => {
                warn!(key, error = %err, "rejected record key");
                return None;
            }
        };
        let data = match fs::read_to_string(&path) {
            Ok(d) => d,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(key, error = %err, "record read failed");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(key, error = %err, "record unparsable, treating as absent");
                None
            }
        }
    }

    /// Remove the record under `key`; absent records are a no-op.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Enumerate the records directly inside the directory named by `prefix`.
    ///
    /// Re-reads the directory every call. Entries that fail to parse are
    /// skipped with a warning rather than failing the listing; subdirectories
    /// are never descended into.
    pub fn list_collection<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<Record<T>>, StoreError> {
        let mut dir = self.root.clone();
        if !prefix.is_empty() {
            for seg in prefix.split('/') {
                check_segment(prefix, seg)?;
                dir.push(seg);
            }
        }
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|data| Ok(serde_json::from_str::<T>(&data)?));
            match parsed {
                Ok(value) => out.push(Record { id, value }),
                Err(err) => {
                    warn!(prefix, id, error = %err, "skipping unparsable collection entry");
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_round_trip() {
        let (_dir, store) = store();
        store.put("settings", &json!({"theme": "dark"})).unwrap();
        let got: Value = store.get("settings").unwrap();
        assert_eq!(got, json!({"theme": "dark"}));
    }

    #[test]
    fn nested_keys_become_directories() {
        let (dir, store) = store();
        store.put("local-database/users/u1", &json!({"n": 1})).unwrap();
        assert!(dir.path().join("local-database/users/u1.json").is_file());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.put("k", &json!(1)).unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(store.get::<Value>("k").is_none());
    }

    #[test]
    fn unparsable_content_reads_as_absent() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        assert!(store.get::<Value>("bad").is_none());
    }

    #[test]
    fn listing_is_not_recursive_and_skips_bad_files() {
        let (dir, store) = store();
        store.put("coll/a", &json!({"v": 1})).unwrap();
        store.put("coll/nested/deep", &json!({"v": 2})).unwrap();
        std::fs::write(dir.path().join("coll/broken.json"), b"oops").unwrap();
        let rows: Vec<Record<Value>> = store.list_collection("coll").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a");
    }

    #[test]
    fn listing_missing_directory_is_empty() {
        let (_dir, store) = store();
        let rows: Vec<Record<Value>> = store.list_collection("nowhere").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let (_dir, store) = store();
        assert!(store.put("../escape", &json!(1)).is_err());
        assert!(store.put("a//b", &json!(1)).is_err());
        assert!(store.put("", &json!(1)).is_err());
        assert!(store.get::<Value>("../escape").is_none());
    }

    #[test]
    fn no_partial_file_visible_after_put() {
        let (dir, store) = store();
        store.put("big", &json!({"payload": "x".repeat(4096)})).unwrap();
        // Only the final file remains; the temp sibling is renamed away.
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["big.json".to_string()]);
    }
}
