use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Keyed persistence medium underneath the credential store.
///
/// # Implementations
///
/// - [`JsonFileStore`]: a single JSON document on disk, rewritten atomically
/// - [`MemoryStore`]: in-process only, for tests and headless runs
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Write several keys as one change: either all land or none do.
    fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Remove several keys as one change.
    fn delete_many(&self, keys: &[&str]) -> Result<()>;
}

/// Key-value store backed by one JSON object in a file.
///
/// The document is cached in memory and every mutation rewrites the whole
/// file via write-then-rename so a crash never leaves a torn file behind.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// An unreadable or non-object document is logged and treated as empty;
    /// the next write replaces it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| {
                Error::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        "Credential file {} is not a JSON object, starting empty",
                        path.display()
                    );
                    Map::new()
                }
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        atomic_write(&self.path, &contents)
    }
}

impl JsonFileStore {
    /// Apply `change` to a copy of the document and only adopt it once it is
    /// on disk, so a failed write leaves the cached view untouched.
    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>) -> bool,
    {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
            true
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn set_many(&self, new_entries: Vec<(String, Value)>) -> Result<()> {
        self.update(|entries| {
            let changed = !new_entries.is_empty();
            entries.extend(new_entries);
            changed
        })
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        self.update(|entries| {
            let mut changed = false;
            for key in keys {
                changed |= entries.remove(*key).is_some();
            }
            changed
        })
    }
}

/// Atomic file write using write-then-rename pattern
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)
        .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;

    file.write_all(contents.as_bytes())
        .map_err(|e| Error::Storage(format!("Failed to write temp file: {}", e)))?;

    // Ensure data is written to disk before rename
    file.sync_all()
        .map_err(|e| Error::Storage(format!("Failed to sync temp file: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Storage(format!("Failed to rename temp file: {}", e)))?;

    Ok(())
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn set_many(&self, new_entries: Vec<(String, Value)>) -> Result<()> {
        self.entries.lock().extend(new_entries);
        Ok(())
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
