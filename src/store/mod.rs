//! Keyed object store
//!
//! Generic save/load/exists/delete/list over slash-delimited keys, backed by
//! one file per key under a root directory.
//!
//! - **Format**: the record's shape picks JSON or Parquet, the caller picks
//!   gzip; `load` finds the file by probing suffixes, so callers never say
//!   which format was used.
//! - **Atomicity**: every write goes to a hidden temp file and is renamed over
//!   the destination. No partial file is ever visible under a key.
//! - **One representation**: saving a key removes files it had under other suffixes.
//! - **Backups**: overwrites and deletes first copy the current file into the
//!   backup area, keeping the newest few per key.
//! - **Locking**: a per-key mutex (sharded pool) serializes operations on a key.
//!
//! # Example
//!
//! ```rust,no_run
//! use trueno_results::store::{KeyedObjectStore, Record};
//!
//! # fn main() -> trueno_results::Result<()> {
//! let store = KeyedObjectStore::open("/tmp/results")?;
//! store.save("experiments/e1/summary", &Record::Json(serde_json::json!({"name": "e1"})), false)?;
//! assert!(store.exists("experiments/e1/summary")?);
//! let keys = store.list_keys("experiments/e1")?;
//! assert_eq!(keys, vec!["experiments/e1/summary".to_string()]);
//! # Ok(())
//! # }
//! ```

mod atomic;
mod backup;
pub mod format;
mod locks;

pub(crate) use atomic::write_atomic;
pub use format::{Encoding, StoredFormat};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageOp;
use crate::{Error, Result};
pub(crate) use locks::LockPool;

/// Default number of lock shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

/// Default number of backups kept per key.
pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// Shared handle passed to every component that touches storage.
pub type StorageHandle = Arc<KeyedObjectStore>;

/// Logical value stored under a key
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// JSON-compatible structure (summaries, metrics, manifests, canonical copies)
    Json(serde_json::Value),
    /// Large numeric table
    Table(RecordBatch),
}

impl Record {
    /// Encoding chosen for this record's shape
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        match self {
            Self::Json(_) => Encoding::Json,
            Self::Table(_) => Encoding::Parquet,
        }
    }

    /// JSON payload, if this is a JSON record
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Table(_) => None,
        }
    }

    /// Table payload, if this is a table record
    #[must_use]
    pub const fn as_table(&self) -> Option<&RecordBatch> {
        match self {
            Self::Table(batch) => Some(batch),
            Self::Json(_) => None,
        }
    }
}

impl From<serde_json::Value> for Record {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<RecordBatch> for Record {
    fn from(batch: RecordBatch) -> Self {
        Self::Table(batch)
    }
}

/// The file currently holding a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Absolute path of the file
    pub path: PathBuf,
    /// Format implied by its suffix
    pub format: StoredFormat,
}

/// File-backed keyed object store.
#[derive(Debug)]
pub struct KeyedObjectStore {
    root: PathBuf,
    locks: LockPool,
    backup_retention: usize,
}

impl KeyedObjectStore {
    /// Open (creating if needed) a store rooted at `root` with default options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(root, DEFAULT_LOCK_SHARDS, DEFAULT_BACKUP_RETENTION)
    }

    /// Open a store with an explicit lock pool size and backup retention.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the root directory cannot be created.
    pub fn with_options(
        root: impl Into<PathBuf>,
        lock_shards: usize,
        backup_retention: usize,
    ) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| Error::storage(root.display().to_string(), StorageOp::Save, e))?;
        Ok(Self {
            root,
            locks: LockPool::new(lock_shards),
            backup_retention,
        })
    }

    /// Storage root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `record` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for a malformed key
    /// - `Error::Serialization` if the record cannot be encoded
    /// - `Error::Storage` if the backup, write or rename fails
    pub fn save(&self, key: &str, record: &Record, compress: bool) -> Result<()> {
        validate_key(key)?;
        let format = StoredFormat::new(record.encoding(), compress);
        let bytes = format::encode(key, record, compress)?;

        let _guard = self.locks.lock(key);
        let existing = self.existing_files(key);
        if let Some(current) = existing.first() {
            self.backup(key, current)?;
        }

        let target = self.file_path(key, format);
        write_atomic(&target, &bytes).map_err(|e| Error::storage(key, StorageOp::Save, e))?;

        for stale in existing.iter().filter(|f| f.format != format) {
            remove_if_present(&stale.path).map_err(|e| Error::storage(key, StorageOp::Delete, e))?;
        }

        debug!(key, format = format.label(), bytes = bytes.len(), "saved record");
        Ok(())
    }

    /// Load the value under `key`; `Ok(None)` if absent.
    ///
    /// # Errors
    ///
    /// - `Error::Serialization` if the stored file is corrupt
    /// - `Error::Storage` if the file exists but cannot be read
    pub fn load(&self, key: &str) -> Result<Option<Record>> {
        validate_key(key)?;
        let _guard = self.locks.lock(key);
        let Some(file) = self.probe(key) else {
            return Ok(None);
        };

        let bytes = match fs::read(&file.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(key, StorageOp::Load, e)),
        };
        format::decode(key, file.format, &bytes).map(Some)
    }

    /// Whether any representation of `key` exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a malformed key.
    pub fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let _guard = self.locks.lock(key);
        Ok(self.probe(key).is_some())
    }

    /// Remove `key`. Returns `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backup or removal fails.
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let _guard = self.locks.lock(key);
        let existing = self.existing_files(key);
        let Some(current) = existing.first() else {
            return Ok(false);
        };

        self.backup(key, current)?;
        for file in &existing {
            remove_if_present(&file.path).map_err(|e| Error::storage(key, StorageOp::Delete, e))?;
        }
        debug!(key, "deleted record");
        Ok(true)
    }

    /// Keys equal to `prefix` or nested below it, sorted.
    ///
    /// `prefix` is matched on whole segments: `experiments/e1` does not match
    /// `experiments/e10/...`. An empty prefix lists every key. Entries that
    /// cannot be read are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a malformed non-empty prefix.
    pub fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let mut keys = Vec::new();

        if prefix.is_empty() {
            walk_keys(&self.root, "", &mut keys);
        } else {
            validate_key(prefix)?;
            if self.probe(prefix).is_some() {
                keys.push(prefix.to_string());
            }
            walk_keys(&self.root.join(prefix), prefix, &mut keys);
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Remove everything under `prefix` (keys, backups, derived files).
    ///
    /// Takes every lock shard, so no operation runs concurrently with it.
    /// Missing entries are not an error. Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if an existing subtree cannot be removed.
    pub fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.trim_end_matches('/');
        validate_key(prefix)?;
        let _guards = self.locks.lock_all();

        let removed = self.list_keys(prefix)?.len();
        for format in StoredFormat::PROBE_ORDER {
            remove_if_present(&self.file_path(prefix, format))
                .map_err(|e| Error::storage(prefix, StorageOp::Delete, e))?;
        }
        match fs::remove_dir_all(self.root.join(prefix)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(prefix, StorageOp::Delete, e)),
        }

        debug!(prefix, removed, "deleted prefix");
        Ok(removed)
    }

    /// Backup files of `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backup directory cannot be read.
    pub fn backups(&self, key: &str) -> Result<Vec<PathBuf>> {
        validate_key(key)?;
        backup::list(&self.root, key).map_err(|e| Error::storage(key, StorageOp::Backup, e))
    }

    /// The file `load` would read for `key`, without reading it.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a malformed key.
    pub fn locate(&self, key: &str) -> Result<Option<StoredFile>> {
        validate_key(key)?;
        Ok(self.probe(key))
    }

    /// Path for a file that shares `key`'s location but carries its own suffix
    /// (derived artifacts such as `.arrow`).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for a malformed key.
    pub fn sidecar_path(&self, key: &str, suffix: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}{suffix}")))
    }

    /// Run `f` while holding the lock of `key`.
    ///
    /// `f` must not call back into this store for a key on the same shard.
    pub fn with_key_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let _guard = self.locks.lock(key);
        f()
    }

    /// Serialize `value` to JSON and save it.
    ///
    /// # Errors
    ///
    /// Same as [`save`](Self::save).
    pub fn save_json<T: Serialize>(&self, key: &str, value: &T, compress: bool) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::serialization(key, e))?;
        self.save(key, &Record::Json(value), compress)
    }

    /// Load a JSON record and deserialize it into `T`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the record is a table or does not
    /// match `T`, plus everything [`load`](Self::load) can return.
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.load(key)? {
            None => Ok(None),
            Some(Record::Json(value)) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::serialization(key, e)),
            Some(Record::Table(_)) => Err(Error::serialization(key, "expected JSON, found table")),
        }
    }

    fn file_path(&self, key: &str, format: StoredFormat) -> PathBuf {
        self.root.join(format!("{key}{}", format.suffix()))
    }

    fn probe(&self, key: &str) -> Option<StoredFile> {
        StoredFormat::PROBE_ORDER.iter().find_map(|format| {
            let path = self.file_path(key, *format);
            path.is_file().then_some(StoredFile {
                path,
                format: *format,
            })
        })
    }

    fn existing_files(&self, key: &str) -> Vec<StoredFile> {
        StoredFormat::PROBE_ORDER
            .iter()
            .map(|format| StoredFile {
                path: self.file_path(key, *format),
                format: *format,
            })
            .filter(|file| file.path.is_file())
            .collect()
    }

    fn backup(&self, key: &str, current: &StoredFile) -> Result<()> {
        if self.backup_retention == 0 {
            return Ok(());
        }
        let path = backup::create(&self.root, key, &current.path, current.format)
            .map_err(|e| Error::storage(key, StorageOp::Backup, e))?;
        debug!(key, backup = %path.display(), "backed up record");

        // Extra backups are harmless; never fail the write over rotation
        if let Err(e) = backup::rotate(&self.root, key, self.backup_retention) {
            warn!(key, error = %e, "backup rotation failed");
        }
        Ok(())
    }
}

/// Reject keys that are empty, absolute, contain `.`/`..` or hidden segments.
///
/// # Errors
///
/// Returns `Error::InvalidInput` describing the problem.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("key must not be empty".to_string()));
    }
    if key.contains('\\') {
        return Err(Error::InvalidInput(format!("key '{key}' contains a backslash")));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment.starts_with('.') {
            return Err(Error::InvalidInput(format!(
                "key '{key}' has an empty or hidden segment"
            )));
        }
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn walk_keys(dir: &Path, key_prefix: &str, out: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            }
            return;
        }
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        // Backups, temp files
        if name.starts_with('.') {
            continue;
        }
        let Ok(file_type) = entry.file_type() else { continue };

        let join = |leaf: &str| {
            if key_prefix.is_empty() {
                leaf.to_string()
            } else {
                format!("{key_prefix}/{leaf}")
            }
        };

        if file_type.is_dir() {
            walk_keys(&entry.path(), &join(name), out);
        } else if let Some((stem, _)) = StoredFormat::split_file_name(name) {
            out.push(join(stem));
        }
    }
}
