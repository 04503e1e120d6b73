//! Directory-backed key-value store for persistent storage.
//!
//! Layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                    # Advisory lock for single-owner access
//! ├─ <key>.val               # One file per key
//! └─ <key>.val.tmp           # Transient, during an atomic replace
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const VALUE_EXT: &str = ".val";
const TEMP_EXT: &str = ".val.tmp";

/// A file-based key-value store.
///
/// Each key is stored in its own file inside the store directory. Values
/// are replaced atomically: the new bytes are written to a temporary file,
/// synced, and renamed over the old file, so a crash leaves either the old
/// or the new value, never a torn one.
///
/// # Exclusive ownership
///
/// Opening the store takes an exclusive advisory lock on `LOCK`. A second
/// `FileStore::open` on the same directory (from any process) fails with
/// [`StorageError::Locked`] until the first store is dropped.
///
/// # Example
///
/// ```no_run
/// use tradesync_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("offline")).unwrap();
/// store.set("tradesync.queue", b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Total bytes of keys and values, tracked for the quota.
    used: Mutex<u64>,
    capacity: Option<u64>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in the directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another store holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_inner(path, None)
    }

    /// Opens or creates a store limited to `capacity` bytes of keys and
    /// values.
    ///
    /// # Errors
    ///
    /// Same as [`FileStore::open`].
    pub fn open_with_capacity(path: &Path, capacity: u64) -> StorageResult<Self> {
        Self::open_inner(path, Some(capacity))
    }

    fn open_inner(path: &Path, capacity: Option<u64>) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        // Leftovers of an interrupted replace; the old value is still intact.
        let mut used = 0u64;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_EXT) {
                fs::remove_file(entry.path())?;
            } else if let Some(key) = name.strip_suffix(VALUE_EXT) {
                used += key.len() as u64 + entry.metadata()?.len();
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            used: Mutex::new(used),
            capacity,
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the total size of keys and values in bytes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        *self.used.lock()
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{VALUE_EXT}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}{TEMP_EXT}"))
    }

    fn stored_len(&self, key: &str) -> StorageResult<Option<u64>> {
        match fs::metadata(self.value_path(key)) {
            Ok(meta) => Ok(Some(key.len() as u64 + meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let mut used = self.used.lock();

        let replaced = self.stored_len(key)?.unwrap_or(0);
        let requested = *used - replaced + (key.len() + value.len()) as u64;
        if let Some(capacity) = self.capacity {
            if requested > capacity {
                return Err(StorageError::QuotaExceeded {
                    requested,
                    available: capacity.saturating_sub(*used),
                });
            }
        }

        let temp = self.temp_path(key);
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp, self.value_path(key))
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        *used = requested;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut used = self.used.lock();

        let Some(len) = self.stored_len(key)? else {
            return Ok(());
        };

        match fs::remove_file(self.value_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *used = used.saturating_sub(len);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(key) = name.strip_suffix(VALUE_EXT) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
