//! Persistent inverted index and its maintenance queue.
//!
//! On disk an index is a directory with two JSON files:
//! - `meta.json`: format version, analyzer settings, document count
//! - `index.json`: every indexed document with its per-field postings
//!
//! Both are written atomically while holding `index.lock`.

mod inverted;
mod queue;
mod types;

pub use inverted::{InvertedIndex, Postings};
pub use queue::{IndexQueue, IndexWorker, OpKind, PendingOp, SharedIndex};
pub use types::*;

use crate::error::{Result, SearchError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current index format version. Increment when the format changes.
pub const INDEX_VERSION: u32 = 2;

pub(crate) const META_FILE: &str = "meta.json";
pub(crate) const INDEX_FILE: &str = "index.json";

/// A lock file older than this was left by a writer that died.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Ensure the index directory exists.
pub fn ensure_index_dir(index_dir: &Path) -> Result<()> {
    if !index_dir.exists() {
        fs::create_dir_all(index_dir).map_err(|e| {
            SearchError::IndexError(format!("Failed to create index directory: {}", e))
        })?;
    }
    Ok(())
}

/// Remove the index directory entirely.
pub fn clear_index(index_dir: &Path) -> Result<()> {
    if index_dir.exists() {
        fs::remove_dir_all(index_dir)
            .map_err(|e| SearchError::IndexError(format!("Failed to clear index: {}", e)))?;
    }
    Ok(())
}

/// Whether a usable index is present in `index_dir`.
pub fn index_exists(index_dir: &Path) -> bool {
    index_dir.join(META_FILE).is_file() && index_dir.join(INDEX_FILE).is_file()
}

/// Lock file path for the index.
pub fn lock_file_path(index_dir: &Path) -> PathBuf {
    index_dir.join("index.lock")
}

/// Whether the lock file at `lock_path` is old enough to be abandoned.
fn is_stale_lock(lock_path: &Path) -> bool {
    fs::metadata(lock_path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

/// Acquire the index lock, waiting up to five seconds for another writer.
/// A stale lock is removed. Returns a guard that releases the lock when
/// dropped.
pub fn acquire_lock(index_dir: &Path) -> Result<IndexLock> {
    ensure_index_dir(index_dir)?;
    let lock_path = lock_file_path(index_dir);

    let mut attempts = 0;
    const MAX_ATTEMPTS: u32 = 50;
    const WAIT_MS: u64 = 100;

    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{}", std::process::id());
                return Ok(IndexLock { path: lock_path });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale_lock(&lock_path) {
                    let owner = fs::read_to_string(&lock_path).unwrap_or_default();
                    if fs::remove_file(&lock_path).is_ok() {
                        tracing::warn!("Removed stale index lock held by process {}", owner.trim());
                        continue;
                    }
                }
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(SearchError::IndexError(
                        "Index is locked by another process".to_string(),
                    ));
                }
                std::thread::sleep(std::time::Duration::from_millis(WAIT_MS));
            }
            Err(e) => {
                return Err(SearchError::IndexError(format!(
                    "Failed to acquire index lock: {}",
                    e
                )));
            }
        }
    }
}

/// Guard that releases the index lock when dropped.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Atomic write: write to a temp file next to `path`, then rename.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| SearchError::IndexError("Invalid index file path".to_string()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let temp_path = parent.join(format!(".tmp.{}.{}", std::process::id(), file_name));

    fs::write(&temp_path, contents)
        .map_err(|e| SearchError::IndexError(format!("Failed to write temp file: {}", e)))?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        SearchError::IndexError(format!("Failed to rename temp file: {}", e))
    })?;

    Ok(())
}

/// Read a JSON file from the index directory.
pub(crate) fn load_json<T: for<'de> serde::Deserialize<'de>>(
    index_dir: &Path,
    filename: &str,
) -> Result<T> {
    let path = index_dir.join(filename);
    let content = fs::read_to_string(&path)
        .map_err(|e| SearchError::IndexError(format!("Failed to read {}: {}", filename, e)))?;
    serde_json::from_str(&content)
        .map_err(|e| SearchError::IndexError(format!("Failed to parse {}: {}", filename, e)))
}

/// Write a JSON file into the index directory atomically.
pub(crate) fn save_json<T: serde::Serialize>(index_dir: &Path, filename: &str, data: &T) -> Result<()> {
    let content = serde_json::to_string(data).map_err(|e| {
        SearchError::IndexError(format!("Failed to serialize {}: {}", filename, e))
    })?;
    atomic_write(&index_dir.join(filename), content.as_bytes())
}

/// Describe the index stored in `index_dir` without loading postings.
pub fn status(index_dir: &Path) -> IndexStatus {
    let meta = if index_exists(index_dir) {
        load_json::<IndexMeta>(index_dir, META_FILE).ok()
    } else {
        None
    };

    match meta {
        Some(meta) => IndexStatus {
            available: meta.version == INDEX_VERSION,
            documents: meta.documents,
            terms: meta.terms,
            stemming: meta.stemming,
            language: meta.language,
            last_update: meta.last_update,
            index_dir: index_dir.to_path_buf(),
        },
        None => IndexStatus {
            available: false,
            documents: 0,
            terms: 0,
            stemming: false,
            language: String::new(),
            last_update: None,
            index_dir: index_dir.to_path_buf(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.json");

        atomic_write(&file_path, b"test content").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "test content");
        // no temp files left behind
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_index_lock() {
        let temp_dir = TempDir::new().unwrap();

        {
            let _lock = acquire_lock(temp_dir.path()).unwrap();
            assert!(lock_file_path(temp_dir.path()).exists());
        }

        assert!(!lock_file_path(temp_dir.path()).exists());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = lock_file_path(temp_dir.path());
        fs::write(&lock_path, "99999\n").unwrap();
        let an_hour_ago = std::time::SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&lock_path)
            .unwrap()
            .set_modified(an_hour_ago)
            .unwrap();
        assert!(is_stale_lock(&lock_path));

        let lock = acquire_lock(temp_dir.path()).unwrap();
        let owner = fs::read_to_string(&lock_path).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_fresh_lock_is_not_stale() {
        let temp_dir = TempDir::new().unwrap();
        let _lock = acquire_lock(temp_dir.path()).unwrap();
        assert!(!is_stale_lock(&lock_file_path(temp_dir.path())));
    }

    #[test]
    fn test_clear_index() {
        let temp_dir = TempDir::new().unwrap();
        let index_dir = temp_dir.path().join("index");
        ensure_index_dir(&index_dir).unwrap();
        fs::write(index_dir.join(META_FILE), "{}").unwrap();

        clear_index(&index_dir).unwrap();
        assert!(!index_dir.exists());
        // clearing twice is fine
        clear_index(&index_dir).unwrap();
    }

    #[test]
    fn test_status_without_index() {
        let temp_dir = TempDir::new().unwrap();
        let status = status(temp_dir.path());
        assert!(!status.available);
        assert_eq!(status.documents, 0);
    }
}
