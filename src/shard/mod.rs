//! One independent on-disk key-value shard: an append-only log file, its
//! in-memory offset index, and online compaction.
//!
//! Shards never coordinate with one another — everything here is local
//! to a single file. A shard is thread-safe: one mutex guards both the
//! in-memory index and the exclusive right to touch the file, and is
//! held across every public operation that touches either. Compaction
//! runs on a single long-lived background worker per shard (see
//! `SPEC_FULL.md` §4.1 / §9); a one-slot channel stands in for the
//! pending flag, so at most one compaction can ever be queued.

pub mod compaction;
pub mod record;
pub mod validation;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Sender};
use fs4::FileExt;

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use validation::{validate_key, validate_value};

struct ShardInner {
    index: HashMap<String, u64>,
    deleted_count: usize,
    /// Holds an exclusive advisory lock on the shard's file for as long as
    /// this shard is open, enforcing the single-writer-per-file contract
    /// across OS processes (`SPEC_FULL.md` §5). Never read from directly;
    /// replaced after every compaction, since compaction installs a new
    /// inode at the same path and the lock does not follow a rename.
    _lock_guard: File,
}

enum WorkerMsg {
    Compact,
    Shutdown,
}

pub struct ShardStore {
    path: PathBuf,
    inner: Arc<Mutex<ShardInner>>,
    worker_tx: Sender<WorkerMsg>,
    worker: Option<JoinHandle<()>>,
    min_deleted: usize,
    compaction_ratio: f64,
}

/// Applies the `0o600` creation mode mandated by `SPEC_FULL.md` §6.1 on
/// platforms that support POSIX modes; a no-op elsewhere. Shared by every
/// path that creates a shard file: ordinary opens, `flush`'s recreate, and
/// compaction's `.clean` file.
fn apply_unix_mode(options: &mut OpenOptions) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
}

fn open_rw(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    apply_unix_mode(&mut options);
    options.open(path)
}

/// Opens `path` (creating it if needed) and takes out an exclusive
/// advisory lock on it, matching the teacher's `storage/bitcask.rs` use of
/// `fs4::FileExt` to enforce a single writer per log file. Returns the
/// locked handle; dropping it releases the lock.
fn acquire_exclusive_lock(path: &Path) -> std::io::Result<File> {
    let file = open_rw(path)?;
    file.try_lock_exclusive()?;
    Ok(file)
}

fn build_index(file: &mut File) -> std::io::Result<(HashMap<String, u64>, usize)> {
    let mut index = HashMap::new();
    let mut deleted_count = 0;
    for entry in record::Scanner::new(file, false)? {
        let entry = entry?;
        if entry.tombstone {
            index.remove(&entry.key);
            deleted_count += 1;
        } else {
            index.insert(entry.key, entry.offset);
        }
    }
    Ok((index, deleted_count))
}

fn run_compaction(path: &Path, inner: &Mutex<ShardInner>) -> std::io::Result<()> {
    let mut guard = inner.lock().unwrap();
    log::info!("compacting {}", path.display());
    let new_index = compaction::compact(path)?;
    let live = new_index.len();
    guard.index = new_index;
    guard.deleted_count = 0;
    // Compaction renamed a new inode over `path`; the old lock guard now
    // holds a lock on the unlinked original, so it must be replaced.
    guard._lock_guard = acquire_exclusive_lock(path)?;
    log::info!("compacted {}: {} live keys remain", path.display(), live);
    Ok(())
}

impl ShardStore {
    /// Opens or creates the shard file at `path` with the default
    /// compaction thresholds (`validation::MIN_DELETED`,
    /// `validation::COMPACTION_RATIO`). See [`ShardStore::open_with_thresholds`]
    /// for a caller-tunable variant.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_thresholds(path, validation::MIN_DELETED, validation::COMPACTION_RATIO)
    }

    /// Like [`ShardStore::open`], but with caller-supplied compaction
    /// thresholds (wired from [`crate::EngineConfig`] by the engine
    /// facade). Deletes any stale `.clean` sibling left by a crash
    /// mid-compaction, then scans the file to rebuild the index. Scan
    /// I/O errors are fatal.
    pub fn open_with_thresholds(path: impl Into<PathBuf>, min_deleted: usize, compaction_ratio: f64) -> Result<Self> {
        let path = path.into();
        compaction::remove_stale_clean_file(&path)?;

        let mut lock_guard = acquire_exclusive_lock(&path)?;
        let (index, deleted_count) = build_index(&mut lock_guard)
            .unwrap_or_else(|err| panic!("fatal I/O error scanning shard {}: {err}", path.display()));
        log::info!("indexed {} live keys in {}", index.len(), path.display());

        let inner = Arc::new(Mutex::new(ShardInner { index, deleted_count, _lock_guard: lock_guard }));
        let (worker_tx, worker_rx) = bounded::<WorkerMsg>(1);

        let worker_path = path.clone();
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::spawn(move || {
            for msg in worker_rx {
                match msg {
                    WorkerMsg::Compact => {
                        if let Err(err) = run_compaction(&worker_path, &worker_inner) {
                            log::error!("compaction of {} failed: {err}", worker_path.display());
                        }
                    }
                    WorkerMsg::Shutdown => break,
                }
            }
        });

        Ok(ShardStore { path, inner, worker_tx, worker: Some(worker), min_deleted, compaction_ratio })
    }

    fn maybe_trigger_compaction(&self, inner: &MutexGuard<'_, ShardInner>) {
        if compaction::should_compact(inner.index.len(), inner.deleted_count, self.min_deleted, self.compaction_ratio) {
            // A `Full` error means a compaction is already pending; that's fine, only
            // one may ever be in flight per shard.
            let _ = self.worker_tx.try_send(WorkerMsg::Compact);
        }
    }

    /// Returns the current value for `key`, or `None` if it isn't present.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let offset = {
            let inner = self.inner.lock().unwrap();
            match inner.index.get(key) {
                Some(&offset) => offset,
                None => return Ok(None),
            }
        };
        let mut file = open_rw(&self.path)?;
        Ok(record::read_value_at_offset(&mut file, offset)?)
    }

    /// Like [`ShardStore::get`], but hands the caller a [`Cursor`] over
    /// the value's byte range instead of reading it eagerly. Resolves
    /// `SPEC_FULL.md` §9 open question 5.
    pub fn get_with<R>(&self, key: &str, reader: impl FnOnce(&mut Cursor) -> std::io::Result<R>) -> Result<Option<R>> {
        validate_key(key)?;
        let offset = {
            let inner = self.inner.lock().unwrap();
            match inner.index.get(key) {
                Some(&offset) => offset,
                None => return Ok(None),
            }
        };
        let mut file = open_rw(&self.path)?;
        match record::value_region(&mut file, offset)? {
            Some((start, len)) => {
                let mut cursor = Cursor::new(&mut file, start, len);
                Ok(Some(reader(&mut cursor)?))
            }
            None => Ok(None),
        }
    }

    /// Appends a new record for `key`, unless it already maps to an
    /// identical value (silent no-op). Otherwise the old record is
    /// tombstoned in place first. May trigger background compaction.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;

        let mut inner = self.inner.lock().unwrap();
        let mut file = open_rw(&self.path)?;

        if let Some(&offset) = inner.index.get(key) {
            let current = record::read_value_at_offset(&mut file, offset)?;
            if current.as_deref() == Some(value) {
                return Ok(());
            }
            record::mark_tombstone(&mut file, offset)?;
            inner.index.remove(key);
            inner.deleted_count += 1;
        }

        let new_offset = record::append_record(&mut file, key.as_bytes(), value)?;
        inner.index.insert(key.to_string(), new_offset);

        self.maybe_trigger_compaction(&inner);
        Ok(())
    }

    /// Removes `key`. Errors if it isn't present.
    pub fn del(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let mut inner = self.inner.lock().unwrap();
        let offset = inner.index.remove(key).ok_or(Error::NotFound)?;

        let mut file = open_rw(&self.path)?;
        record::mark_tombstone(&mut file, offset)?;
        inner.deleted_count += 1;

        self.maybe_trigger_compaction(&inner);
        Ok(())
    }

    /// Snapshot of every live key. Order is unspecified.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.index.keys().cloned().collect()
    }

    /// Drops all in-memory state and truncates the shard file to empty.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.index.clear();
        inner.deleted_count = 0;
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        apply_unix_mode(&mut options);
        options.open(&self.path)?;
        Ok(())
    }

    /// Scans every live record and returns the values for which
    /// `predicate` is true, in ascending file-offset order.
    pub fn search(&self, predicate: impl Fn(&[u8]) -> bool) -> Result<Vec<Vec<u8>>> {
        let _inner = self.inner.lock().unwrap();
        let mut file = open_rw(&self.path)?;
        let mut results = Vec::new();
        for entry in record::Scanner::new(&mut file, true)? {
            let entry = entry?;
            if entry.tombstone {
                continue;
            }
            if let Some(value) = entry.value {
                if predicate(&value) {
                    results.push(value);
                }
            }
        }
        Ok(results)
    }
}

impl Drop for ShardStore {
    fn drop(&mut self) {
        let _ = self.worker_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, ShardStore) {
        let dir = tempfile::tempdir().unwrap();
        let shard = ShardStore::open(dir.path().join("ldb-0.loki")).unwrap();
        (dir, shard)
    }

    /// Scenario 1.
    #[test]
    fn basic_set_get_del() {
        let (_dir, shard) = open_tmp();
        shard.set("a", &[97]).unwrap();
        assert_eq!(shard.get("a").unwrap(), Some(vec![97]));
        shard.del("a").unwrap();
        assert_eq!(shard.get("a").unwrap(), None);
    }

    #[test]
    fn del_missing_key_errors() {
        let (_dir, shard) = open_tmp();
        assert!(matches!(shard.del("nope"), Err(Error::NotFound)));
    }

    /// Scenario 2: overwrite is a fresh tombstone + append, one live
    /// record survives.
    #[test]
    fn overwrite_keeps_latest_value() {
        let (_dir, shard) = open_tmp();
        shard.set("abc", b"b0123456789").unwrap();
        assert_eq!(shard.get("abc").unwrap(), Some(b"b0123456789".to_vec()));
        shard.set("abc", b"0123456789").unwrap();
        assert_eq!(shard.get("abc").unwrap(), Some(b"0123456789".to_vec()));
    }

    #[test]
    fn set_with_identical_value_is_a_no_op() {
        let (dir, shard) = open_tmp();
        shard.set("abc", b"same").unwrap();
        let size_before = std::fs::metadata(dir.path().join("ldb-0.loki")).unwrap().len();
        shard.set("abc", b"same").unwrap();
        let size_after = std::fs::metadata(dir.path().join("ldb-0.loki")).unwrap().len();
        assert_eq!(size_before, size_after);
    }

    #[test]
    fn validation_errors() {
        let (_dir, shard) = open_tmp();
        assert!(matches!(shard.set("", b"v"), Err(Error::InvalidKey(_))));
        assert!(matches!(shard.set("k", b""), Err(Error::InvalidValue(_))));
        assert!(matches!(shard.get(&"k".repeat(256)), Err(Error::InvalidKey(_))));
    }

    /// Scenario 4 (shard-level slice of it): values survive a reopen.
    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ldb-0.loki");
        {
            let shard = ShardStore::open(&path).unwrap();
            shard.set("abc", b"abc").unwrap();
            shard.set("abc4", b"abc4").unwrap();
            shard.del("abc4").unwrap();
        }
        let shard = ShardStore::open(&path).unwrap();
        assert_eq!(shard.get("abc").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(shard.get("abc4").unwrap(), None);
    }

    /// Scenario 3: heavy delete traffic drives the file back under the
    /// tombstone floor once compaction settles.
    #[test]
    fn compaction_reclaims_deleted_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ldb-0.loki");
        let shard = ShardStore::open(&path).unwrap();

        for i in 0..1000 {
            shard.set(&i.to_string(), &[45, 84]).unwrap();
        }
        for i in 0..1000 {
            shard.del(&i.to_string()).unwrap();
        }

        // Compaction happens on a background worker; give it a moment,
        // then force a final pass by dropping (which joins the worker
        // but does not itself compact) and checking repeatedly.
        let mut settled = false;
        for _ in 0..200 {
            if shard.keys().is_empty() {
                let size = std::fs::metadata(&path).unwrap().len();
                if size <= 500 * 7 {
                    settled = true;
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(settled, "expected compaction to shrink the file under the tombstone floor");
    }

    /// Scenario 6: concurrent set/get/del on one shard never panics and
    /// always completes.
    #[test]
    fn concurrent_access_does_not_panic() {
        let (_dir, shard) = open_tmp();
        shard.set("a", b"b").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..100 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let _ = shard.set("a", b"b");
                    }
                });
            }
            for _ in 0..100 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let _ = shard.get("a");
                    }
                });
            }
            for _ in 0..100 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let _ = shard.del("a");
                    }
                });
            }
        });
    }

    #[test]
    fn search_returns_live_values_in_offset_order() {
        let (_dir, shard) = open_tmp();
        for i in 0..5u8 {
            shard.set(&i.to_string(), &[i]).unwrap();
        }
        shard.del("2").unwrap();
        let found = shard.search(|v| v[0] >= 3).unwrap();
        assert_eq!(found, vec![vec![3], vec![4]]);
    }

    #[test]
    fn get_with_cursor_reads_full_value() {
        let (_dir, shard) = open_tmp();
        shard.set("k", b"hello world").unwrap();
        let result = shard
            .get_with("k", |cursor| {
                cursor.seek(6, crate::cursor::Whence::Start).map_err(std::io::Error::other)?;
                cursor.read(5).map_err(std::io::Error::other)
            })
            .unwrap()
            .unwrap();
        assert_eq!(result, b"world");
    }

    #[test]
    fn flush_clears_state_and_truncates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ldb-0.loki");
        let shard = ShardStore::open(&path).unwrap();
        shard.set("a", b"1").unwrap();
        shard.flush().unwrap();
        assert_eq!(shard.get("a").unwrap(), None);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
