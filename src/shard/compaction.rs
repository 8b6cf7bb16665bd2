//! The compaction algorithm itself: the trigger predicate and the
//! rewrite-in-place procedure. Orchestration (the background worker, the
//! shard lock) lives in `shard::mod`; this module only knows about files
//! and offsets.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use super::record::{self, Scanner};

pub fn clean_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(super::validation::CLEAN_FILE_EXT);
    PathBuf::from(name)
}

/// Evaluated immediately after every tombstone write (`SPEC_FULL.md`
/// §4.1): tombstones must exceed the absolute floor and make up more
/// than `ratio` of all physical records. `min_deleted` and `ratio` are
/// caller-supplied so they can be tuned per [`crate::EngineConfig`]
/// instead of being baked into the binary.
pub fn should_compact(live_count: usize, deleted_count: usize, min_deleted: usize, ratio: f64) -> bool {
    if deleted_count <= min_deleted {
        return false;
    }
    let total = (live_count + deleted_count) as f64;
    total * ratio <= deleted_count as f64
}

/// Deletes a stale `<path>.clean` left behind by a crash mid-compaction.
/// Called once, before a shard's primary file is opened.
pub fn remove_stale_clean_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(clean_path_for(path)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Rewrites `path` to contain only its live records, returning the
/// rebuilt `key -> offset` index. Creating the `.clean` file is the only
/// recoverable failure point; everything after that is fatal, per
/// `SPEC_FULL.md` §7 ("I/O errors during compaction are fatal").
pub fn compact(path: &Path) -> std::io::Result<HashMap<String, u64>> {
    let clean_path = clean_path_for(path);
    let mut clean_options = OpenOptions::new();
    clean_options.read(true).write(true).create(true).truncate(true);
    super::apply_unix_mode(&mut clean_options);
    let mut clean_file = clean_options.open(&clean_path)?;

    let mut source = OpenOptions::new().read(true).write(true).open(path)?;
    let mut new_index = HashMap::new();

    for entry in Scanner::new(&mut source, true)? {
        let entry = entry.expect("fatal I/O error scanning shard file during compaction");
        if entry.tombstone {
            continue;
        }
        let value = entry.value.expect("scanner was asked to read values");
        let new_offset = record::append_record(&mut clean_file, entry.key.as_bytes(), &value)
            .expect("fatal I/O error writing compacted shard file");
        new_index.insert(entry.key, new_offset);
    }

    drop(clean_file);
    drop(source);

    std::fs::remove_file(path).expect("fatal I/O error removing original shard file after compaction");
    std::fs::rename(&clean_path, path).expect("fatal I/O error installing compacted shard file");

    Ok(new_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(100, 100 => true; "ratio 1 all garbage")]
    #[test_case(0, 100 => false; "no garbage never compacts")]
    #[test_case(49, 100 => false; "below min deleted floor")]
    #[test_case(51, 119 => true; "at ratio, above floor")]
    #[test_case(51, 500 => false; "above floor but below ratio")]
    fn should_compact_table(deleted: usize, total: usize) -> bool {
        let live = total - deleted;
        should_compact(live, deleted, super::super::validation::MIN_DELETED, super::super::validation::COMPACTION_RATIO)
    }

    #[test]
    fn compact_drops_tombstones_and_preserves_live_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ldb-0.loki");
        let mut file = OpenOptions::new().create(true).write(true).read(true).open(&path).unwrap();

        let o_a = record::append_record(&mut file, b"a", b"1").unwrap();
        record::append_record(&mut file, b"b", b"2").unwrap();
        record::mark_tombstone(&mut file, o_a).unwrap();
        drop(file);

        let new_index = compact(&path).unwrap();
        assert_eq!(new_index.len(), 1);
        assert!(new_index.contains_key("b"));
        assert!(!clean_path_for(&path).exists());

        let mut reopened = OpenOptions::new().read(true).open(&path).unwrap();
        let value = record::read_value_at_offset(&mut reopened, new_index["b"]).unwrap().unwrap();
        assert_eq!(value, b"2");
    }

    #[test]
    fn stale_clean_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ldb-0.loki");
        std::fs::write(clean_path_for(&path), b"garbage").unwrap();
        remove_stale_clean_file(&path).unwrap();
        assert!(!clean_path_for(&path).exists());
    }
}
