//! Optional append-only mutation log.
//!
//! Specified only as an interface hook (`SPEC_FULL.md` §4.4): when the
//! `aol` feature is enabled, every `set`/`del` is serialized here under
//! its own lock, independent of any shard's lock. It is never read back
//! on recovery — ordinary shard recovery (`shard::open`) is the only
//! source of truth for what is live.
//!
//! Lines look like `<CMD> -:- <key> -:- <value-bytes-as-decimal-list>\n`,
//! matching the on-disk format spec'd in `SPEC_FULL.md` §6.1.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::Result;

pub enum Op {
    Set,
    Del,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Set => "SET",
            Op::Del => "DEL",
        }
    }
}

pub struct CommandLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CommandLog {
    pub fn new(path: PathBuf) -> Self {
        CommandLog { path, lock: Mutex::new(()) }
    }

    pub fn append(&self, op: Op, key: &str, value: Option<&[u8]>) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let rendered = match value {
            Some(bytes) => bytes.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(" "),
            None => String::new(),
        };
        writeln!(file, "{} -:- {} -:- [{}]", op.as_str(), key, rendered)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_human_readable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new(dir.path().join("mutations_log.loki"));
        log.append(Op::Set, "a", Some(&[1, 2, 3])).unwrap();
        log.append(Op::Del, "a", None).unwrap();

        let contents = fs::read_to_string(dir.path().join("mutations_log.loki")).unwrap();
        assert_eq!(contents, "SET -:- a -:- [1 2 3]\nDEL -:- a -:- []\n");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log = CommandLog::new(dir.path().join("mutations_log.loki"));
        log.remove().unwrap();
        log.append(Op::Set, "a", Some(&[1])).unwrap();
        log.remove().unwrap();
        assert!(!dir.path().join("mutations_log.loki").exists());
    }
}
