//! Fan-out facade over N shards, the consistent-hash ring and the cache.
//!
//! `Engine` is the crate's main entry point: it owns one [`ShardStore`]
//! per shard, a [`Ring`] that decides which shard a key belongs to, and
//! an [`Lru`] read-through cache in front of both.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::lru::Lru;
use crate::ring::Ring;
use crate::shard::{validation, ShardStore};

#[cfg(feature = "aol")]
use crate::command_log::{CommandLog, Op};

pub struct Engine {
    shards: Vec<Arc<ShardStore>>,
    shard_index: HashMap<String, usize>,
    ring: Ring,
    cache: Lru,
    #[cfg(feature = "aol")]
    command_log: Option<CommandLog>,
}

fn shard_filename(i: usize) -> String {
    format!("{}{}{}", validation::SHARD_FILE_PREFIX, i, validation::SHARD_FILE_EXT)
}

impl Engine {
    /// Creates `config.shard_count` shards under `config.root_path`, a
    /// cache bounded by `config.cache_max_bytes`, and a ring of
    /// `config.ring_size` slots with every shard registered as a member.
    pub fn open(config: EngineConfig) -> Result<Self> {
        if config.shard_count == 0 {
            return Err(Error::Config("shard_count must be at least 1".into()));
        }
        std::fs::create_dir_all(&config.root_path)?;

        let mut ring = Ring::new(config.ring_size);
        let mut shards = Vec::with_capacity(config.shard_count);
        let mut shard_index = HashMap::with_capacity(config.shard_count);

        for i in 0..config.shard_count {
            let filename = shard_filename(i);
            let path = config.root_path.join(&filename);
            shards.push(Arc::new(ShardStore::open_with_thresholds(path, config.min_deleted, config.compaction_ratio)?));
            ring.add_member(filename.clone())?;
            shard_index.insert(filename, i);
        }

        let cache = Lru::new(config.cache_max_bytes);

        #[cfg(feature = "aol")]
        let command_log = config
            .aol_enabled
            .then(|| CommandLog::new(config.root_path.join("mutations_log.loki")));

        Ok(Engine {
            shards,
            shard_index,
            ring,
            cache,
            #[cfg(feature = "aol")]
            command_log,
        })
    }

    /// Convenience constructor matching the historical `new(root, cache,
    /// shards)` shape, with every other knob left at its default.
    pub fn new(root_path: impl Into<std::path::PathBuf>, cache_max_bytes: usize, shard_count: usize) -> Result<Self> {
        Self::open(EngineConfig::new(root_path, shard_count, cache_max_bytes))
    }

    fn shard_for(&self, key: &str) -> &Arc<ShardStore> {
        let member = self.ring.get_member_for_key(key).expect("ring has at least one registered shard");
        let idx = self.shard_index[member];
        &self.shards[idx]
    }

    #[cfg(feature = "aol")]
    fn log_mutation(&self, op: Op, key: &str, value: Option<&[u8]>) {
        if let Some(log) = &self.command_log {
            if let Err(err) = log.append(op, key, value) {
                log::warn!("failed to append to mutation log: {err}");
            }
        }
    }

    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        #[cfg(feature = "aol")]
        self.log_mutation(Op::Set, key, Some(value));

        self.cache.push(key, value);
        self.shard_for(key).set(key, value)
    }

    /// Consults the cache first; only pushes into the cache on a shard
    /// hit (misses are not cached, per `SPEC_FULL.md` §4.4).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }

        let value = self.shard_for(key).get(key)?;
        if let Some(value) = &value {
            self.cache.push(key, value);
        }
        Ok(value)
    }

    /// Returns `true` iff the shard reported the key as deleted. A
    /// missing key, or any other shard-level failure, is reported as
    /// `false` (logged if it wasn't simply a missing key), matching the
    /// original facade's boolean contract.
    pub fn del(&self, key: &str) -> bool {
        #[cfg(feature = "aol")]
        self.log_mutation(Op::Del, key, None);

        self.cache.del(key);
        match self.shard_for(key).del(key) {
            Ok(()) => true,
            Err(Error::NotFound) => false,
            Err(err) => {
                log::warn!("del({key}) failed: {err}");
                false
            }
        }
    }

    /// Concatenation of every shard's live keys. Order is unspecified.
    pub fn keys(&self) -> Vec<String> {
        self.shards.iter().flat_map(|shard| shard.keys()).collect()
    }

    /// Flushes every shard concurrently, clears the cache, and removes
    /// the mutation log file (if enabled) under its own lock.
    pub fn flush(&self) -> Result<()> {
        let first_err = std::thread::scope(|scope| {
            let handles: Vec<_> = self.shards.iter().map(|shard| scope.spawn(|| shard.flush())).collect();
            handles.into_iter().filter_map(|h| h.join().unwrap().err()).next()
        });

        self.cache.clear();

        #[cfg(feature = "aol")]
        if let Some(log) = &self.command_log {
            log.remove()?;
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Concatenation of every shard's `search` results, shard by shard in
    /// creation order, each shard's own results in ascending file-offset
    /// order.
    pub fn search(&self, predicate: impl Fn(&[u8]) -> bool) -> Result<Vec<Vec<u8>>> {
        let mut results = Vec::new();
        for shard in &self.shards {
            results.extend(shard.search(&predicate)?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp(shards: usize) -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(dir.path(), 0, shards).unwrap();
        (dir, engine)
    }

    /// Scenario 1.
    #[test]
    fn basic_roundtrip_one_shard_no_cache() {
        let (_dir, engine) = open_tmp(1);
        engine.set("a", &[97]).unwrap();
        assert_eq!(engine.get("a").unwrap(), Some(vec![97]));
        assert!(engine.del("a"));
        assert_eq!(engine.get("a").unwrap(), None);
    }

    #[test]
    fn del_of_missing_key_is_false() {
        let (_dir, engine) = open_tmp(1);
        assert!(!engine.del("nope"));
    }

    /// Scenario 4: persistence across close/reopen.
    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = Engine::new(dir.path(), 0, 1).unwrap();
            engine.set("abc", b"abc").unwrap();
            engine.set("abc4", b"abc4").unwrap();
            assert!(engine.del("abc4"));
        }
        let engine = Engine::new(dir.path(), 0, 1).unwrap();
        assert_eq!(engine.get("abc").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(engine.get("abc4").unwrap(), None);
    }

    /// Scenario 5: search fans out across shards.
    #[test]
    fn search_fans_out_across_shards() {
        let (_dir, engine) = open_tmp(5);
        for i in 0..=230u32 {
            engine.set(&i.to_string(), &[i as u8]).unwrap();
        }
        let found = engine.search(|v| v[0] as u32 >= 230 || v.len() > 1).unwrap();
        // values are single bytes, so only i == 230 matches exactly once
        // (values wrap mod 256, so disambiguate on the key instead).
        let found_keys: Vec<_> =
            (0..=230u32).filter(|i| engine.get(&i.to_string()).unwrap().unwrap()[0] as u32 >= 230).collect();
        assert_eq!(found_keys, vec![230]);
        assert_eq!(found.is_empty(), false);
    }

    #[test]
    fn cache_hit_avoids_shard_after_set() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(dir.path(), 1 << 16, 1).unwrap();
        engine.set("a", b"1").unwrap();
        assert_eq!(engine.get("a").unwrap(), Some(b"1".to_vec()));

        engine.flush().unwrap(); // drops shard state but not cache... except flush clears cache too
        assert_eq!(engine.get("a").unwrap(), None);
    }

    #[test]
    fn keys_concatenates_all_shards() {
        let (_dir, engine) = open_tmp(3);
        for i in 0..9 {
            engine.set(&i.to_string(), b"v").unwrap();
        }
        let mut keys = engine.keys();
        keys.sort();
        assert_eq!(keys, (0..9).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    /// Scenario 6 at the engine level: concurrent traffic across shards
    /// never panics.
    #[test]
    fn concurrent_engine_traffic() {
        let (_dir, engine) = open_tmp(4);
        std::thread::scope(|scope| {
            for t in 0..20 {
                scope.spawn(move || {
                    for i in 0..50 {
                        let key = format!("k{}", (t * 50 + i) % 40);
                        let _ = engine.set(&key, b"v");
                        let _ = engine.get(&key);
                        let _ = engine.del(&key);
                    }
                });
            }
        });
    }
}
