//! Engine tuning knobs.
//!
//! `EngineConfig` collects every constant spec'd for the shard store, the
//! ring and the cache in one caller-visible place, with defaults matching
//! the reference values (ring size 1024, compaction ratio 0.30, minimum
//! 50 tombstones before compaction). [`EngineConfig::from_env`] lets a
//! host process override any of them via environment variables, using the
//! same `config` crate the rest of the stack already depends on.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable prefix consulted by [`EngineConfig::from_env`],
/// e.g. `LOKIDB_SHARD_COUNT=8`.
pub const ENV_PREFIX: &str = "LOKIDB";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory the shard files live under.
    pub root_path: std::path::PathBuf,
    /// Number of shards the engine fans keys out across.
    pub shard_count: usize,
    /// Byte bound for the read-through LRU cache. Zero disables caching.
    pub cache_max_bytes: usize,
    /// Number of slots in the consistent-hash ring.
    pub ring_size: usize,
    /// Minimum tombstoned records a shard must accumulate before
    /// compaction becomes eligible.
    pub min_deleted: usize,
    /// Fraction of a shard's physical records that must be garbage
    /// (tombstoned or superseded) before compaction fires.
    pub compaction_ratio: f64,
    /// Enables the append-only mutation log hook. Has no effect unless
    /// the `aol` Cargo feature is also compiled in.
    pub aol_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            root_path: std::path::PathBuf::from("."),
            shard_count: 4,
            cache_max_bytes: 1 << 20,
            ring_size: 1024,
            min_deleted: 50,
            compaction_ratio: 0.30,
            aol_enabled: false,
        }
    }
}

impl EngineConfig {
    pub fn new(root_path: impl Into<std::path::PathBuf>, shard_count: usize, cache_max_bytes: usize) -> Self {
        EngineConfig { root_path: root_path.into(), shard_count, cache_max_bytes, ..Default::default() }
    }

    /// Overlays environment variables prefixed with [`ENV_PREFIX`] (e.g.
    /// `LOKIDB_SHARD_COUNT`) on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let c = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("_"))
            .build()?;
        Ok(c.try_deserialize()?)
    }
}
