#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_long_first_doc_paragraph)]

//! An embeddable, on-disk key-value store.
//!
//! A [`Engine`] fans a key out across a fixed number of [`shard`] files
//! through a consistent-hash [`Ring`], with a bounded [`Lru`] read-through
//! cache in front. Each shard is an independent append-only log with an
//! in-memory offset index and online compaction; shards never coordinate
//! with one another.

#[cfg(feature = "aol")]
pub mod command_log;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod lru;
pub mod ring;
pub mod shard;

pub use config::EngineConfig;
pub use cursor::{Cursor, Whence};
pub use engine::Engine;
pub use error::{Error, Result};
pub use lru::Lru;
pub use ring::Ring;
pub use shard::ShardStore;
