//! Crate-local error type.
//!
//! Validation errors are returned to the caller with no state change.
//! I/O errors during ordinary get/set/del are returned too, leaving
//! on-disk and in-memory state consistent. I/O errors during compaction
//! or the open-time recovery scan are not recoverable in-process and are
//! raised as panics instead (see `shard::compaction` and `shard::open`).

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Key failed validation (empty, or longer than `shard::validation::MAX_KEY_LEN`).
    InvalidKey(String),
    /// Value failed validation (empty, or longer than `shard::validation::MAX_VALUE_LEN`).
    InvalidValue(String),
    /// `del` of a key that isn't present.
    NotFound,
    /// Ring member name is empty or starts with the primary-marker sentinel.
    InvalidMember(String),
    /// Ring is already at its configured member capacity.
    RingFull,
    /// Ring member name is already registered.
    DuplicateMember(String),
    /// Cursor `seek`/`read` moved outside of `[start, start + length)`.
    OutOfBound(String),
    /// Unsupported `Seek` whence value.
    InvalidSeek(String),
    /// Propagated I/O failure.
    Io(io::Error),
    /// Configuration could not be loaded from the environment.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey(msg) => write!(f, "{msg}"),
            Error::InvalidValue(msg) => write!(f, "{msg}"),
            Error::NotFound => write!(f, "key does not exist"),
            Error::InvalidMember(msg) => write!(f, "{msg}"),
            Error::RingFull => write!(f, "cannot add more members than ring size"),
            Error::DuplicateMember(name) => write!(f, "member {name} already exists"),
            Error::OutOfBound(msg) => write!(f, "{msg}"),
            Error::InvalidSeek(msg) => write!(f, "{msg}"),
            Error::Io(err) => write!(f, "{err}"),
            Error::Config(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
