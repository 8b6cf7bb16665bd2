//! A thin, non-owning seek/read window over a region of an open file.
//!
//! Per `SPEC_FULL.md` §6.3, this is specified only at its contract: a
//! [`Cursor`] borrows the file handle it was built from, so it cannot
//! outlive the read that created it and the handle it points at cannot
//! close while the cursor is alive — the borrow checker enforces what
//! the original source left as a runtime hazard.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A bounded view over `[start, start + length)` of `file`.
pub struct Cursor<'a> {
    file: &'a mut File,
    start: u64,
    length: u64,
    pos: u64,
}

impl<'a> Cursor<'a> {
    pub fn new(file: &'a mut File, start: u64, length: u64) -> Self {
        Cursor { file, start, length, pos: start }
    }

    /// Seeks within the window, returning the new absolute file position.
    /// Errors if the resulting position would fall outside
    /// `[start, start + length]`.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Start => self.start as i64,
            Whence::Current => self.pos as i64,
            Whence::End => (self.start + self.length) as i64,
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| Error::OutOfBound("seek out of bound".into()))?;

        if target < self.start as i64 || target > (self.start + self.length) as i64 {
            return Err(Error::OutOfBound("seek out of bound".into()));
        }

        let pos = self.file.seek(SeekFrom::Start(target as u64))?;
        self.pos = pos;
        Ok(pos)
    }

    /// Reads the next `n` bytes. Errors if that would read past the end
    /// of the window.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.pos + n as u64 > self.start + self.length {
            return Err(Error::OutOfBound("read out of bound".into()));
        }
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf)?;
        self.pos += n as u64;
        Ok(buf)
    }
}
