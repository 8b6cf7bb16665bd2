//! On-disk record encoding and the sequential file scanner.
//!
//! Record layout (`SPEC_FULL.md` §3.1 / §6.2):
//!
//! ```text
//!  +0  1   key length K          (1..=255)
//!  +1  3   value length V, little-endian 24-bit
//!  +4  1   tombstone flag        (0 live, 1 deleted)
//!  +5  K   key bytes
//!  +5+K V  value bytes
//! ```
//!
//! The tombstone byte is the only byte ever rewritten in place.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use super::validation::HEADER_LEN;

/// Reads into `buf` until full or EOF, returning the number of bytes
/// actually read. Unlike `read_exact`, a short read is not an error here:
/// a short header read is exactly how a torn tail write is recognized.
fn read_fully_or_eof(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// `None` means clean EOF (including a torn header at the tail, which is
/// treated as EOF per the recovery rule in `SPEC_FULL.md` §9).
fn read_header(file: &mut File) -> std::io::Result<Option<(usize, u32, bool)>> {
    let mut buf = [0u8; HEADER_LEN];
    let n = read_fully_or_eof(file, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if n < HEADER_LEN {
        log::warn!("found a short record header ({n} of {HEADER_LEN} bytes) at the tail of the file, treating as EOF");
        return Ok(None);
    }
    let key_len = buf[0] as usize;
    let value_len = u32::from(buf[1]) | (u32::from(buf[2]) << 8) | (u32::from(buf[3]) << 16);
    let tombstone = buf[4] == 1;
    Ok(Some((key_len, value_len, tombstone)))
}

/// Appends a live record to the end of `file` in a single write, returning
/// the record's offset.
pub fn append_record(file: &mut File, key: &[u8], value: &[u8]) -> std::io::Result<u64> {
    let offset = file.seek(SeekFrom::End(0))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + key.len() + value.len());
    buf.push(key.len() as u8);
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes()[..3]);
    buf.push(0);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    file.write_all(&buf)?;
    Ok(offset)
}

/// Flips the tombstone byte of the record at `offset`. No other byte of
/// the record is touched.
pub fn mark_tombstone(file: &mut File, offset: u64) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset + 4))?;
    file.write_all(&[1u8])?;
    Ok(())
}

/// Reads the full value of the record at `offset`, or `None` if `offset`
/// no longer points at a parseable record (a torn tail, effectively).
pub fn read_value_at_offset(file: &mut File, offset: u64) -> std::io::Result<Option<Vec<u8>>> {
    file.seek(SeekFrom::Start(offset))?;
    let Some((key_len, value_len, _tombstone)) = read_header(file)? else {
        return Ok(None);
    };
    file.seek(SeekFrom::Current(key_len as i64))?;
    let mut value = vec![0u8; value_len as usize];
    file.read_exact(&mut value)?;
    Ok(Some(value))
}

/// Returns the `[start, start+length)` byte range of the value stored at
/// `offset`, for callers that want a [`crate::cursor::Cursor`] over it
/// instead of the whole value eagerly read.
pub fn value_region(file: &mut File, offset: u64) -> std::io::Result<Option<(u64, u64)>> {
    file.seek(SeekFrom::Start(offset))?;
    let Some((key_len, value_len, _tombstone)) = read_header(file)? else {
        return Ok(None);
    };
    let value_start = offset + HEADER_LEN as u64 + key_len as u64;
    Ok(Some((value_start, value_len as u64)))
}

pub struct ScanEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub tombstone: bool,
    pub offset: u64,
}

/// Sequential, pull-based scan of every record in a file, front to back.
/// `read_values = false` skips over value bytes without reading them
/// (used to build the index at open, where only offsets are needed).
pub struct Scanner<'a> {
    file: &'a mut File,
    pos: u64,
    read_values: bool,
    done: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(file: &'a mut File, read_values: bool) -> std::io::Result<Self> {
        let pos = file.seek(SeekFrom::Start(0))?;
        Ok(Scanner { file, pos, read_values, done: false })
    }
}

impl Iterator for Scanner<'_> {
    type Item = std::io::Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.pos;

        let header = match read_header(self.file) {
            Ok(Some(header)) => header,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        let (key_len, value_len, tombstone) = header;

        let mut key_buf = vec![0u8; key_len];
        if let Err(err) = self.file.read_exact(&mut key_buf) {
            self.done = true;
            return Some(Err(err));
        }
        let key = String::from_utf8_lossy(&key_buf).into_owned();

        let value = if self.read_values {
            let mut value_buf = vec![0u8; value_len as usize];
            if let Err(err) = self.file.read_exact(&mut value_buf) {
                self.done = true;
                return Some(Err(err));
            }
            Some(value_buf)
        } else {
            if let Err(err) = self.file.seek(SeekFrom::Current(value_len as i64)) {
                self.done = true;
                return Some(Err(err));
            }
            None
        };

        self.pos = offset + HEADER_LEN as u64 + key_len as u64 + value_len as u64;
        Some(Ok(ScanEntry { key, value, tombstone, offset }))
    }
}
