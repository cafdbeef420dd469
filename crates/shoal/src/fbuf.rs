//! Growable, bounded flat byte buffer.
//!
//! Content is always contiguous and is added completely or not at all: a
//! refused extension leaves the buffer untouched. Storage grows from a
//! 128-byte floor by doubling up to 256 KiB, then by 64 KiB steps, subject
//! to a per-buffer preferred maximum and a per-buffer hard maximum (both
//! optional).

use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Storage floor.
pub const FBUF_MIN_LEN: usize = 128;
/// Double the allocation up to here...
const FAST_GROW_LIMIT: usize = 1 << 18;
/// ...then add this much at a time.
const SLOW_GROW_STEP: usize = 1 << 16;

/// No length bound.
pub const FBUF_MAXLEN_NONE: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FbufError {
    /// Adding the content would exceed the preferred or hard maximum.
    #[error("buffer length limit reached")]
    LimitReached,
}

#[derive(Debug, Default)]
pub struct FlatBuffer {
    data: Vec<u8>,
    /// Preferred maximum: once the allocation passes this, no further
    /// extension is attempted. 0 disables the check.
    prefmaxlen: usize,
    /// Hard maximum for the allocation. 0 disables the check. This was a
    /// process-wide global in older designs; here it is per instance.
    maxlen: usize,
}

impl FlatBuffer {
    pub fn new(prefmaxlen: usize) -> Self {
        Self {
            data: Vec::new(),
            prefmaxlen,
            maxlen: FBUF_MAXLEN_NONE,
        }
    }

    /// Bytes currently stored.
    #[inline]
    pub fn used(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently allocated.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The stored bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_max_len(&mut self, maxlen: usize) {
        self.maxlen = maxlen;
    }

    pub fn max_len(&self) -> usize {
        self.maxlen
    }

    pub fn set_pref_max_len(&mut self, prefmaxlen: usize) -> usize {
        let old = self.prefmaxlen;
        self.prefmaxlen = prefmaxlen;
        old
    }

    pub fn pref_max_len(&self) -> usize {
        self.prefmaxlen
    }

    /// Make room for `additional` more bytes, growing per the policy.
    /// The buffer is left untouched when the limits refuse the growth.
    pub fn extend(&mut self, additional: usize) -> Result<usize, FbufError> {
        let needed = self.used() + additional;
        if needed <= self.data.capacity() {
            return Ok(self.data.capacity());
        }

        if self.prefmaxlen != FBUF_MAXLEN_NONE && self.data.capacity() >= self.prefmaxlen {
            return Err(FbufError::LimitReached);
        }

        let mut new_len = self.data.capacity().max(FBUF_MIN_LEN);
        while new_len < needed {
            new_len = if new_len < FAST_GROW_LIMIT {
                new_len * 2
            } else {
                new_len + SLOW_GROW_STEP
            };
        }

        if self.maxlen != FBUF_MAXLEN_NONE && new_len > self.maxlen {
            if needed > self.maxlen {
                return Err(FbufError::LimitReached);
            }
            new_len = self.maxlen;
        }

        self.data.reserve_exact(new_len - self.used());
        Ok(self.data.capacity())
    }

    /// Give back unused storage.
    pub fn shrink(&mut self) {
        self.data.shrink_to_fit();
    }

    /// Forget the content; storage is kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Append bytes; all or nothing. Returns how many were added.
    pub fn add(&mut self, bytes: &[u8]) -> Result<usize, FbufError> {
        self.extend(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Append bytes followed by a newline.
    pub fn add_line(&mut self, bytes: &[u8]) -> Result<usize, FbufError> {
        self.extend(bytes.len() + 1)?;
        self.data.extend_from_slice(bytes);
        self.data.push(b'\n');
        Ok(bytes.len() + 1)
    }

    /// Append raw binary content. Alias of [`add`](Self::add), kept for
    /// symmetry with text-oriented call sites.
    pub fn add_binary(&mut self, bytes: &[u8]) -> Result<usize, FbufError> {
        self.add(bytes)
    }

    /// Append formatted text: `buf.add_fmt(format_args!("{n} items"))`.
    pub fn add_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<usize, FbufError> {
        let before = self.used();
        let mut sink = FmtSink {
            buf: self,
            failed: false,
        };
        let _ = fmt::write(&mut sink, args);
        if sink.failed {
            // All-or-nothing: roll back the partial write.
            self.data.truncate(before);
            return Err(FbufError::LimitReached);
        }
        Ok(self.used() - before)
    }

    /// Replace the content.
    pub fn set(&mut self, bytes: &[u8]) -> Result<usize, FbufError> {
        self.clear();
        self.add(bytes)
    }

    /// Append the other buffer's content.
    pub fn concat(&mut self, other: &FlatBuffer) -> Result<usize, FbufError> {
        self.add(other.data())
    }

    /// Overwrite `dst` with this buffer's content.
    pub fn copy_to(&self, dst: &mut FlatBuffer) -> Result<usize, FbufError> {
        dst.set(self.data())
    }

    /// Exchange contents and limits.
    pub fn swap(&mut self, other: &mut FlatBuffer) {
        std::mem::swap(self, other);
    }

    /// Append up to `expected` bytes from `reader` (a single read call).
    pub fn read_from(&mut self, reader: &mut impl Read, expected: usize) -> io::Result<usize> {
        self.extend(expected)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        let start = self.used();
        self.data.resize(start + expected, 0);
        match reader.read(&mut self.data[start..]) {
            Ok(n) => {
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e)
            }
        }
    }

    /// Write the first `nbytes` bytes (or everything, if fewer) to
    /// `writer`, removing what was written.
    pub fn write_to(&mut self, writer: &mut impl Write, nbytes: usize) -> io::Result<usize> {
        let n = nbytes.min(self.used());
        let written = writer.write(&self.data[..n])?;
        self.remove(written);
        Ok(written)
    }

    /// Drop the first `n` bytes.
    pub fn remove(&mut self, n: usize) {
        let n = n.min(self.used());
        self.data.drain(..n);
    }

    /// Strip leading whitespace. Returns how many bytes went away.
    pub fn trim(&mut self) -> usize {
        let skip = self
            .data
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.data.drain(..skip);
        skip
    }

    /// Strip trailing whitespace. Returns how many bytes went away.
    pub fn rtrim(&mut self) -> usize {
        let keep = self
            .data
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |p| p + 1);
        let removed = self.used() - keep;
        self.data.truncate(keep);
        removed
    }
}

struct FmtSink<'a> {
    buf: &'a mut FlatBuffer,
    failed: bool,
}

impl fmt::Write for FmtSink<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.add(s.as_bytes()).is_err() {
            self.failed = true;
            return Err(fmt::Error);
        }
        Ok(())
    }
}
