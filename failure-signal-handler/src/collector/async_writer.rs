// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output primitives that are safe to use from a signal handler: a fixed-capacity formatting
//! buffer and a retrying `write(2)` loop. Neither allocates nor takes locks.

use nix::errno::Errno;
use std::fmt;
use std::os::unix::io::RawFd;

/// Writes all of `bytes` to `fd`, retrying partial writes and `EINTR`.
/// Any other error (including `EAGAIN` on a full non-blocking fd) abandons the remainder of the
/// write.
pub fn write_all_fd(fd: RawFd, mut bytes: &[u8]) -> Result<(), Errno> {
    while !bytes.is_empty() {
        // SAFETY: the pointer and length come from a live slice.
        let rval = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        match rval {
            n if n > 0 => bytes = &bytes[n as usize..],
            0 => return Err(Errno::EIO),
            _ => match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e),
            },
        }
    }
    Ok(())
}

/// A stack-allocated, fixed-capacity text buffer implementing [`fmt::Write`].
///
/// Writes past the capacity are truncated on a `char` boundary, so the contents always remain
/// valid UTF-8, and never fail: a crash report with a clipped symbol beats no report.
pub struct FixedBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> FixedBuf<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn as_str(&self) -> &str {
        // Only whole `str`s and `char`s are ever copied in.
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }

    /// Writes the buffered bytes to `fd` and empties the buffer.
    pub fn flush_to(&mut self, fd: RawFd) -> Result<(), Errno> {
        let rval = write_all_fd(fd, self.as_bytes());
        self.clear();
        rval
    }
}

impl<const N: usize> Default for FixedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for FixedBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let available = N - self.len;
        let mut take = s.len().min(available);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for FixedBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuf")
            .field("contents", &self.as_str())
            .field("truncated", &self.truncated)
            .finish()
    }
}
