// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Formatting of the crash report. Each line is formatted into a fixed stack buffer and written
//! with a single retrying `write(2)`, so nothing here allocates or locks.
//!
//! ```text
//! *** SIGSEGV received at time=1561409570 ***
//! PC: @ 0x55c3ddb5d93c my_crate::crashing_fn
//! PC: @ 0x55c3ddb5c672 main
//! PC: @ 0x7faef9b7a52b (unknown)
//! ```

use crate::collector::async_writer::FixedBuf;
use crate::collector::stacktrace::StackFrame;
use crate::shared::constants::{FSH_LINE_BUFFER_LEN, FSH_UNKNOWN_SYMBOL};
use crate::shared::signals::signal_name;
use std::fmt::{self, Write};
use std::os::unix::io::RawFd;

/// Everything the handler knows about the crash. Handed to the configured writer callback after
/// the report has been written to the output fd.
#[derive(Debug)]
pub struct CrashReport<'a> {
    pub signum: libc::c_int,
    pub timestamp: i64,
    /// Program counter at the time of the fault, when the platform exposes it.
    pub fault_pc: Option<usize>,
    /// Frames in the order they were written, faulting PC first.
    pub frames: &'a [StackFrame],
}

impl CrashReport<'_> {
    pub fn signal_name(&self) -> Option<&'static str> {
        signal_name(self.signum)
    }

    /// Renders the report exactly as the handler wrote it.
    pub fn write_to(&self, w: &mut impl Write) -> fmt::Result {
        format_header(w, self.signum, self.timestamp)?;
        for frame in self.frames {
            format_frame(w, frame)?;
        }
        Ok(())
    }
}

pub fn format_header(w: &mut impl Write, signum: libc::c_int, timestamp: i64) -> fmt::Result {
    match signal_name(signum) {
        Some(name) => writeln!(w, "*** {name} received at time={timestamp} ***"),
        None => writeln!(w, "*** Signal {signum} received at time={timestamp} ***"),
    }
}

pub fn format_frame(w: &mut impl Write, frame: &StackFrame) -> fmt::Result {
    writeln!(
        w,
        "PC: @ {:#x} {}",
        frame.ip(),
        frame.symbol().unwrap_or(FSH_UNKNOWN_SYMBOL)
    )
}

/// Writes the header line. Write errors are ignored: reporting must never block termination.
pub(crate) fn emit_header(fd: RawFd, signum: libc::c_int, timestamp: i64) {
    let mut line = FixedBuf::<FSH_LINE_BUFFER_LEN>::new();
    let _ = format_header(&mut line, signum, timestamp);
    let _ = line.flush_to(fd);
}

/// Resolves (if requested) and writes each frame, one line at a time.
///
/// # Safety
/// With `resolve_symbols`, see [`StackFrame::resolve`].
pub(crate) unsafe fn emit_frames(fd: RawFd, frames: &mut [StackFrame], resolve_symbols: bool) {
    let mut line = FixedBuf::<FSH_LINE_BUFFER_LEN>::new();
    for frame in frames {
        if resolve_symbols {
            frame.resolve();
        }
        let _ = format_frame(&mut line, frame);
        // Keep going on errors: a later write may still succeed, e.g. after EINTR storms.
        let _ = line.flush_to(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_format() {
        let mut out = String::new();
        format_header(&mut out, libc::SIGABRT, 1561409570).unwrap();
        assert_eq!(out, "*** SIGABRT received at time=1561409570 ***\n");

        let mut out = String::new();
        format_header(&mut out, libc::SIGUSR2, 7).unwrap();
        assert_eq!(out, format!("*** Signal {} received at time=7 ***\n", libc::SIGUSR2));
    }

    #[test]
    fn test_frame_format() {
        let mut out = String::new();
        format_frame(&mut out, &StackFrame::new(0x7faef9c1cff4)).unwrap();
        assert_eq!(out, "PC: @ 0x7faef9c1cff4 (unknown)\n");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_report_write_to() {
        let mut frame = StackFrame::new(0);
        // Resolve a real code address so that the frame carries a symbol.
        let mut addrs = [0usize; 8];
        let count = unsafe { crate::collector::stacktrace::capture(&mut addrs) };
        for ip in &addrs[..count] {
            frame = StackFrame::new(*ip);
            if unsafe { frame.resolve() } {
                break;
            }
        }
        let symbol = frame.symbol().unwrap().to_string();
        let frames = [StackFrame::new(0x1234), frame];
        let report = CrashReport {
            signum: libc::SIGSEGV,
            timestamp: 42,
            fault_pc: Some(0x1234),
            frames: &frames,
        };
        assert_eq!(report.signal_name(), Some("SIGSEGV"));

        let mut out = String::new();
        report.write_to(&mut out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "*** SIGSEGV received at time=42 ***");
        assert_eq!(lines[1], "PC: @ 0x1234 (unknown)");
        assert!(lines[2].starts_with("PC: @ 0x"));
        assert!(lines[2].ends_with(&symbol));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_emit_to_pipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (fds[0], fds[1]);

        emit_header(wr, libc::SIGFPE, 100);
        let mut frames = [StackFrame::new(0xa), StackFrame::new(0xb)];
        unsafe { emit_frames(wr, &mut frames, false) };
        unsafe { libc::close(wr) };

        let mut buf = [0u8; 256];
        let mut out = Vec::new();
        loop {
            let n = unsafe { libc::read(rd, buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
            out.extend_from_slice(&buf[..n as usize]);
        }
        unsafe { libc::close(rd) };
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "*** SIGFPE received at time=100 ***\nPC: @ 0xa (unknown)\nPC: @ 0xb (unknown)\n"
        );
    }
}
