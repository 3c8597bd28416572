// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack walking and symbolization for the handler.
//!
//! SIGNAL SAFETY:
//!     Getting a backtrace on rust is not guaranteed to be signal safe.
//!     https://github.com/rust-lang/backtrace-rs/issues/414
//!     Walking the frames to collect the `ip`s appears to be safe, but resolving the frames
//!     sometimes crashes. Walking is therefore done up-front into a fixed array, and resolution
//!     happens one frame at a time while each frame is written, so that everything resolved
//!     before a crash is already out.

use crate::collector::async_writer::FixedBuf;
use crate::shared::configuration::StacktraceCollection;
use crate::shared::constants::{FSH_MAX_FRAMES_LIMIT, FSH_SYMBOL_BUFFER_LEN};
use std::cell::UnsafeCell;
use std::fmt::Write;

/// A single frame of a crash stack: a return address and, once resolved, its symbol.
pub struct StackFrame {
    ip: usize,
    symbol: FixedBuf<FSH_SYMBOL_BUFFER_LEN>,
}

impl StackFrame {
    pub const fn new(ip: usize) -> Self {
        Self {
            ip,
            symbol: FixedBuf::new(),
        }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    /// The demangled symbol name, if resolution succeeded. Long names are truncated.
    pub fn symbol(&self) -> Option<&str> {
        if self.symbol.is_empty() {
            None
        } else {
            Some(self.symbol.as_str())
        }
    }

    fn reset(&mut self, ip: usize) {
        self.ip = ip;
        self.symbol.clear();
    }

    /// Best-effort resolution of the frame's symbol, in process.
    ///
    /// # Safety
    /// Not async-signal-safe: the symbolizer may allocate. Only call this when the alternative
    /// (no symbol) is worse than the chance of a secondary fault, which the reentrancy guard
    /// turns into an immediate termination.
    pub unsafe fn resolve(&mut self) -> bool {
        let symbol = &mut self.symbol;
        symbol.clear();
        backtrace::resolve_unsynchronized(self.ip as *mut std::ffi::c_void, |resolved| {
            // Inlined frames resolve to several symbols; the first is the innermost.
            if symbol.is_empty() {
                if let Some(name) = resolved.name() {
                    // `{:#}` drops the trailing hash from Rust symbol names.
                    let _ = write!(symbol, "{name:#}");
                }
            }
        });
        !symbol.is_empty()
    }
}

impl std::fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackFrame")
            .field("ip", &format_args!("{:#x}", self.ip))
            .field("symbol", &self.symbol())
            .finish()
    }
}

/// Static storage for the frames of the one crash this process will report. Nothing here is
/// heap allocated, since the allocator may be what crashed.
pub(crate) struct FrameStore(UnsafeCell<[StackFrame; FSH_MAX_FRAMES_LIMIT]>);

// SAFETY: the store is only ever handed out to the thread holding the report guard.
unsafe impl Sync for FrameStore {}

impl FrameStore {
    pub(crate) const fn new() -> Self {
        Self(UnsafeCell::new(
            [const { StackFrame::new(0) }; FSH_MAX_FRAMES_LIMIT],
        ))
    }

    /// # Safety
    /// At most one caller may hold the returned reference at a time.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut [StackFrame; FSH_MAX_FRAMES_LIMIT] {
        &mut *self.0.get()
    }
}

/// Walks the calling thread's stack, storing return addresses into `addrs`.
/// Returns the number stored; the walk stops when `addrs` is full or at the null return address
/// that terminates the stack.
///
/// # Safety
/// Uses the unsynchronized unwinder: no other thread may be walking the stack concurrently
/// through this crate, which the report guard ensures.
#[inline(never)]
pub unsafe fn capture(addrs: &mut [usize]) -> usize {
    let mut count = 0;
    if addrs.is_empty() {
        return 0;
    }
    backtrace::trace_unsynchronized(|frame| {
        let ip = frame.ip() as usize;
        if ip == 0 {
            return false;
        }
        addrs[count] = ip;
        count += 1;
        count < addrs.len()
    });
    count
}

/// Skips the frames that belong to the signal handler and the unwinder itself: everything before
/// the faulting instruction. If the faulting instruction never shows up (or is unknown), all
/// frames are kept rather than emitting nothing.
pub fn frames_from_fault(addrs: &[usize], fault_ip: Option<usize>) -> &[usize] {
    fault_ip
        .and_then(|ip| addrs.iter().position(|addr| *addr == ip))
        .map_or(addrs, |start| &addrs[start..])
}

/// Fills `frames` with the (unresolved) crash stack and returns how many were filled.
///
/// The faulting PC always comes first when it is known, even with collection disabled.
///
/// # Safety
/// See [`capture`].
pub unsafe fn collect_frames(
    frames: &mut [StackFrame],
    max_frames: usize,
    collection: StacktraceCollection,
    fault_ip: Option<usize>,
) -> usize {
    let limit = max_frames.min(frames.len());
    let mut count = 0;
    let mut push = |ip: usize| {
        if count < limit {
            frames[count].reset(ip);
            count += 1;
        }
    };

    if let Some(ip) = fault_ip {
        push(ip);
    }
    if collection != StacktraceCollection::Disabled {
        let mut addrs = [0usize; FSH_MAX_FRAMES_LIMIT];
        let captured = capture(&mut addrs);
        let walked = frames_from_fault(&addrs[..captured], fault_ip);
        // The faulting PC was already pushed above.
        let walked = match (fault_ip, walked.first()) {
            (Some(ip), Some(first)) if ip == *first => &walked[1..],
            _ => walked,
        };
        for ip in walked {
            push(*ip);
        }
    }
    count
}
