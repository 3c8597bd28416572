// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! This crate implements a failure signal handler: when the process receives a fatal signal
//! (SIGSEGV, SIGILL, SIGFPE, SIGABRT, SIGTERM, SIGBUS, SIGTRAP by default), it writes a short crash
//! report and then lets the process die exactly as the signal would have killed it.
//!
//! ```text
//! *** SIGSEGV received at time=1561409570 ***
//! PC: @ 0x55c3ddb5d93c my_crate::crashing_fn
//! PC: @ 0x55c3ddb5c672 my_crate::main
//! ```
//!
//! The handler runs under a constrained environment where many standard operations are illegal.
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
//! In particular, memory allocation, and synchronization such as mutexes are potentially UB, since
//! the faulting thread may have been interrupted while holding the allocator's or any other lock.
//! The handler therefore:
//! 1. Claims a process-wide guard with a single compare-and-swap. Only the first claimant
//!    reports; a fault inside the handler, or on another thread while it reports, goes straight
//!    to the signal's default disposition.
//! 2. Optionally arms a watchdog (`alarm(2)`) that kills the process if reporting hangs.
//! 3. Writes the header, then walks the stack into static storage and writes one line per frame,
//!    resolving symbols in process if asked to. Output is formatted into fixed stack buffers and
//!    written with raw `write(2)` calls.
//! 4. Invokes the optional writer callback with the same information.
//! 5. Restores the previous (or default) disposition and re-raises the signal, so that exit
//!    status, core dumps, and anything supervising the process see an ordinary death by signal.
//!
//! Installation happens once at startup through [`install`]. Its configuration is read-only
//! from then on; re-installing replaces it without ever recording this crate's own handler as
//! the one to chain to.
#![cfg(unix)]

mod collector;
mod shared;

pub use collector::*;
pub use shared::configuration::{
    FailureSignalHandlerConfiguration, StacktraceCollection, WriterCallback,
};
pub use shared::constants;
pub use shared::signals::{default_signals, signal_from_signum, signal_name};
