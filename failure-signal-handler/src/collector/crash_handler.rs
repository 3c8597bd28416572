// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::emitters::{emit_frames, emit_header, CrashReport};
use super::guard::{AtomicHandlerState, HandlerState, ReportGuard};
use super::platform::{current_thread_id, extract_ip, sleep_for, unix_time_seconds};
use super::signal_handler_manager::{chain_signal_handler, current_config, terminate_with_default};
use super::stacktrace::{collect_frames, FrameStore};
use crate::shared::configuration::{FailureSignalHandlerConfiguration, StacktraceCollection};
use crate::shared::constants::FSH_CONCURRENT_FAULT_WAIT;
use libc::{c_void, siginfo_t, ucontext_t};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::alarm;
use std::panic::{self, AssertUnwindSafe};

// Note that this file makes use the following async-signal safe functions in a signal handler.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - alarm
// - clock_gettime
// - nanosleep
// - raise
// - sigaction
// - write
// Symbol resolution is the exception, and is opt-in through `StacktraceCollection`.

static GUARD: ReportGuard = ReportGuard::new();
static STATE: AtomicHandlerState = AtomicHandlerState::new();
static FRAMES: FrameStore = FrameStore::new();

/// Where this process is in handling a failure signal. Anything but `Idle` means a failure
/// signal has been delivered and the process is terminating.
pub fn handler_state() -> HandlerState {
    STATE.load()
}

pub(crate) extern "C" fn handle_posix_sigaction(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    STATE.advance(HandlerState::Entered);

    // One-time guard to guarantee at most one crash report per process.
    // If this code hits a stack overflow, or the reporting below faults, the resulting signal
    // lands back here and is turned away by the guard.
    let thread_id = current_thread_id();
    if let Err(claimed) = GUARD.claim(thread_id) {
        if !claimed.is_reentrant(thread_id) {
            // Another thread is reporting. Give it time to finish and kill the process; if it
            // doesn't, we do so ourselves.
            sleep_for(FSH_CONCURRENT_FAULT_WAIT);
        }
        // SAFETY: No preconditions.
        unsafe { terminate_with_default(signum) };
        return;
    }

    let Some(config) = current_config() else {
        // Crashed during handler setup; there is nothing to report with.
        // SAFETY: No preconditions.
        unsafe { terminate_with_default(signum) };
        return;
    };

    let watchdog_armed = config.watchdog_seconds().map(arm_watchdog).is_some();
    STATE.advance(HandlerState::Reporting);
    // SAFETY: we hold the guard, and `ucontext` came from the kernel.
    unsafe { report(signum, ucontext as *const ucontext_t, config) };
    if watchdog_armed {
        alarm::cancel();
    }

    STATE.advance(HandlerState::Terminating);
    // SAFETY: No preconditions.
    unsafe {
        if config.call_previous_handler() {
            chain_signal_handler(signum, sig_info, ucontext);
        } else {
            terminate_with_default(signum);
        }
    }
}

/// Bounds how long reporting may take: if the alarm fires, `SIGALRM`'s default disposition kills
/// the process. Whatever `SIGALRM` handler the application had is replaced, since the process is
/// going down anyway.
fn arm_watchdog(seconds: u32) {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: restoring the default disposition has no preconditions.
    let _ = unsafe { signal::sigaction(Signal::SIGALRM, &default) };
    alarm::set(seconds);
}

/// Writes the crash report for `signum` to the configured fd, then hands it to the writer
/// callback if there is one.
///
/// # Safety
/// Must only be called by the holder of `GUARD`, which owns `FRAMES`.
unsafe fn report(
    signum: i32,
    ucontext: *const ucontext_t,
    config: &FailureSignalHandlerConfiguration,
) {
    let fd = config.output_fd();
    let timestamp = unix_time_seconds();
    // The header goes out before anything that might fault.
    emit_header(fd, signum, timestamp);

    let fault_pc = extract_ip(ucontext);
    let frames = FRAMES.get_mut();
    let count = collect_frames(frames, config.max_frames(), config.stacktrace(), fault_pc);
    let frames = &mut frames[..count];
    emit_frames(
        fd,
        frames,
        config.stacktrace() == StacktraceCollection::EnabledWithInprocessSymbols,
    );

    if let Some(callback) = config.writer_callback() {
        let report = CrashReport {
            signum,
            timestamp,
            fault_pc,
            frames,
        };
        // A panicking callback must not keep the process from dying the right way.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| callback(&report)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_idle() {
        // No test in this binary raises a configured failure signal.
        assert_eq!(handler_state(), HandlerState::Idle);
        assert_eq!(GUARD.owner(), None);
    }
}
