// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Thin wrappers over the handful of system calls the handler makes. Every function in this file
//! is async-signal-safe.
//! <https://man7.org/linux/man-pages/man7/signal-safety.7.html>

use libc::ucontext_t;
use std::time::Duration;

/// A non-zero identifier for the calling thread.
pub fn current_thread_id() -> u64 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        // SAFETY: gettid has no preconditions and cannot fail.
        unsafe { libc::syscall(libc::SYS_gettid) as u64 }
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        // SAFETY: No preconditions.
        unsafe { libc::pthread_self() as u64 }
    }
}

/// Seconds since the unix epoch, or 0 if the clock cannot be read.
pub fn unix_time_seconds() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
        return 0;
    }
    ts.tv_sec as i64
}

/// Sleeps for `duration`, resuming after interruptions.
pub fn sleep_for(duration: Duration) {
    let mut request = libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    };
    let mut remaining = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: both pointers are valid for the duration of the call.
    while unsafe { libc::nanosleep(&request, &mut remaining) } != 0 {
        if nix::errno::Errno::last() != nix::errno::Errno::EINTR {
            break;
        }
        request = remaining;
    }
}

/// The program counter at the point the signal was delivered, if the platform exposes it.
///
/// # Safety
/// `ucontext` must be null or the context pointer the kernel passed to an `SA_SIGINFO` handler.
pub unsafe fn extract_ip(ucontext: *const ucontext_t) -> Option<usize> {
    if ucontext.is_null() {
        return None;
    }
    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    let ip = (*(*ucontext).uc_mcontext).__ss.__rip as usize;
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    let ip = (*(*ucontext).uc_mcontext).__ss.__pc as usize;

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    let ip = (*ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] as usize;
    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    let ip = (*ucontext).uc_mcontext.pc as usize;

    #[cfg(any(
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64"),
    ))]
    return Some(ip);

    #[cfg(not(any(
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64"),
    )))]
    None
}
