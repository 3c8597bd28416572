// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use nix::sys::signal::Signal;

/// The signals handled when the configuration does not name any.
/// See <https://man7.org/linux/man-pages/man7/signal.7.html>
pub fn default_signals() -> Vec<libc::c_int> {
    vec![
        libc::SIGSEGV,
        libc::SIGILL,
        libc::SIGFPE,
        libc::SIGABRT,
        libc::SIGTERM,
        libc::SIGBUS,
        libc::SIGTRAP,
    ]
}

/// Converts a raw signal number into the `nix` representation, rejecting numbers that do not
/// name a signal on this platform.
pub fn signal_from_signum(signum: libc::c_int) -> anyhow::Result<Signal> {
    Signal::try_from(signum).map_err(|e| anyhow::anyhow!("Invalid signal number {signum}: {e}"))
}

/// Name printed in the crash header for `signum`. Only the failure signals have a name; callers
/// fall back to the number for anything else.
///
/// This is a plain `match` so that it can be called from the signal handler.
pub fn signal_name(signum: libc::c_int) -> Option<&'static str> {
    match signum {
        libc::SIGSEGV => Some("SIGSEGV"),
        libc::SIGILL => Some("SIGILL"),
        libc::SIGFPE => Some("SIGFPE"),
        libc::SIGABRT => Some("SIGABRT"),
        libc::SIGTERM => Some("SIGTERM"),
        libc::SIGBUS => Some("SIGBUS"),
        libc::SIGTRAP => Some("SIGTRAP"),
        _ => None,
    }
}

/// `SIGKILL` and `SIGSTOP` can never be caught.
pub fn is_catchable(signal: Signal) -> bool {
    !matches!(signal, Signal::SIGKILL | Signal::SIGSTOP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_signals_are_named() {
        for signum in default_signals() {
            assert!(signal_name(signum).is_some(), "{signum} has no name");
            let signal = signal_from_signum(signum).unwrap();
            assert_eq!(signal.as_str(), signal_name(signum).unwrap());
        }
    }

    #[test]
    fn test_signal_name_unknown() {
        assert_eq!(signal_name(libc::SIGUSR1), None);
        assert_eq!(signal_name(0), None);
        assert_eq!(signal_name(-3), None);
    }

    #[test]
    fn test_signal_from_signum() {
        assert_eq!(signal_from_signum(libc::SIGBUS).unwrap(), Signal::SIGBUS);
        signal_from_signum(0).unwrap_err();
        signal_from_signum(4096).unwrap_err();
    }

    #[test]
    fn test_is_catchable() {
        assert!(is_catchable(Signal::SIGSEGV));
        assert!(!is_catchable(Signal::SIGKILL));
        assert!(!is_catchable(Signal::SIGSTOP));
    }
}
