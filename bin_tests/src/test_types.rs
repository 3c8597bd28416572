// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Printed on stdout by the test binary once the handler is installed and it is waiting to be
/// killed.
pub const READY_MESSAGE: &str = "ready";

/// Represents the different test modes (behaviors) available for failure signal handler tests.
/// Each mode corresponds to a specific test scenario (e.g., chaining, re-installation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestMode {
    DoNothing,
    NoAltStack,
    Chained,
    Reinstall,
    WriterCallback,
    WatchdogTimeout,
    FaultingCallback,
}

impl TestMode {
    /// Returns the string representation used in command-line arguments and behavior mapping.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DoNothing => "donothing",
            Self::NoAltStack => "no_altstack",
            Self::Chained => "chained",
            Self::Reinstall => "reinstall",
            Self::WriterCallback => "writer_callback",
            Self::WatchdogTimeout => "watchdog_timeout",
            Self::FaultingCallback => "faulting_callback",
        }
    }

    /// Returns all available test modes.
    pub const fn all() -> &'static [Self] {
        &[
            Self::DoNothing,
            Self::NoAltStack,
            Self::Chained,
            Self::Reinstall,
            Self::WriterCallback,
            Self::WatchdogTimeout,
            Self::FaultingCallback,
        ]
    }
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("Unknown test mode: {}", s))
    }
}

/// Represents the different ways the test binary can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashType {
    /// Exit normally without any failure signal
    None,
    /// Write to the unmapped page at address zero (SIGSEGV from a real fault)
    NullDeref,
    /// Unbounded recursion until the stack guard page is hit (SIGSEGV)
    StackOverflow,
    RaiseSigSegv,
    RaiseSigIll,
    RaiseSigFpe,
    RaiseSigAbrt,
    RaiseSigTerm,
    RaiseSigBus,
    RaiseSigTrap,
    /// Two threads raise SIGABRT at the same time
    ConcurrentSigAbrt,
    /// Block until the parent process sends SIGTERM
    WaitForKill,
}

impl CrashType {
    /// Returns the string representation used in command-line arguments.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NullDeref => "null_deref",
            Self::StackOverflow => "stack_overflow",
            Self::RaiseSigSegv => "raise_sigsegv",
            Self::RaiseSigIll => "raise_sigill",
            Self::RaiseSigFpe => "raise_sigfpe",
            Self::RaiseSigAbrt => "raise_sigabrt",
            Self::RaiseSigTerm => "raise_sigterm",
            Self::RaiseSigBus => "raise_sigbus",
            Self::RaiseSigTrap => "raise_sigtrap",
            Self::ConcurrentSigAbrt => "concurrent_sigabrt",
            Self::WaitForKill => "wait_for_kill",
        }
    }

    /// Returns all available crash types.
    pub const fn all() -> &'static [Self] {
        &[
            Self::None,
            Self::NullDeref,
            Self::StackOverflow,
            Self::RaiseSigSegv,
            Self::RaiseSigIll,
            Self::RaiseSigFpe,
            Self::RaiseSigAbrt,
            Self::RaiseSigTerm,
            Self::RaiseSigBus,
            Self::RaiseSigTrap,
            Self::ConcurrentSigAbrt,
            Self::WaitForKill,
        ]
    }

    /// Returns the signal this crash type delivers, or `None` for a clean exit.
    pub const fn signal_number(self) -> Option<i32> {
        match self {
            Self::None => None,
            Self::NullDeref | Self::StackOverflow | Self::RaiseSigSegv => Some(libc::SIGSEGV),
            Self::RaiseSigIll => Some(libc::SIGILL),
            Self::RaiseSigFpe => Some(libc::SIGFPE),
            Self::RaiseSigAbrt | Self::ConcurrentSigAbrt => Some(libc::SIGABRT),
            Self::RaiseSigTerm | Self::WaitForKill => Some(libc::SIGTERM),
            Self::RaiseSigBus => Some(libc::SIGBUS),
            Self::RaiseSigTrap => Some(libc::SIGTRAP),
        }
    }
}

impl std::fmt::Display for CrashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrashType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|crash| crash.as_str() == s)
            .ok_or_else(|| format!("Unknown crash type: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in TestMode::all() {
            assert_eq!(mode.as_str().parse::<TestMode>(), Ok(*mode));
        }
        assert!("sigpipe".parse::<TestMode>().is_err());
    }

    #[test]
    fn test_crash_type_round_trips_through_str() {
        for crash in CrashType::all() {
            assert_eq!(crash.as_str().parse::<CrashType>(), Ok(*crash));
        }
        assert!("kill_sigkill".parse::<CrashType>().is_err());
    }

    #[test]
    fn test_only_clean_exit_has_no_signal() {
        for crash in CrashType::all() {
            assert_eq!(crash.signal_number().is_none(), *crash == CrashType::None);
        }
    }
}
