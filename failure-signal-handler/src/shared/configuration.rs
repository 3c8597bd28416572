// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::collector::emitters::CrashReport;
use crate::shared::constants::*;
use crate::shared::signals::{default_signals, is_catchable, signal_from_signum};
use serde::{Deserialize, Serialize};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Stacktrace collection occurs in the context of a crashing process.
/// If the stack is sufficiently corrupted, it is possible (but unlikely),
/// for stack trace collection itself to crash.
/// We recommend fully enabling stacktrace collection, but allow downgrading it.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StacktraceCollection {
    /// Only the header and the faulting PC are written.
    Disabled,
    WithoutSymbols,
    /// This option uses `backtrace::resolve_unsynchronized()` to gather symbol information.
    /// Symbol resolution is not async-signal-safe; it is best effort, and a crash inside it is
    /// caught by the reentrancy guard.
    EnabledWithInprocessSymbols,
}

/// Called once from the signal handler, after the report has been written to the output fd.
/// The callback must restrict itself to async-signal-safe operations.
pub type WriterCallback = fn(&CrashReport<'_>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSignalHandlerConfiguration {
    call_previous_handler: bool,
    max_frames: usize,
    output_fd: RawFd,
    signals: Vec<i32>,
    stacktrace: StacktraceCollection,
    use_alt_stack: bool,
    watchdog_timeout: Option<Duration>,
    // Function pointers only make sense inside the process that installed them.
    #[serde(skip)]
    writer_callback: Option<WriterCallback>,
}

impl Default for FailureSignalHandlerConfiguration {
    fn default() -> Self {
        Self {
            call_previous_handler: false,
            max_frames: FSH_DEFAULT_MAX_FRAMES,
            output_fd: libc::STDERR_FILENO,
            signals: default_signals(),
            stacktrace: StacktraceCollection::EnabledWithInprocessSymbols,
            use_alt_stack: true,
            watchdog_timeout: Some(FSH_DEFAULT_WATCHDOG_TIMEOUT),
            writer_callback: None,
        }
    }
}

impl FailureSignalHandlerConfiguration {
    pub fn new(
        mut signals: Vec<i32>,
        use_alt_stack: bool,
        call_previous_handler: bool,
        stacktrace: StacktraceCollection,
        watchdog_timeout: Option<Duration>,
        writer_callback: Option<WriterCallback>,
    ) -> anyhow::Result<Self> {
        if signals.is_empty() {
            signals = default_signals();
        }
        let config = Self {
            call_previous_handler,
            signals,
            stacktrace,
            use_alt_stack,
            watchdog_timeout: watchdog_timeout.filter(|t| !t.is_zero()),
            writer_callback,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants `new` establishes. Configurations that did not come from `new`
    /// (e.g. deserialized ones) are validated again at install time.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.signals.is_empty(), "No signals to handle");
        let mut sorted = self.signals.clone();
        sorted.sort_unstable();
        sorted.dedup();
        anyhow::ensure!(
            sorted.len() == self.signals.len(),
            "Signals contained duplicate elements"
        );
        for signum in &self.signals {
            let signal = signal_from_signum(*signum)?;
            anyhow::ensure!(is_catchable(signal), "{signal} cannot be caught");
        }
        anyhow::ensure!(self.max_frames > 0, "max_frames must be at least 1");
        anyhow::ensure!(self.output_fd >= 0, "Invalid output fd {}", self.output_fd);
        Ok(())
    }

    pub fn call_previous_handler(&self) -> bool {
        self.call_previous_handler
    }

    /// Never more than [`FSH_MAX_FRAMES_LIMIT`].
    pub fn max_frames(&self) -> usize {
        self.max_frames.min(FSH_MAX_FRAMES_LIMIT)
    }

    pub fn output_fd(&self) -> RawFd {
        self.output_fd
    }

    pub fn signals(&self) -> &Vec<i32> {
        &self.signals
    }

    pub fn stacktrace(&self) -> StacktraceCollection {
        self.stacktrace
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn watchdog_timeout(&self) -> Option<Duration> {
        self.watchdog_timeout
    }

    /// The watchdog is the process alarm clock, which counts whole seconds.
    pub fn watchdog_seconds(&self) -> Option<u32> {
        self.watchdog_timeout.map(|timeout| {
            let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
            secs.clamp(1, u64::from(u32::MAX)) as u32
        })
    }

    pub fn writer_callback(&self) -> Option<WriterCallback> {
        self.writer_callback
    }

    pub fn set_max_frames(&mut self, max_frames: usize) -> anyhow::Result<()> {
        anyhow::ensure!(max_frames > 0, "max_frames must be at least 1");
        self.max_frames = max_frames;
        Ok(())
    }

    pub fn set_output_fd(&mut self, output_fd: RawFd) -> anyhow::Result<()> {
        anyhow::ensure!(output_fd >= 0, "Invalid output fd {output_fd}");
        self.output_fd = output_fd;
        Ok(())
    }

    pub fn set_writer_callback(&mut self, writer_callback: Option<WriterCallback>) {
        self.writer_callback = writer_callback;
    }
}
