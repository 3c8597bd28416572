// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::behavior::{with_call_previous_handler, Behavior};
use failure_signal_handler::{signal_from_signum, FailureSignalHandlerConfiguration, FixedBuf};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet};
use std::fmt::Write;

/// Written by the application's own handler once the failure signal handler hands over.
pub const CHAINED_MARKER: &str = "application handler called for signal";
/// The application's handler exits with this code instead of dying by signal.
pub const CHAINED_EXIT_CODE: i32 = 42;

/// Installs an application handler for every failure signal before the failure signal handler,
/// and checks that the latter reports first, then chains to it.
pub struct Test;

impl Behavior for Test {
    fn setup(
        &self,
        _output_dir: &str,
        config: &mut FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        *config = with_call_previous_handler(config, true)?;
        let sig_action = SigAction::new(
            SigHandler::SigAction(application_sigaction),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signum in config.signals() {
            let signal = signal_from_signum(*signum)?;
            // SAFETY: the handler only uses async-signal-safe functions.
            unsafe { signal::sigaction(signal, &sig_action) }?;
        }
        Ok(())
    }

    fn pre(
        &self,
        _output_dir: &str,
        _config: &FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post(&self, _output_dir: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

extern "C" fn application_sigaction(
    signum: i32,
    _sig_info: *mut libc::siginfo_t,
    _ucontext: *mut libc::c_void,
) {
    let mut line = FixedBuf::<64>::new();
    let _ = writeln!(line, "{CHAINED_MARKER} {signum}");
    let _ = line.flush_to(libc::STDERR_FILENO);
    // Returning would re-execute a faulting instruction forever.
    // SAFETY: `_exit` is async-signal-safe.
    unsafe { libc::_exit(CHAINED_EXIT_CODE) };
}
