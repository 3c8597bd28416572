// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::behavior::{with_watchdog_timeout, Behavior};
use failure_signal_handler::{CrashReport, FailureSignalHandlerConfiguration};
use std::time::Duration;

/// The watchdog timeout used by this mode.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(1);

/// Registers a writer callback that never returns. The watchdog must kill the process by
/// `SIGALRM` once the timeout expires, after the report has been written.
pub struct Test;

impl Behavior for Test {
    fn setup(
        &self,
        _output_dir: &str,
        config: &mut FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        config.set_writer_callback(Some(hang_forever));
        *config = with_watchdog_timeout(config, Some(WATCHDOG_TIMEOUT))?;
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

fn hang_forever(_report: &CrashReport<'_>) {
    loop {
        std::thread::sleep(std::hint::black_box(Duration::from_secs(1)));
    }
}
