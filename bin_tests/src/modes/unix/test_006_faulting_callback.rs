// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::behavior::Behavior;
use failure_signal_handler::{CrashReport, FailureSignalHandlerConfiguration};

/// Registers a writer callback that segfaults. The fault lands back in the handler on the same
/// thread, which must then die by `SIGSEGV` without writing a second report.
pub struct Test;

impl Behavior for Test {
    fn setup(
        &self,
        _output_dir: &str,
        config: &mut FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        config.set_writer_callback(Some(fault));
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

fn fault(_report: &CrashReport<'_>) {
    // Non-null so that debug builds don't turn it into a panic.
    let p = std::hint::black_box(0x10usize) as *mut u8;
    // SAFETY: it isn't, this is the point.
    unsafe { *p = std::hint::black_box(1) };
}
