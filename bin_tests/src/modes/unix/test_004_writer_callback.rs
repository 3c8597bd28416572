// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::behavior::Behavior;
use anyhow::Context;
use failure_signal_handler::{CrashReport, FailureSignalHandlerConfiguration, FixedBuf};
use std::os::unix::io::IntoRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering::SeqCst};

/// Name of the file, in the output directory, the writer callback copies the report into.
pub const REPORT_FILE: &str = "callback.report";

static REPORT_FD: AtomicI32 = AtomicI32::new(-1);

/// Registers a writer callback that renders the report a second time, into a file.
pub struct Test;

impl Behavior for Test {
    fn setup(
        &self,
        output_dir: &str,
        config: &mut FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        let path = Path::new(output_dir).join(REPORT_FILE);
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create file: {}", path.display()))?;
        // The handler never returns to close it.
        REPORT_FD.store(file.into_raw_fd(), SeqCst);
        config.set_writer_callback(Some(write_report));
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

fn write_report(report: &CrashReport<'_>) {
    let fd = REPORT_FD.load(SeqCst);
    if fd < 0 {
        return;
    }
    let mut buf = FixedBuf::<16384>::new();
    let _ = report.write_to(&mut buf);
    let _ = buf.flush_to(fd);
}
