// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::behavior::{with_call_previous_handler, Behavior};
use anyhow::Context;
use failure_signal_handler::FailureSignalHandlerConfiguration;

/// Installs the failure signal handler twice with chaining enabled. The second installation must
/// not record the first as the previous handler, so a crash is reported once and then dies with
/// the default disposition.
pub struct Test;

impl Behavior for Test {
    fn setup(
        &self,
        _output_dir: &str,
        config: &mut FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        *config = with_call_previous_handler(config, true)?;
        Ok(())
    }

    fn pre(
        &self,
        _output_dir: &str,
        config: &FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            failure_signal_handler::is_installed(),
            "Failure signal handler was not installed"
        );
        failure_signal_handler::install(config.clone())
            .context("Reinstalling the failure signal handler")?
            .into_result()
    }

    fn post(&self, _output_dir: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
