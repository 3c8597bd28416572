// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::behavior::{with_alt_stack, Behavior};
use failure_signal_handler::FailureSignalHandlerConfiguration;

/// Runs the handler on the crashing thread's own stack.
pub struct Test;

impl Behavior for Test {
    fn setup(
        &self,
        _output_dir: &str,
        config: &mut FailureSignalHandlerConfiguration,
    ) -> anyhow::Result<()> {
        *config = with_alt_stack(config, false)?;
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
