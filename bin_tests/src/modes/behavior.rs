// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::modes::unix::*;
use crate::test_types::TestMode;
use anyhow::Result;
use failure_signal_handler::FailureSignalHandlerConfiguration;
use std::time::Duration;

/// Defines the additional behavior for a given failure signal handler test
pub trait Behavior {
    /// Adjusts the configuration before it is installed.
    fn setup(&self, output_dir: &str, config: &mut FailureSignalHandlerConfiguration)
        -> Result<()>;
    /// Runs after installation, right before the crash.
    fn pre(&self, output_dir: &str, config: &FailureSignalHandlerConfiguration) -> Result<()>;
    /// Only reached when the crash type does not kill the process.
    fn post(&self, output_dir: &str) -> Result<()>;
}

/// Rebuilds `config` through the validating constructor with a different alt stack setting.
pub fn with_alt_stack(
    config: &FailureSignalHandlerConfiguration,
    use_alt_stack: bool,
) -> Result<FailureSignalHandlerConfiguration> {
    FailureSignalHandlerConfiguration::new(
        config.signals().clone(),
        use_alt_stack,
        config.call_previous_handler(),
        config.stacktrace(),
        config.watchdog_timeout(),
        config.writer_callback(),
    )
}

/// Same as [`with_alt_stack`], for the chaining setting.
pub fn with_call_previous_handler(
    config: &FailureSignalHandlerConfiguration,
    call_previous_handler: bool,
) -> Result<FailureSignalHandlerConfiguration> {
    FailureSignalHandlerConfiguration::new(
        config.signals().clone(),
        config.use_alt_stack(),
        call_previous_handler,
        config.stacktrace(),
        config.watchdog_timeout(),
        config.writer_callback(),
    )
}

/// Same as [`with_alt_stack`], for the watchdog timeout.
pub fn with_watchdog_timeout(
    config: &FailureSignalHandlerConfiguration,
    watchdog_timeout: Option<Duration>,
) -> Result<FailureSignalHandlerConfiguration> {
    FailureSignalHandlerConfiguration::new(
        config.signals().clone(),
        config.use_alt_stack(),
        config.call_previous_handler(),
        config.stacktrace(),
        watchdog_timeout,
        config.writer_callback(),
    )
}

pub fn get_behavior(mode: TestMode) -> Box<dyn Behavior> {
    match mode {
        TestMode::DoNothing => Box::new(test_000_donothing::Test),
        TestMode::NoAltStack => Box::new(test_001_no_altstack::Test),
        TestMode::Chained => Box::new(test_002_chaining::Test),
        TestMode::Reinstall => Box::new(test_003_reinstall::Test),
        TestMode::WriterCallback => Box::new(test_004_writer_callback::Test),
        TestMode::WatchdogTimeout => Box::new(test_005_watchdog_timeout::Test),
        TestMode::FaultingCallback => Box::new(test_006_faulting_callback::Test),
    }
}
