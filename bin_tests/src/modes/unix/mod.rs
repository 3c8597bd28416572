// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
pub mod test_000_donothing;
pub mod test_001_no_altstack;
pub mod test_002_chaining;
pub mod test_003_reinstall;
pub mod test_004_writer_callback;
pub mod test_005_watchdog_timeout;
pub mod test_006_faulting_callback;
