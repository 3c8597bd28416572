// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and hard limits shared by the installer and the signal handler.

use std::time::Duration;

/// Default number of frames walked when a failure signal arrives.
pub const FSH_DEFAULT_MAX_FRAMES: usize = 32;

/// Upper bound on frames walked. The handler keeps its frame storage in a static array of this
/// size, so the configured value is clamped to it.
pub const FSH_MAX_FRAMES_LIMIT: usize = 64;

/// Bytes reserved per frame for a symbol name. Longer names are truncated.
pub const FSH_SYMBOL_BUFFER_LEN: usize = 256;

/// Bytes reserved for formatting a single output line (header or frame).
pub const FSH_LINE_BUFFER_LEN: usize = FSH_SYMBOL_BUFFER_LEN + 64;

/// Default time the reporting phase may take before the watchdog kills the process.
pub const FSH_DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a thread that faults while another thread is reporting waits for the reporter to
/// terminate the process before terminating it itself.
pub const FSH_CONCURRENT_FAULT_WAIT: Duration = Duration::from_secs(3);

/// Written in place of a symbol name when none could be resolved.
pub const FSH_UNKNOWN_SYMBOL: &str = "(unknown)";
