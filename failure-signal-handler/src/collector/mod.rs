// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub(crate) mod async_writer;
mod crash_handler;
pub(crate) mod emitters;
mod guard;
mod platform;
mod signal_handler_manager;
pub(crate) mod stacktrace;

pub use async_writer::{write_all_fd, FixedBuf};
pub use crash_handler::handler_state;
pub use emitters::{format_frame, format_header, CrashReport};
pub use guard::HandlerState;
pub use signal_handler_manager::{
    install, is_installed, AltStackStatus, InstallError, InstallReport,
};
pub use stacktrace::StackFrame;
