// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Where the process is in handling a failure signal. There is no way back to `Idle`: once a
/// failure signal has been taken, the process is on its way out.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandlerState {
    Idle = 0,
    Entered = 1,
    Reporting = 2,
    Terminating = 3,
}

impl HandlerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HandlerState::Idle,
            1 => HandlerState::Entered,
            2 => HandlerState::Reporting,
            _ => HandlerState::Terminating,
        }
    }
}

/// A `HandlerState` that can be shared with a signal handler.
pub struct AtomicHandlerState(AtomicU8);

impl AtomicHandlerState {
    pub const fn new() -> Self {
        Self(AtomicU8::new(HandlerState::Idle as u8))
    }

    pub fn load(&self) -> HandlerState {
        HandlerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Moves forward to `state`. Never moves backwards, so a late `Entered` from a second thread
    /// cannot hide that the first one is already `Reporting`.
    pub fn advance(&self, state: HandlerState) {
        self.0.fetch_max(state as u8, Ordering::SeqCst);
    }
}

impl Default for AtomicHandlerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned when the guard has already been claimed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AlreadyClaimed {
    pub owner: u64,
}

impl AlreadyClaimed {
    /// True when the thread trying to claim is the one that already holds the guard, i.e. the
    /// handler itself faulted.
    pub fn is_reentrant(&self, thread_id: u64) -> bool {
        self.owner == thread_id
    }
}

impl fmt::Display for AlreadyClaimed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Reentrancy guard error: already claimed by thread {}",
            self.owner
        )
    }
}

impl std::error::Error for AlreadyClaimed {}

/// Fire-once guard for the reporting path.
///
/// The guard holds the id of the thread that claimed it, or 0. Claiming is a single
/// compare-and-swap, so it is lock-free and safe to use from a signal handler. Unlike a scoped
/// guard, it is never released: the process terminates before it would need to be.
pub struct ReportGuard {
    owner: AtomicU64,
}

impl ReportGuard {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU64::new(0),
        }
    }

    /// `thread_id` must be non-zero.
    pub fn claim(&self, thread_id: u64) -> Result<(), AlreadyClaimed> {
        debug_assert_ne!(thread_id, 0);
        self.owner
            .compare_exchange(0, thread_id, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|owner| AlreadyClaimed { owner })
    }

    #[cfg(test)]
    pub fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::SeqCst) {
            0 => None,
            owner => Some(owner),
        }
    }
}

impl Default for ReportGuard {
    fn default() -> Self {
        Self::new()
    }
}
