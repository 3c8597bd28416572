// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::crash_handler::handle_posix_sigaction;
use crate::shared::configuration::FailureSignalHandlerConfiguration;
use crate::shared::signals::signal_from_signum;
use libc::{
    c_void, mmap, sigaltstack, siginfo_t, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ,
    PROT_WRITE, SIGSTKSZ,
};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr};
use tracing::{debug, warn};

// Linux seems to have the most, supporting up to 64 inclusive
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;

// The registry of dispositions that were active before we installed ourselves, one slot per
// signal number. Using mutexes inside a signal handler is not allowed, so each slot is an
// `AtomicPtr` that is either null or came from `Box::into_raw()`.
// Replaced entries are leaked rather than freed: a handler on another thread may still be reading
// them, and the process is expected to install at most a handful of times.
static PREVIOUS_HANDLERS: [AtomicPtr<SigAction>; MAX_SIGNALS] =
    [const { AtomicPtr::new(ptr::null_mut()) }; MAX_SIGNALS];

// The configuration the handler runs with. Same ownership rules as `PREVIOUS_HANDLERS`.
static CONFIG: AtomicPtr<FailureSignalHandlerConfiguration> = AtomicPtr::new(ptr::null_mut());

static INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Invalid configuration: {0:#}")]
    InvalidConfiguration(anyhow::Error),
    #[error("Signal {0} is out of range for the handler registry")]
    UnsupportedSignal(i32),
    #[error("Unable to register handler for {signal}: {source}")]
    Sigaction {
        signal: Signal,
        #[source]
        source: Errno,
    },
    #[error("Failed to allocate an alternative stack: {0}")]
    AltStackAllocation(#[source] Errno),
    #[error("Failed to set up alternative stack guard page: {0}")]
    AltStackGuardPage(#[source] Errno),
    #[error("sigaltstack failed: {0}")]
    SigAltStack(#[source] Errno),
}

/// How the alternate signal stack was provided for the installing thread.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AltStackStatus {
    /// A new stack was mapped and activated.
    Created,
    /// The thread already had an alternate stack of sufficient size.
    Reused,
}

/// Outcome of [`install`]. Installation is best-effort per signal, so a report can describe a
/// partially successful installation.
#[derive(Debug)]
pub struct InstallReport {
    pub signals: Vec<(i32, Result<(), InstallError>)>,
    /// `None` when the configuration does not ask for an alternate stack. An `Err` means stack
    /// overflows will most likely not be reported, though other faults still are.
    pub alt_stack: Option<Result<AltStackStatus, InstallError>>,
}

impl InstallReport {
    /// True when every requested signal was registered and, if requested, the alternate stack is
    /// in place.
    pub fn is_complete(&self) -> bool {
        self.signals.iter().all(|(_, result)| result.is_ok())
            && !matches!(self.alt_stack, Some(Err(_)))
    }

    pub fn installed_signals(&self) -> impl Iterator<Item = i32> + '_ {
        self.signals
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(signum, _)| *signum)
    }

    pub fn failed_signals(&self) -> impl Iterator<Item = (i32, &InstallError)> + '_ {
        self.signals
            .iter()
            .filter_map(|(signum, result)| result.as_ref().err().map(|e| (*signum, e)))
    }

    /// Collapses the report into a single error describing everything that went wrong.
    pub fn into_result(self) -> anyhow::Result<()> {
        let mut errors: Vec<String> = self
            .failed_signals()
            .map(|(_, e)| e.to_string())
            .collect();
        if let Some(Err(e)) = &self.alt_stack {
            errors.push(e.to_string());
        }
        anyhow::ensure!(
            errors.is_empty(),
            "Errors installing failure signal handlers {errors:?}"
        );
        Ok(())
    }
}

/// Registers the failure signal handler for every signal in `config`.
///
/// Re-installing is allowed. The configuration is replaced, and for each signal the previously
/// recorded disposition is kept if the disposition being replaced is our own handler, so that
/// chaining never loops back into this crate.
///
/// Errors are only returned for problems detected before any disposition changes. Failures to
/// register an individual signal, or to set up the alternate stack, are reported per item in the
/// returned [`InstallReport`] and do not stop the remaining signals from being installed.
///
/// ATOMICITY:
///     Setting the handler itself is not an atomic operation: if a signal is delivered between
///     registering the handler and recording the previous disposition, the handler falls back to
///     the default disposition instead of chaining.
pub fn install(
    config: FailureSignalHandlerConfiguration,
) -> Result<InstallReport, InstallError> {
    config.validate().map_err(InstallError::InvalidConfiguration)?;
    // Validate signal numbers will fit in the registry.
    let signals = config
        .signals()
        .iter()
        .map(|signum| {
            if *signum <= 0 || *signum as usize >= MAX_SIGNALS {
                return Err(InstallError::UnsupportedSignal(*signum));
            }
            let signal =
                signal_from_signum(*signum).map_err(|_| InstallError::UnsupportedSignal(*signum))?;
            Ok((*signum, signal))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let alt_stack = if config.use_alt_stack() {
        // Safety: This function has no documented preconditions.
        let result = unsafe { ensure_alt_stack() };
        match &result {
            Ok(status) => debug!(?status, "Alternate signal stack ready"),
            Err(e) => warn!("{e}; stack overflows will not be reported"),
        }
        Some(result)
    } else {
        None
    };

    // Between this and `ensure_alt_stack()`, note that it is generally preferable to run in an
    // altstack, given the choice. Some runtimes set up an altstack of their own; in that case
    // `SA_ONSTACK` makes us use it.
    let flags = if config.use_alt_stack() {
        SaFlags::SA_NODEFER | SaFlags::SA_ONSTACK
    } else {
        SaFlags::SA_NODEFER
    };

    // Publish the configuration before any handler can observe it missing. A configuration being
    // replaced is leaked, see `PREVIOUS_HANDLERS`.
    CONFIG.swap(Box::into_raw(Box::new(config)), SeqCst);

    let outcomes = signals
        .into_iter()
        .map(|(signum, signal)| {
            // Safety: This function has no documented preconditions.
            let result = unsafe { register_signal_handler(signum, signal, flags) };
            match &result {
                Ok(()) => debug!(%signal, "Registered failure signal handler"),
                Err(e) => warn!("{e}"),
            }
            (signum, result)
        })
        .collect();

    INSTALLED.store(true, SeqCst);
    Ok(InstallReport {
        signals: outcomes,
        alt_stack,
    })
}

/// Whether [`install`] has completed at least once in this process.
pub fn is_installed() -> bool {
    INSTALLED.load(SeqCst)
}

/// The configuration installed most recently, if any.
pub(crate) fn current_config() -> Option<&'static FailureSignalHandlerConfiguration> {
    let config = CONFIG.load(SeqCst);
    // SAFETY: non-null values come from `Box::into_raw` in `install` and are never freed.
    unsafe { config.as_ref() }
}

fn is_own_handler(action: &SigAction) -> bool {
    match action.handler() {
        SigHandler::SigAction(f) => {
            f as *const () as usize == handle_posix_sigaction as *const () as usize
        }
        _ => false,
    }
}

unsafe fn register_signal_handler(
    signum: i32,
    signal: Signal,
    flags: SaFlags,
) -> Result<(), InstallError> {
    let sig_action = SigAction::new(
        SigHandler::SigAction(handle_posix_sigaction),
        flags,
        SigSet::empty(),
    );

    let old_handler = signal::sigaction(signal, &sig_action)
        .map_err(|source| InstallError::Sigaction { signal, source })?;
    // Never record ourselves, or chaining would loop.
    if !is_own_handler(&old_handler) {
        PREVIOUS_HANDLERS[signum as usize].swap(Box::into_raw(Box::new(old_handler)), SeqCst);
    }
    Ok(())
}

/// The disposition that was active before we installed ourselves for `signum`.
pub(crate) fn previous_handler(signum: i32) -> Option<&'static SigAction> {
    if signum <= 0 || signum as usize >= MAX_SIGNALS {
        return None;
    }
    let action = PREVIOUS_HANDLERS[signum as usize].load(SeqCst);
    // SAFETY: non-null values come from `Box::into_raw` and are never freed.
    unsafe { action.as_ref() }
}

/// Restores the default disposition for `signum` and re-raises it, so that the process dies the
/// way it would have without a handler (core dump included). `SA_NODEFER` means the signal is
/// delivered before `raise` returns.
///
/// If the signal was delivered by a faulting instruction and somehow survives the `raise`,
/// returning from the handler re-executes the instruction, which then meets the default
/// disposition.
pub(crate) unsafe fn terminate_with_default(signum: i32) {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    match Signal::try_from(signum) {
        Ok(signal) => {
            let _ = signal::sigaction(signal, &default);
        }
        Err(_) => {
            libc::signal(signum, libc::SIG_DFL);
        }
    }
    libc::raise(signum);
}

/// Once we've handled the signal, chain to the previous handler.
/// The previous disposition is reinstalled first, so a faulting instruction that is re-executed
/// after we return goes straight to it.
/// If there is no previous disposition on record (a crash raced with `install`), we fall back to
/// the default disposition.
pub(crate) unsafe fn chain_signal_handler(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    let (Some(previous), Ok(signal)) = (previous_handler(signum), Signal::try_from(signum)) else {
        terminate_with_default(signum);
        return;
    };
    // How we chain depends on what kind of handler we're chaining to.
    // https://www.gnu.org/software/libc/manual/html_node/Signal-Handling.html
    // https://man7.org/linux/man-pages/man2/sigaction.2.html
    if signal::sigaction(signal, previous).is_err() {
        terminate_with_default(signum);
        return;
    }
    match previous.handler() {
        SigHandler::SigDfl => {
            // Signals are only delivered once. In the case where we were invoked by
            // `raise(SIGSEGV)` we need to re-raise the signal, or the default handler will never
            // receive it.
            libc::raise(signum);
        }
        SigHandler::SigIgn => (), // Return and ignore the signal.
        SigHandler::Handler(f) => f(signum),
        SigHandler::SigAction(f) => f(signum, sig_info, ucontext),
    }
}

/// Size of the alternate stack we create: the greater of 16 pages or SIGSTKSZ.
/// In-process symbolization is stack hungry, and has been observed to exceed the default
/// SIGSTKSZ (8KB).
fn alt_stack_size() -> usize {
    std::cmp::max(SIGSTKSZ, 16 * page_size::get())
}

/// Makes sure the calling thread has an alternate signal stack at least [`alt_stack_size`] big.
/// A sufficiently large altstack that is already in place (e.g. from an earlier install, or set up
/// by the runtime) is reused. Otherwise, a new one is mapped, with a guard page at its end.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
///
/// Only the calling thread is covered: alternate stacks are per thread.
unsafe fn ensure_alt_stack() -> Result<AltStackStatus, InstallError> {
    let wanted = alt_stack_size();
    let mut current: libc::stack_t = std::mem::zeroed();
    if sigaltstack(ptr::null(), &mut current) == 0
        && current.ss_flags & libc::SS_DISABLE == 0
        && current.ss_size >= wanted
    {
        return Ok(AltStackStatus::Reused);
    }

    let page_size = page_size::get();
    let stackp = mmap(
        ptr::null_mut(),
        wanted + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    if stackp == MAP_FAILED {
        return Err(InstallError::AltStackAllocation(Errno::last()));
    }
    if libc::mprotect(stackp, page_size, PROT_NONE) != 0 {
        let errno = Errno::last();
        libc::munmap(stackp, wanted + page_size);
        return Err(InstallError::AltStackGuardPage(errno));
    }
    let stack = libc::stack_t {
        ss_sp: stackp.add(page_size),
        ss_flags: 0,
        ss_size: wanted,
    };
    if sigaltstack(&stack, ptr::null_mut()) != 0 {
        let errno = Errno::last();
        libc::munmap(stackp, wanted + page_size);
        return Err(InstallError::SigAltStack(errno));
    }
    Ok(AltStackStatus::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::configuration::StacktraceCollection;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_max_signals() {
        assert!(super::MAX_SIGNALS as libc::c_int > libc::SIGRTMAX());
    }

    #[test]
    fn test_report_summaries() {
        let report = InstallReport {
            signals: vec![
                (libc::SIGSEGV, Ok(())),
                (
                    libc::SIGBUS,
                    Err(InstallError::Sigaction {
                        signal: Signal::SIGBUS,
                        source: Errno::EINVAL,
                    }),
                ),
            ],
            alt_stack: Some(Ok(AltStackStatus::Created)),
        };
        assert!(!report.is_complete());
        assert_eq!(
            report.installed_signals().collect::<Vec<_>>(),
            vec![libc::SIGSEGV]
        );
        assert_eq!(
            report.failed_signals().map(|(s, _)| s).collect::<Vec<_>>(),
            vec![libc::SIGBUS]
        );
        let err = report.into_result().unwrap_err().to_string();
        assert!(err.contains("SIGBUS"), "{err}");

        let report = InstallReport {
            signals: vec![(libc::SIGSEGV, Ok(()))],
            alt_stack: Some(Err(InstallError::AltStackAllocation(Errno::ENOMEM))),
        };
        assert!(!report.is_complete());
        report.into_result().unwrap_err();

        let report = InstallReport {
            signals: vec![(libc::SIGSEGV, Ok(()))],
            alt_stack: None,
        };
        assert!(report.is_complete());
        report.into_result().unwrap();
    }

    #[test]
    fn test_install_rejects_invalid_config() {
        let config: FailureSignalHandlerConfiguration =
            serde_json::from_value(serde_json::json!({
                "call_previous_handler": false,
                "max_frames": 8,
                "output_fd": 2,
                "signals": [libc::SIGKILL],
                "stacktrace": "Disabled",
                "use_alt_stack": false,
                "watchdog_timeout": null,
            }))
            .unwrap();
        assert!(matches!(
            install(config),
            Err(InstallError::InvalidConfiguration(_))
        ));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_ensure_alt_stack_is_reused() {
        // Run on a fresh thread so the test harness's own thread is unaffected.
        std::thread::spawn(|| {
            let first = unsafe { ensure_alt_stack() }.unwrap();
            assert!(matches!(
                first,
                AltStackStatus::Created | AltStackStatus::Reused
            ));
            let second = unsafe { ensure_alt_stack() }.unwrap();
            assert_eq!(second, AltStackStatus::Reused);
        })
        .join()
        .unwrap();
    }

    // Installing for a signal that is never raised must not change how the process runs. This
    // installs on SIGUSR2 only, so the rest of the test binary is unaffected.
    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_install_and_reinstall_records_previous_once() -> anyhow::Result<()> {
        extern "C" fn sentinel(_: i32) {}

        let sentinel_action = SigAction::new(
            SigHandler::Handler(sentinel),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { signal::sigaction(Signal::SIGUSR2, &sentinel_action) }?;

        let config = FailureSignalHandlerConfiguration::new(
            vec![libc::SIGUSR2],
            false,
            true,
            StacktraceCollection::WithoutSymbols,
            None,
            None,
        )?;
        let report = install(config.clone())?;
        assert!(report.is_complete());
        assert!(report.alt_stack.is_none());
        assert!(is_installed());
        assert_eq!(
            report.installed_signals().collect::<Vec<_>>(),
            vec![libc::SIGUSR2]
        );

        let recorded = previous_handler(libc::SIGUSR2).unwrap();
        assert_eq!(recorded.handler(), SigHandler::Handler(sentinel));

        // Re-installing replaces our own handler with itself; the record must still point at
        // the sentinel, not at us.
        install(config)?.into_result()?;
        let recorded = previous_handler(libc::SIGUSR2).unwrap();
        assert_eq!(recorded.handler(), SigHandler::Handler(sentinel));
        assert!(!is_own_handler(recorded));

        let active = unsafe { signal::sigaction(Signal::SIGUSR2, &sentinel_action) }?;
        assert!(is_own_handler(&active));
        assert!(current_config().is_some_and(|c| c.call_previous_handler()));
        Ok(())
    }

    #[test]
    fn test_previous_handler_out_of_range() {
        assert!(previous_handler(0).is_none());
        assert!(previous_handler(-4).is_none());
        assert!(previous_handler(MAX_SIGNALS as i32).is_none());
    }
}
