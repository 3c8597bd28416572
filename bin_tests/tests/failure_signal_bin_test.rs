// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

use std::fs;

use bin_tests::modes::unix::test_002_chaining::{CHAINED_EXIT_CODE, CHAINED_MARKER};
use bin_tests::modes::unix::test_004_writer_callback::REPORT_FILE;
use bin_tests::modes::unix::test_005_watchdog_timeout::WATCHDOG_TIMEOUT;
use bin_tests::test_runner::{run_crash_test, CrashTestConfig};
use bin_tests::test_types::{CrashType, TestMode, READY_MESSAGE};
use bin_tests::validation::{validate_no_report, ReportValidator};
use bin_tests::BuildProfile;
use failure_signal_handler::constants::FSH_DEFAULT_MAX_FRAMES;

fn test_raised_signal(profile: BuildProfile, crash_type: CrashType, signame: &str) {
    let config = CrashTestConfig::new(profile, TestMode::DoNothing, crash_type);
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header(signame)?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?
            .validate_only_report_lines()?;
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigsegv_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigSegv, "SIGSEGV");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigill_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigIll, "SIGILL");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigfpe_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigFpe, "SIGFPE");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigabrt_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigAbrt, "SIGABRT");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigterm_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigTerm, "SIGTERM");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigbus_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigBus, "SIGBUS");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_raise_sigtrap_debug() {
    test_raised_signal(BuildProfile::Debug, CrashType::RaiseSigTrap, "SIGTRAP");
}

#[test]
#[ignore] // This test is slow, only run it if explicitly opted in
fn test_raise_sigabrt_release() {
    test_raised_signal(BuildProfile::Release, CrashType::RaiseSigAbrt, "SIGABRT");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_no_signal_no_report() {
    let config = CrashTestConfig::new(BuildProfile::Debug, TestMode::DoNothing, CrashType::None);
    run_crash_test(&config, |run, _| validate_no_report(run)).unwrap();
}

fn test_null_deref(profile: BuildProfile) {
    let config = CrashTestConfig::new(profile, TestMode::DoNothing, CrashType::NullDeref);
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header("SIGSEGV")?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?
            .validate_first_symbol("deref_ptr")?
            // The walk starts at the faulting PC, so the handler's own frames are skipped.
            .validate_symbol_absent("handle_posix_sigaction")?
            .validate_only_report_lines()?;
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_null_deref_debug() {
    test_null_deref(BuildProfile::Debug);
}

#[test]
#[ignore] // This test is slow, only run it if explicitly opted in
fn test_null_deref_release() {
    test_null_deref(BuildProfile::Release);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_stack_overflow_reported_on_alt_stack() {
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::DoNothing,
        CrashType::StackOverflow,
    );
    run_crash_test(&config, |run, _| {
        // Symbolization may itself run out of alternate stack; the header is what must survive.
        ReportValidator::new(run)?.validate_single_header("SIGSEGV")?;
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_failures_report_once() {
    // Threads spawned by std get a minimal alternate stack of their own, too small for
    // symbolization, so run the handler on the threads' regular stacks.
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::NoAltStack,
        CrashType::ConcurrentSigAbrt,
    );
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header("SIGABRT")?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?
            .validate_only_report_lines()?;
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_signal_from_parent_shows_caller() {
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::DoNothing,
        CrashType::WaitForKill,
    );
    run_crash_test(&config, |run, _| {
        assert_eq!(run.stdout.trim_end(), READY_MESSAGE);
        ReportValidator::new(run)?
            .validate_single_header("SIGTERM")?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?
            .validate_symbol_present("wait_for_parent_signal")?;
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_without_alt_stack() {
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::NoAltStack,
        CrashType::RaiseSigAbrt,
    );
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header("SIGABRT")?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?;
        Ok(())
    })
    .unwrap();
}

fn test_chained(crash_type: CrashType, signame: &str, signum: i32) {
    let config = CrashTestConfig::new(BuildProfile::Debug, TestMode::Chained, crash_type)
        .with_exit_code(CHAINED_EXIT_CODE);
    run_crash_test(&config, |run, _| {
        let validator = ReportValidator::new(run)?
            .validate_single_header(signame)?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?
            .validate_last_line(&format!("{CHAINED_MARKER} {signum}"))?;
        assert_eq!(validator.report().other_lines.len(), 1);
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_chained_raise_sigabrt() {
    test_chained(CrashType::RaiseSigAbrt, "SIGABRT", libc::SIGABRT);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_chained_null_deref() {
    test_chained(CrashType::NullDeref, "SIGSEGV", libc::SIGSEGV);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_reinstall_reports_once() {
    // Chaining is enabled; were the first installation recorded as the previous handler, the
    // report would be written twice.
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::Reinstall,
        CrashType::RaiseSigAbrt,
    );
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header("SIGABRT")?
            .validate_only_report_lines()?;
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_writer_callback_sees_the_report() {
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::WriterCallback,
        CrashType::RaiseSigAbrt,
    );
    run_crash_test(&config, |run, fixtures| {
        ReportValidator::new(run)?.validate_single_header("SIGABRT")?;
        let from_callback = fs::read_to_string(fixtures.path(REPORT_FILE))?;
        assert_eq!(from_callback, run.stderr);
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_watchdog_kills_hung_handler() {
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::WatchdogTimeout,
        CrashType::RaiseSigAbrt,
    )
    .with_exit_signal(libc::SIGALRM);
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header("SIGABRT")?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?;
        let elapsed = run.finished_at - run.started_at;
        anyhow::ensure!(
            elapsed <= WATCHDOG_TIMEOUT.as_secs() as i64 + 3,
            "Watchdog took {elapsed}s to fire"
        );
        Ok(())
    })
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_fault_while_reporting_terminates_without_second_report() {
    let config = CrashTestConfig::new(
        BuildProfile::Debug,
        TestMode::FaultingCallback,
        CrashType::RaiseSigAbrt,
    )
    .with_exit_signal(libc::SIGSEGV);
    run_crash_test(&config, |run, _| {
        ReportValidator::new(run)?
            .validate_single_header("SIGABRT")?
            .validate_frames_present(FSH_DEFAULT_MAX_FRAMES)?
            .validate_only_report_lines()?;
        Ok(())
    })
    .unwrap();
}
