// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic test runner infrastructure for failure signal handler tests.
//! This module provides a configurable test runner that eliminates code duplication
//! across different test scenarios.

use crate::{
    build_artifacts,
    test_types::{CrashType, TestMode, READY_MESSAGE},
    ArtifactType, ArtifactsBuild, BuildProfile,
};
use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::{
    io::{BufRead, BufReader, Read},
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{self, Stdio},
    time::{SystemTime, UNIX_EPOCH},
};

/// How the test binary is expected to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedExit {
    Success,
    /// Killed by this signal, as if no handler had been installed.
    Signal(i32),
    /// Exited with this code, e.g. from a chained application handler.
    Code(i32),
}

/// Configuration for a failure signal handler test.
#[derive(Debug, Clone)]
pub struct CrashTestConfig {
    /// Build profile for the test binary
    pub profile: BuildProfile,
    /// Test mode (behavior)
    pub mode: TestMode,
    /// Type of crash to trigger
    pub crash_type: CrashType,
    /// Overrides the exit derived from the crash type
    pub expected_exit: Option<ExpectedExit>,
}

impl CrashTestConfig {
    /// Creates a new test configuration with the given profile, mode, and crash type.
    pub fn new(profile: BuildProfile, mode: TestMode, crash_type: CrashType) -> Self {
        Self {
            profile,
            mode,
            crash_type,
            expected_exit: None,
        }
    }

    /// Expects the test binary to exit with `code` instead of dying by signal.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.expected_exit = Some(ExpectedExit::Code(code));
        self
    }

    /// Expects the test binary to be killed by `signum` instead of the crash type's signal.
    pub fn with_exit_signal(mut self, signum: i32) -> Self {
        self.expected_exit = Some(ExpectedExit::Signal(signum));
        self
    }

    pub fn expected_exit(&self) -> ExpectedExit {
        self.expected_exit
            .unwrap_or(match self.crash_type.signal_number() {
                None => ExpectedExit::Success,
                Some(signum) => ExpectedExit::Signal(signum),
            })
    }
}

/// Result of setting up test fixtures.
pub struct TestFixtures {
    pub output_dir: PathBuf,
    #[allow(dead_code)]
    tmpdir: tempfile::TempDir,
}

impl TestFixtures {
    pub fn new() -> Result<Self> {
        let tmpdir = tempfile::TempDir::new().context("Failed to create temporary directory")?;
        Ok(Self {
            output_dir: tmpdir.path().to_path_buf(),
            tmpdir,
        })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        extend_path(&self.output_dir, file)
    }
}

fn extend_path(dir: &Path, file: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    path.push(file);
    path
}

/// What a finished test binary left behind.
#[derive(Debug)]
pub struct CrashRun {
    pub exit_status: process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Wall clock bounds of the run, in seconds since the epoch.
    pub started_at: i64,
    pub finished_at: i64,
}

/// Standard artifacts used in failure signal handler tests.
pub struct StandardArtifacts {
    pub failure_signal_bin: ArtifactsBuild,
}

impl StandardArtifacts {
    pub fn new(profile: BuildProfile) -> Self {
        Self {
            failure_signal_bin: ArtifactsBuild {
                name: "failure_signal_bin_test".to_owned(),
                build_profile: profile,
                artifact_type: ArtifactType::Bin,
            },
        }
    }

    pub fn as_slice(&self) -> Vec<&ArtifactsBuild> {
        vec![&self.failure_signal_bin]
    }
}

fn unix_now() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

/// Generic crash test runner that handles common test logic.
///
/// This function:
/// 1. Builds the test binary and sets up test fixtures
/// 2. Spawns the test process with piped outputs
/// 3. Sends `SIGTERM` once the process reports it is ready, for [`CrashType::WaitForKill`]
/// 4. Waits for the process to terminate and validates how it did
/// 5. Calls the provided validator for custom validation
pub fn run_crash_test<F>(config: &CrashTestConfig, validator: F) -> Result<()>
where
    F: FnOnce(&CrashRun, &TestFixtures) -> Result<()>,
{
    let artifacts = StandardArtifacts::new(config.profile);
    let artifacts_map = build_artifacts(&artifacts.as_slice())?;
    let fixtures = TestFixtures::new()?;

    let started_at = unix_now()?;
    let mut child = process::Command::new(&artifacts_map[&artifacts.failure_signal_bin])
        .arg(&fixtures.output_dir)
        .arg(config.mode.as_str())
        .arg(config.crash_type.as_str())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to spawn test process")?;

    let mut stdout = String::new();
    if config.crash_type == CrashType::WaitForKill {
        let pipe = child.stdout.take().context("stdout was not captured")?;
        let mut reader = BufReader::new(pipe);
        reader.read_line(&mut stdout)?;
        anyhow::ensure!(
            stdout.trim_end() == READY_MESSAGE,
            "Test process never became ready, got {stdout:?}"
        );
        signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM)?;
        reader.read_to_string(&mut stdout)?;
    }

    let output = crate::timeit!("exit after signal", { child.wait_with_output()? });
    stdout.push_str(&String::from_utf8_lossy(&output.stdout));
    let run = CrashRun {
        exit_status: output.status,
        stdout,
        stderr: String::from_utf8(output.stderr).context("stderr is not utf-8")?,
        started_at,
        finished_at: unix_now()?,
    };

    assert_exit_status(&run, config.expected_exit())?;
    validator(&run, &fixtures)
}

/// Validates the process exit status matches expectations.
pub fn assert_exit_status(run: &CrashRun, expected: ExpectedExit) -> Result<()> {
    let status = run.exit_status;
    let matches = match expected {
        ExpectedExit::Success => status.success(),
        ExpectedExit::Signal(signum) => status.signal() == Some(signum),
        ExpectedExit::Code(code) => status.code() == Some(code),
    };
    anyhow::ensure!(
        matches,
        "Exit status mismatch: expected {:?}, got code {:?} signal {:?}\nstderr:\n{}",
        expected,
        status.code(),
        status.signal(),
        run.stderr
    );
    Ok(())
}
