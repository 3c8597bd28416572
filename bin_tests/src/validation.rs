// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validation helpers for failure signal handler tests.
//! This module parses the report the handler writes and provides a fluent API for asserting
//! its properties.

use crate::test_runner::CrashRun;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\*\*\* (SIG[A-Z]+|Signal \d+) received at time=(\d+) \*\*\*$")
        .unwrap_or_else(|e| panic!("invalid header regex: {e}"))
});
static FRAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^PC: @ 0x([0-9a-f]+) (.+)$")
        .unwrap_or_else(|e| panic!("invalid frame regex: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub signal: String,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ip: usize,
    pub symbol: String,
}

/// A failure report, as read back from the handler's output.
#[derive(Debug, Default)]
pub struct ParsedReport {
    pub headers: Vec<Header>,
    pub frames: Vec<Frame>,
    /// Lines that are neither headers nor frames.
    pub other_lines: Vec<String>,
}

pub fn parse_report(output: &str) -> Result<ParsedReport> {
    let mut report = ParsedReport::default();
    for line in output.lines() {
        if let Some(caps) = HEADER_RE.captures(line) {
            report.headers.push(Header {
                signal: caps[1].to_owned(),
                time: caps[2].parse().context("parsing header time")?,
            });
        } else if let Some(caps) = FRAME_RE.captures(line) {
            report.frames.push(Frame {
                ip: usize::from_str_radix(&caps[1], 16).context("parsing frame address")?,
                symbol: caps[2].to_owned(),
            });
        } else {
            report.other_lines.push(line.to_owned());
        }
    }
    Ok(report)
}

/// Validates that stdout/stderr are empty, as they are when no failure signal was taken.
pub fn validate_no_report(run: &CrashRun) -> Result<()> {
    anyhow::ensure!(run.stderr.is_empty(), "Unexpected stderr: {:?}", run.stderr);
    anyhow::ensure!(run.stdout.is_empty(), "Unexpected stdout: {:?}", run.stdout);
    Ok(())
}

/// A fluent API for validating crash reports.
/// Allows chaining multiple validations together.
///
/// # Example
/// ```ignore
/// ReportValidator::new(&run)?
///     .validate_single_header("SIGSEGV")?
///     .validate_frames_present()?
///     .validate_symbol_present("deref_ptr")?;
/// ```
pub struct ReportValidator<'a> {
    run: &'a CrashRun,
    report: ParsedReport,
}

impl<'a> ReportValidator<'a> {
    pub fn new(run: &'a CrashRun) -> Result<Self> {
        Ok(Self {
            run,
            report: parse_report(&run.stderr)?,
        })
    }

    pub fn report(&self) -> &ParsedReport {
        &self.report
    }

    /// Exactly one header, for `signal`, timestamped during the run. The header is the first
    /// thing the handler writes.
    pub fn validate_single_header(self, signal: &str) -> Result<Self> {
        anyhow::ensure!(
            self.report.headers.len() == 1,
            "Expected exactly one header, got {:?}\nstderr:\n{}",
            self.report.headers,
            self.run.stderr
        );
        let header = &self.report.headers[0];
        anyhow::ensure!(
            header.signal == signal,
            "Expected {signal}, got {}",
            header.signal
        );
        anyhow::ensure!(
            (self.run.started_at..=self.run.finished_at).contains(&header.time),
            "Header time {} outside of [{}, {}]",
            header.time,
            self.run.started_at,
            self.run.finished_at
        );
        anyhow::ensure!(
            HEADER_RE.is_match(self.run.stderr.lines().next().unwrap_or_default()),
            "The header must be the first line\nstderr:\n{}",
            self.run.stderr
        );
        Ok(self)
    }

    /// At least one frame line and no more than `max_frames`.
    pub fn validate_frames_present(self, max_frames: usize) -> Result<Self> {
        let count = self.report.frames.len();
        anyhow::ensure!(
            (1..=max_frames).contains(&count),
            "Expected between 1 and {max_frames} frames, got {count}\nstderr:\n{}",
            self.run.stderr
        );
        anyhow::ensure!(
            self.report.frames.iter().all(|f| f.ip != 0),
            "Frame with a null address\nstderr:\n{}",
            self.run.stderr
        );
        Ok(self)
    }

    pub fn validate_symbol_present(self, needle: &str) -> Result<Self> {
        anyhow::ensure!(
            self.report.frames.iter().any(|f| f.symbol.contains(needle)),
            "No frame symbol contains {needle:?}\nstderr:\n{}",
            self.run.stderr
        );
        Ok(self)
    }

    pub fn validate_symbol_absent(self, needle: &str) -> Result<Self> {
        anyhow::ensure!(
            !self.report.frames.iter().any(|f| f.symbol.contains(needle)),
            "A frame symbol contains {needle:?}\nstderr:\n{}",
            self.run.stderr
        );
        Ok(self)
    }

    /// The faulting PC is written first, so the first frame is the faulting function.
    pub fn validate_first_symbol(self, needle: &str) -> Result<Self> {
        let first = self.report.frames.first().context("No frames")?;
        anyhow::ensure!(
            first.symbol.contains(needle),
            "First frame is {first:?}, expected {needle:?}\nstderr:\n{}",
            self.run.stderr
        );
        Ok(self)
    }

    /// Nothing but the report itself was written.
    pub fn validate_only_report_lines(self) -> Result<Self> {
        anyhow::ensure!(
            self.report.other_lines.is_empty(),
            "Unexpected lines {:?}",
            self.report.other_lines
        );
        Ok(self)
    }

    pub fn validate_last_line(self, expected: &str) -> Result<Self> {
        let last = self.run.stderr.lines().last().context("Empty stderr")?;
        anyhow::ensure!(
            last == expected,
            "Expected last line {expected:?}, got {last:?}"
        );
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report() {
        let output = "*** SIGSEGV received at time=1561409570 ***\n\
                      PC: @ 0x55c3ddb5d93c bin::deref_ptr\n\
                      PC: @ 0x7faef9b7a52b (unknown)\n\
                      something else\n";
        let report = parse_report(output).unwrap();
        assert_eq!(
            report.headers,
            vec![Header {
                signal: "SIGSEGV".to_owned(),
                time: 1561409570
            }]
        );
        assert_eq!(
            report.frames,
            vec![
                Frame {
                    ip: 0x55c3ddb5d93c,
                    symbol: "bin::deref_ptr".to_owned()
                },
                Frame {
                    ip: 0x7faef9b7a52b,
                    symbol: "(unknown)".to_owned()
                },
            ]
        );
        assert_eq!(report.other_lines, vec!["something else".to_owned()]);
    }

    #[test]
    fn test_parse_unknown_signal_header() {
        let report = parse_report("*** Signal 10 received at time=7 ***\n").unwrap();
        assert_eq!(report.headers[0].signal, "Signal 10");
        assert!(report.frames.is_empty());
    }
}
