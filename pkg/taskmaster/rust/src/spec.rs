// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;

/// When a child that exited on its own is launched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRestart {
    Never,
    Always,
    /// Only when the exit status is not one of the expected exit codes.
    Unexpected,
}

impl fmt::Display for AutoRestart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoRestart::Never => write!(f, "never"),
            AutoRestart::Always => write!(f, "always"),
            AutoRestart::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// A validated program declaration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub name: String,
    /// argv; never empty.
    pub command: Vec<String>,
    /// `KEY=VALUE` pairs applied in order on top of the supervisor's environment.
    pub environment: Vec<String>,
    /// `None` discards the stream.
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub expected_exit_codes: BTreeSet<i32>,
    pub numprocs: usize,
    pub umask: u32,
    pub autorestart: AutoRestart,
    /// Attempts allowed beyond the first one in a run cycle.
    pub start_retries: u32,
    pub autostart: bool,
    pub stop_signal: Signal,
    /// How long a child must stay alive to be considered started.
    pub start_time: Duration,
    /// Grace period between the stop signal and SIGKILL.
    pub stop_time: Duration,
}

impl ProgramSpec {
    /// A single-instance program with the loader's defaults.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            environment: Vec::new(),
            stdout_path: None,
            stderr_path: None,
            working_directory: None,
            expected_exit_codes: BTreeSet::from([0]),
            numprocs: 1,
            umask: 0o022,
            autorestart: AutoRestart::Unexpected,
            start_retries: 3,
            autostart: true,
            stop_signal: Signal::SIGTERM,
            start_time: Duration::from_secs(1),
            stop_time: Duration::from_secs(10),
        }
    }

    pub fn is_expected_exit(&self, code: i32) -> bool {
        self.expected_exit_codes.contains(&code)
    }

    /// Display form of the command line, used in log lines.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}
