// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::stat::{Mode, umask};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::config::OUTPUT_FILE_MODE;
use crate::error::SpawnError;
use crate::spec::ProgramSpec;

/// Fork and exec one instance of `spec`.
///
/// The child's environment is exactly the configured pairs. It also gets the
/// configured umask and working directory, stdin from /dev/null,
/// and stdout/stderr appended to the configured files (discarded otherwise).
pub fn spawn(spec: &ProgramSpec) -> Result<Child, SpawnError> {
    let Some((program, args)) = spec.command.split_first() else {
        return Err(SpawnError::Exec {
            command: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args);

    cmd.env_clear();
    for pair in &spec.environment {
        if let Some((key, value)) = pair.split_once('=') {
            cmd.env(key, value);
        }
    }

    if let Some(ref dir) = spec.working_directory {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(output(spec.stdout_path.as_deref())?);
    cmd.stderr(output(spec.stderr_path.as_deref())?);

    let mask = Mode::from_bits_truncate(spec.umask as nix::libc::mode_t);
    // SAFETY: umask(2) is async-signal-safe and the closure touches no shared state.
    unsafe {
        cmd.pre_exec(move || {
            umask(mask);
            Ok(())
        });
    }

    cmd.spawn().map_err(|e| classify_spawn_error(spec, e))
}

/// EAGAIN/ENOMEM come from fork itself; anything else was reported by the
/// child before or during exec.
fn classify_spawn_error(spec: &ProgramSpec, e: io::Error) -> SpawnError {
    match e.raw_os_error() {
        Some(code) if code == Errno::EAGAIN as i32 || code == Errno::ENOMEM as i32 => {
            SpawnError::Fork(e)
        }
        _ => SpawnError::Exec {
            command: spec.command_line(),
            source: e,
        },
    }
}

fn output(path: Option<&Path>) -> Result<Stdio, SpawnError> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(OUTPUT_FILE_MODE)
        .open(path)
        .map_err(|source| SpawnError::Output {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Stdio::from(file))
}

pub fn send_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    signal::kill(Pid::from_raw(pid as i32), sig)
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
    /// The child was never observed exiting (lost or abandoned).
    Unknown,
}

impl ExitKind {
    /// Only a normal exit with a listed code is expected.
    pub fn is_expected(self, spec: &ProgramSpec) -> bool {
        match self {
            ExitKind::Code(code) => spec.is_expected_exit(code),
            _ => false,
        }
    }
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitKind::Code(code)
        } else if let Some(sig) = status.signal() {
            ExitKind::Signal(sig)
        } else {
            ExitKind::Unknown
        }
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(sig) => match Signal::try_from(*sig) {
                Ok(s) => write!(f, "killed by signal {}", s.as_str()),
                Err(_) => write!(f, "killed by signal {sig}"),
            },
            ExitKind::Unknown => write!(f, "unknown exit status"),
        }
    }
}
