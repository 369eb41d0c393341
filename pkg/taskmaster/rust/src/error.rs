// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("program '{program}': {field}: {reason}")]
    Invalid {
        program: String,
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(program: &str, field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            program: program.to_string(),
            field,
            reason: reason.into(),
        }
    }
}

/// Operator input errors. None of them changes supervisor state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty line")]
    EmptyLine,
    #[error("command not found")]
    NotFound,
    #[error("too many arguments")]
    TooManyArguments,
    #[error("argument missing")]
    ArgumentMissing,
    #[error("bad argument: {0}")]
    BadArgument(String),
}

#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to create a new process.
    #[error("cannot create process: {0}")]
    Fork(#[source] io::Error),
    #[error("cannot execute {command}: {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot open {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// Fork failures end the run cycle; everything else counts as a failed start.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SpawnError::Fork(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown program: {0}")]
    UnknownProgram(String),
    #[error("program already registered: {0}")]
    DuplicateProgram(String),
    #[error("event queue closed")]
    QueueClosed,
}

/// Anything the interactive shell reports to the operator.
#[derive(Error, Debug)]
pub enum ShellError {
    #[error("command error: {0}")]
    Command(#[from] CommandError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Dispatch(#[from] DispatchError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
