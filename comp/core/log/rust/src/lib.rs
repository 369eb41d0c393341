// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process-wide, append-only log sink for the `log` facade.
//!
//! Every record becomes one line:
//!
//! ```text
//! 2026-03-02, 14:07:55 - [         launcher] - [sleeper:0] launched (pid=4242)
//! ```
//!
//! The component column is the record target (last `::` segment), right
//! aligned on 17 columns. The file is opened in append mode and is never
//! truncated or rotated by the sink.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const COMPONENT_WIDTH: usize = 17;

/// Appends formatted records to a single file. All writers share one lock.
pub struct FileLogger {
    level: LevelFilter,
    offset: UtcOffset,
    file: Mutex<File>,
}

impl FileLogger {
    /// Open (or create) `path` for appending.
    ///
    /// The local UTC offset is resolved here, once. On unix this only succeeds
    /// while the process is still single threaded, so open the sink before
    /// starting any runtime; UTC is used otherwise.
    pub fn open(path: &Path, level: LevelFilter) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Ok(Self {
            level,
            offset,
            file: Mutex::new(file),
        })
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(self.now(), record.target(), record.args());
        // A poisoned lock only means another writer panicked mid-line; keep logging.
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = file.write_all(line.as_bytes());
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Render one log line, newline included.
pub fn format_line(now: OffsetDateTime, target: &str, message: &fmt::Arguments<'_>) -> String {
    let component = target.rsplit("::").next().unwrap_or(target);
    format!(
        "{} - [{component:>width$}] - {message}\n",
        timestamp(now),
        width = COMPONENT_WIDTH
    )
}

fn timestamp(now: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day], [hour]:[minute]:[second]");
    now.format(format).unwrap_or_default()
}

#[derive(Debug)]
pub enum InitError {
    Open(io::Error),
    AlreadyInstalled(SetLoggerError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Open(e) => write!(f, "cannot open log file: {e}"),
            InitError::AlreadyInstalled(e) => write!(f, "logger already installed: {e}"),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Open(e) => Some(e),
            InitError::AlreadyInstalled(e) => Some(e),
        }
    }
}

/// Install a [`FileLogger`] writing to `path` as the global logger.
pub fn init(path: &Path, level: LevelFilter) -> Result<(), InitError> {
    let logger = FileLogger::open(path, level).map_err(InitError::Open)?;
    log::set_boxed_logger(Box::new(logger)).map_err(InitError::AlreadyInstalled)?;
    log::set_max_level(level);
    Ok(())
}
