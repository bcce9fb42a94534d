//! Session log.
//!
//! Each session appends `<timestamp> [<LEVEL>] <message>` lines to one file
//! per calendar day and operation kind, and echoes them to stdout. The last
//! record of every session is an INFO-level `NOTIFY:` line carrying the
//! outcome, which external alerting and log-commit tools key on.

use chrono::{DateTime, Local, NaiveDate};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind of session, which selects the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Backup,
    Restore,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Backup => "backup",
            SessionKind::Restore => "restore",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => f.write_str("INFO"),
            Level::Warn => f.write_str("WARN"),
            Level::Error => f.write_str("ERROR"),
        }
    }
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level,
            self.message
        )
    }
}

/// Deterministic log file path for one kind of session on one day.
pub fn log_file_path(log_dir: &Path, kind: SessionKind, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{}-{}.log", kind, date.format("%Y-%m-%d")))
}

/// Append-only log sink for a single session.
#[derive(Debug)]
pub struct SessionLog {
    kind: SessionKind,
    path: Option<PathBuf>,
    file: Option<File>,
    echo: bool,
    records: Vec<LogRecord>,
}

impl SessionLog {
    /// Opens today's log file for `kind` under `log_dir`, echoing to stdout.
    ///
    /// If the file cannot be opened the session still runs with stdout only.
    pub fn open(log_dir: &Path, kind: SessionKind) -> Self {
        let path = log_file_path(log_dir, kind, Local::now().date_naive());
        let file = fs::create_dir_all(log_dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        let file = match file {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("cannot open log file {}: {e}", path.display());
                None
            }
        };
        Self {
            kind,
            path: Some(path),
            file,
            echo: true,
            records: Vec::new(),
        }
    }

    /// A log that only keeps records in memory.
    pub fn in_memory(kind: SessionKind) -> Self {
        Self {
            kind,
            path: None,
            file: None,
            echo: false,
            records: Vec::new(),
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Path of the per-day file, if this log writes one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn info<S: Into<String>>(&mut self, message: S) {
        self.record(Level::Info, message.into());
    }

    pub fn warn<S: Into<String>>(&mut self, message: S) {
        self.record(Level::Warn, message.into());
    }

    pub fn error<S: Into<String>>(&mut self, message: S) {
        self.record(Level::Error, message.into());
    }

    /// Records the session outcome. This is the last record of a session.
    pub fn notify(&mut self, outcome: Outcome, detail: &str) {
        let status = match outcome {
            Outcome::Success => "SUCCESS",
            Outcome::Failure => "FAILURE",
        };
        let message = format!("NOTIFY: {} {status}: {detail}", self.kind);
        self.record(Level::Info, message);
    }

    fn record(&mut self, level: Level, message: String) {
        let record = LogRecord {
            timestamp: Local::now(),
            level,
            message,
        };
        let line = record.to_string();
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!("cannot append to session log: {e}");
            }
        }
        if self.echo {
            println!("{line}");
        }
        self.records.push(record);
    }
}
