//! Backup and restore sessions.
//!
//! A session runs its steps in order and stops at the first fatal error.
//! [`conclude`] turns the result into the terminal log records and the
//! process exit status.

use crate::archive::{self, Archiver, ProgressCallback, TarGzArchiver};
use crate::config::Config;
use crate::destination::{self, Destination};
use crate::error::{BackupError, Result};
use crate::logger::{Outcome, SessionLog};
use crate::remote::{ConnectivityProbe, OpenSsh, RemoteExec, SecureTransport};
use crate::restore::{self, RestoreReport};
use crate::retention::{self, RetentionReport};
use crate::sysexits;
use crate::transfer;
use crate::verify;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// The capabilities a session runs with.
#[derive(Clone, Copy)]
pub struct Toolkit<'a> {
    pub archiver: &'a dyn Archiver,
    pub probe: &'a dyn ConnectivityProbe,
    pub transport: &'a dyn SecureTransport,
    pub remote: &'a dyn RemoteExec,
}

impl<'a> Toolkit<'a> {
    /// Uses one value for every remote capability.
    pub fn new<R>(archiver: &'a dyn Archiver, remote: &'a R) -> Self
    where
        R: ConnectivityProbe + SecureTransport + RemoteExec,
    {
        Self {
            archiver,
            probe: remote,
            transport: remote,
            remote,
        }
    }
}

/// Production capabilities: tar.gz archives and the system OpenSSH client.
pub struct SystemTools {
    archiver: TarGzArchiver,
    ssh: OpenSsh,
}

impl SystemTools {
    pub fn new(config: &Config) -> Self {
        Self {
            archiver: TarGzArchiver,
            ssh: OpenSsh::new(config.connect_timeout()),
        }
    }

    pub fn toolkit(&self) -> Toolkit<'_> {
        Toolkit::new(&self.archiver, &self.ssh)
    }
}

/// Everything a session reads but never changes.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub config: &'a Config,
    pub tools: Toolkit<'a>,
    pub progress: Option<&'a dyn ProgressCallback>,
}

/// Result of a successful backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    /// Final location of the archive, local path or `user@host:path`.
    pub location: String,
    pub source_bytes: u64,
    pub archive_bytes: u64,
    pub retention: RetentionReport,
}

/// Creates a private staging directory below the configured staging root.
///
/// The directory and anything left in it are removed on drop.
pub fn staging_dir(config: &Config) -> Result<TempDir> {
    let root = config.staging_root();
    fs::create_dir_all(&root)
        .and_then(|_| {
            tempfile::Builder::new()
                .prefix(".rbackup-staging-")
                .tempdir_in(&root)
        })
        .map_err(|source| BackupError::Staging { path: root, source })
}

/// Runs a backup of `source` to `destination`.
///
/// Destination checks, including the remote connectivity probe, all happen
/// before the archive is created.
pub fn run_backup(
    ctx: &Context<'_>,
    source: &Path,
    destination: &str,
    log: &mut SessionLog,
) -> Result<BackupReport> {
    let config = ctx.config;
    let tools = ctx.tools;
    log.info(format!(
        "Starting backup of {} to {destination}",
        source.display()
    ));

    archive::validate_source(source)?;
    let dest = Destination::parse(destination, config.remote_port);
    match &dest {
        Destination::Local(dir) => destination::prepare_local(dir, config, log)?,
        Destination::Remote(target) => {
            destination::prepare_remote(target, config, tools.probe, tools.remote, log)?
        }
    }

    let staging = staging_dir(config)?;
    let built = archive::build(
        tools.archiver,
        source,
        staging.path(),
        config,
        ctx.progress,
        log,
    )?;
    let verified = verify::verify(tools.archiver, &built.path)?;
    log.info(format!(
        "Archive {} verified ({} entries)",
        built.name,
        verified.entries()
    ));
    transfer::log_metrics(&verified, built.source_bytes, log);

    let extension = tools.archiver.extension();
    let (location, retention) = match &dest {
        Destination::Local(dir) => {
            let placed = transfer::place_local(verified, dir, log)?;
            let report = retention::apply_local(dir, extension, config.retention, log);
            (placed.path().display().to_string(), report)
        }
        Destination::Remote(target) => {
            let path =
                transfer::place_remote(tools.transport, tools.remote, verified, target, log)?;
            let report =
                retention::apply_remote(tools.remote, target, extension, config.retention, log);
            (format!("{}:{path}", target.login()), report)
        }
    };

    Ok(BackupReport {
        location,
        source_bytes: built.source_bytes,
        archive_bytes: built.archive_bytes,
        retention,
    })
}

/// Runs a restore of `archive` into `destination`.
///
/// `Ok(None)` means the archive argument named a directory holding no
/// archives, which is not an error.
pub fn run_restore(
    ctx: &Context<'_>,
    archive: &str,
    destination: &Path,
    log: &mut SessionLog,
) -> Result<Option<RestoreReport>> {
    log.info(format!(
        "Starting restore of {archive} to {}",
        destination.display()
    ));
    restore::restore(ctx, archive, destination, log)
}

/// Writes the terminal records for `result` and returns the exit status.
///
/// A failure is logged at ERROR immediately followed by a NOTIFY failure
/// record. Success writes only the NOTIFY record.
pub fn conclude<T>(
    log: &mut SessionLog,
    result: Result<T>,
    describe: impl FnOnce(&T) -> String,
) -> i32 {
    match result {
        Ok(value) => {
            let detail = describe(&value);
            log.notify(Outcome::Success, &detail);
            sysexits::EX_OK
        }
        Err(e) => {
            log.error(e.to_string());
            log.notify(Outcome::Failure, &e.to_string());
            e.exit_code()
        }
    }
}

/// One-line summary of a backup for the NOTIFY record.
pub fn describe_backup(report: &BackupReport) -> String {
    format!(
        "archive {} created ({} bytes), {} old archive(s) removed",
        report.location,
        report.archive_bytes,
        report.retention.deleted.len()
    )
}

/// One-line summary of a restore for the NOTIFY record.
pub fn describe_restore(report: &Option<RestoreReport>) -> String {
    match report {
        Some(report) => format!(
            "{} restored to {} ({} entries)",
            report.archive,
            report.destination.display(),
            report.entries
        ),
        None => "nothing to restore".to_string(),
    }
}
