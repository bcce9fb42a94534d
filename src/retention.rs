//! Retention manager.
//!
//! Keeps the newest `retention` archives at a destination and deletes the
//! rest. Every failure here is logged as a warning and never fails the
//! session.

use crate::archive::ArchiveName;
use crate::destination::RemoteTarget;
use crate::logger::SessionLog;
use crate::remote::{self, RemoteError, RemoteExec};
use std::fs;
use std::io;
use std::path::Path;

/// What a retention pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Number of archives found.
    pub found: usize,
    /// Archive names deleted.
    pub deleted: Vec<String>,
    /// Archive names whose deletion failed.
    pub failed: Vec<String>,
}

impl RetentionReport {
    pub fn remaining(&self) -> usize {
        self.found - self.deleted.len()
    }
}

/// Archive names among `names`, newest first.
///
/// Names that do not follow the archive naming pattern or carry another
/// extension are ignored.
pub fn newest_first<I, S>(names: I, extension: &str) -> Vec<ArchiveName>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut archives: Vec<ArchiveName> = names
        .into_iter()
        .filter_map(|name| ArchiveName::parse(name.as_ref()))
        .filter(|name| name.extension() == extension)
        .collect();
    archives.sort_by(|a, b| b.cmp(a));
    archives
}

/// Archives beyond the newest `keep`, newest first.
pub fn select_expired<I, S>(names: I, extension: &str, keep: usize) -> Vec<ArchiveName>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut archives = newest_first(names, extension);
    if archives.len() <= keep {
        return Vec::new();
    }
    archives.split_off(keep)
}

/// Applies retention to a local destination directory.
pub fn apply_local(
    dir: &Path,
    extension: &str,
    keep: usize,
    log: &mut SessionLog,
) -> RetentionReport {
    let mut report = RetentionReport::default();
    let names = match read_file_names(dir) {
        Ok(names) => names,
        Err(e) => {
            log.warn(format!(
                "Retention skipped: cannot list {}: {e}",
                dir.display()
            ));
            return report;
        }
    };
    report.found = newest_first(&names, extension).len();

    for archive in select_expired(&names, extension, keep) {
        let name = archive.to_string();
        match fs::remove_file(dir.join(&name)) {
            Ok(()) => {
                log.info(format!("Deleted old archive {name}"));
                report.deleted.push(name);
            }
            Err(e) => {
                log.warn(format!("Failed to delete old archive {name}: {e}"));
                report.failed.push(name);
            }
        }
    }
    log_summary(log, &report, keep);
    report
}

/// Applies retention on a remote host: one listing, then one deletion.
pub fn apply_remote(
    remote: &dyn RemoteExec,
    target: &RemoteTarget,
    extension: &str,
    keep: usize,
    log: &mut SessionLog,
) -> RetentionReport {
    let mut report = RetentionReport::default();
    let names = match remote::list_dir(remote, target, &target.path) {
        Ok(names) => names,
        Err(e) => {
            log.warn(format!("Retention skipped: cannot list {target}: {e}"));
            return report;
        }
    };
    report.found = newest_first(&names, extension).len();

    let expired: Vec<String> = select_expired(&names, extension, keep)
        .iter()
        .map(ArchiveName::to_string)
        .collect();
    let paths: Vec<String> = expired.iter().map(|name| target.join(name)).collect();
    match remote::remove_files(remote, target, &paths) {
        Ok(()) => {
            for name in &expired {
                log.info(format!("Deleted old remote archive {name}"));
            }
            report.deleted = expired;
        }
        Err(e) => {
            log.warn(format!(
                "Failed to delete {} old remote archive(s) on {target}: {e}",
                expired.len()
            ));
            report.failed = expired;
        }
    }
    log_summary(log, &report, keep);
    report
}

fn log_summary(log: &mut SessionLog, report: &RetentionReport, keep: usize) {
    log.info(format!(
        "Retention: keeping {keep}, found {}, deleted {}",
        report.found,
        report.deleted.len()
    ));
}

/// Archives in a local directory, newest first.
pub fn local_archives(dir: &Path, extension: &str) -> io::Result<Vec<ArchiveName>> {
    Ok(newest_first(read_file_names(dir)?, extension))
}

/// Archives in a remote directory, newest first.
pub fn remote_archives(
    remote: &dyn RemoteExec,
    target: &RemoteTarget,
    extension: &str,
) -> Result<Vec<ArchiveName>, RemoteError> {
    Ok(newest_first(remote::list_dir(remote, target, &target.path)?, extension))
}

fn read_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}
