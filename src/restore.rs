//! Restore engine.
//!
//! The archive argument may name an archive file, a directory of archives
//! (the newest one is restored) or either of those on a remote host in
//! `user@host:path` form. Remote archives are fetched into staging first.
//! Nothing is extracted before [`verify`](crate::verify::verify) passes.

use crate::archive::Archiver;
use crate::destination::{self, Destination, RemoteTarget};
use crate::error::{BackupError, Result};
use crate::fs_util;
use crate::human::format_size;
use crate::logger::SessionLog;
use crate::remote;
use crate::retention;
use crate::session::{self, Context};
use crate::verify::{self, VerifiedArchive};
use std::path::{Path, PathBuf};

/// Result of a completed restore.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// Archive that was restored, as given or as resolved from a directory.
    pub archive: String,
    pub destination: PathBuf,
    pub entries: usize,
    pub archive_bytes: u64,
}

/// Restores `archive` into `destination`.
///
/// Returns `Ok(None)` when `archive` is a directory without any archives.
pub fn restore(
    ctx: &Context<'_>,
    archive: &str,
    destination: &Path,
    log: &mut SessionLog,
) -> Result<Option<RestoreReport>> {
    match Destination::parse(archive, ctx.config.remote_port) {
        Destination::Local(path) => restore_local(ctx, &path, destination, log),
        Destination::Remote(target) => restore_remote(ctx, &target, destination, log),
    }
}

fn restore_local(
    ctx: &Context<'_>,
    path: &Path,
    destination: &Path,
    log: &mut SessionLog,
) -> Result<Option<RestoreReport>> {
    let archiver = ctx.tools.archiver;
    let archive = if path.is_dir() {
        let newest = retention::local_archives(path, archiver.extension())
            .map_err(|_| not_found(path.display()))?
            .into_iter()
            .next();
        match newest {
            Some(name) => {
                let file = path.join(name.to_string());
                log.info(format!("Latest archive in {}: {name}", path.display()));
                file
            }
            None => {
                log.info(format!(
                    "No archives in {}, nothing to restore",
                    path.display()
                ));
                return Ok(None);
            }
        }
    } else if path.is_file() {
        path.to_path_buf()
    } else {
        return Err(not_found(path.display()));
    };

    prepare_destination(destination)?;
    let verified = verify_for_restore(archiver, &archive, log)?;
    extract(archiver, verified, destination, log).map(Some)
}

fn restore_remote(
    ctx: &Context<'_>,
    target: &RemoteTarget,
    destination: &Path,
    log: &mut SessionLog,
) -> Result<Option<RestoreReport>> {
    let tools = ctx.tools;
    destination::check_connectivity(target, ctx.config, tools.probe, log)?;

    let remote_path = if remote::file_exists(tools.remote, target, &target.path) {
        target.path.clone()
    } else {
        let extension = tools.archiver.extension();
        let archives = retention::remote_archives(tools.remote, target, extension)
            .map_err(|_| not_found(target))?;
        match archives.first() {
            Some(name) => {
                log.info(format!("Latest archive in {target}: {name}"));
                target.join(&name.to_string())
            }
            None => {
                log.info(format!("No archives in {target}, nothing to restore"));
                return Ok(None);
            }
        }
    };

    prepare_destination(destination)?;
    let staging = session::staging_dir(ctx.config)?;
    let file_name = remote_path
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("archive");
    let local = staging.path().join(file_name);
    log.info(format!("Fetching {}:{remote_path}", target.login()));
    tools
        .transport
        .download(target, &remote_path, &local)
        .map_err(|source| BackupError::TransferFailure {
            target: target.to_string(),
            source,
        })?;

    let verified = verify_for_restore(tools.archiver, &local, log)?;
    let mut report = extract(tools.archiver, verified, destination, log)?;
    report.archive = format!("{}:{remote_path}", target.login());
    Ok(Some(report))
}

fn not_found(path: impl std::fmt::Display) -> BackupError {
    BackupError::ArchiveNotFound {
        path: path.to_string(),
    }
}

fn prepare_destination(destination: &Path) -> Result<()> {
    fs_util::ensure_writable_dir(destination).map_err(|source| {
        BackupError::DestinationUnwritable {
            path: destination.to_path_buf(),
            source,
        }
    })
}

fn verify_for_restore(
    archiver: &dyn Archiver,
    archive: &Path,
    log: &mut SessionLog,
) -> Result<VerifiedArchive> {
    let verified = verify::verify(archiver, archive)?;
    log.info(format!(
        "Archive {} verified ({}, {} entries)",
        archive.display(),
        format_size(verified.size()),
        verified.entries()
    ));
    Ok(verified)
}

/// Unpacks a verified archive. Existing files in `destination` are kept
/// unless the archive holds a file with the same path.
fn extract(
    archiver: &dyn Archiver,
    archive: VerifiedArchive,
    destination: &Path,
    log: &mut SessionLog,
) -> Result<RestoreReport> {
    archiver
        .extract(archive.path(), destination)
        .map_err(|source| BackupError::ExtractionFailure {
            destination: destination.to_path_buf(),
            source,
        })?;
    log.info(format!(
        "Extracted {} into {}",
        archive.file_name(),
        destination.display()
    ));
    Ok(RestoreReport {
        archive: archive.path().display().to_string(),
        destination: destination.to_path_buf(),
        entries: archive.entries(),
        archive_bytes: archive.size(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TarGzArchiver;
    use crate::config::Config;
    use crate::logger::SessionKind;
    use crate::remote::fake::FakeRemote;
    use crate::session::Toolkit;
    use std::fs;

    fn make_archive(dir: &Path, name: &str) -> PathBuf {
        let source = dir.join("docs");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("note.txt"), name.as_bytes()).unwrap();
        let archive = dir.join(name);
        TarGzArchiver.create(&source, &archive, None).unwrap();
        archive
    }

    fn config(dir: &Path) -> Config {
        Config {
            staging_dir: Some(dir.join("staging")),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_archive_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let remote = FakeRemote::new();
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let dest = dir.path().join("restore-here");
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let missing = dir.path().join("backup-2026-01-01-000000.tar.gz");
        let err = restore(&ctx, missing.to_str().unwrap(), &dest, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveNotFound { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_corrupt_archive_is_not_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(dir.path(), "backup-2026-01-01-000000.tar.gz");
        let bytes = fs::read(&archive).unwrap();
        fs::write(&archive, &bytes[..bytes.len() - 10]).unwrap();
        let config = config(dir.path());
        let remote = FakeRemote::new();
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let dest = dir.path().join("out");
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let err = restore(&ctx, archive.to_str().unwrap(), &dest, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveIntegrityFailure { .. }));
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_directory_restores_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store");
        fs::create_dir_all(&store).unwrap();
        make_archive(&store, "backup-2026-01-01-000000.tar.gz");
        make_archive(&store, "backup-2026-02-01-000000.tar.gz");
        let config = config(dir.path());
        let remote = FakeRemote::new();
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let dest = dir.path().join("out");
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let report = restore(&ctx, store.to_str().unwrap(), &dest, &mut log)
            .unwrap()
            .unwrap();
        assert!(report.archive.ends_with("backup-2026-02-01-000000.tar.gz"));
        assert_eq!(
            fs::read_to_string(dest.join("docs").join("note.txt")).unwrap(),
            "backup-2026-02-01-000000.tar.gz"
        );
    }

    #[test]
    fn test_empty_directory_is_nothing_to_restore() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let remote = FakeRemote::new();
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        let dest = dir.path().join("out");
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let report = restore(&ctx, empty.to_str().unwrap(), &dest, &mut log).unwrap();
        assert!(report.is_none());
        assert!(!dest.exists());
    }

    #[test]
    fn test_restore_is_additive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(dir.path(), "backup-2026-01-01-000000.tar.gz");
        let config = config(dir.path());
        let remote = FakeRemote::new();
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), b"mine").unwrap();
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        restore(&ctx, archive.to_str().unwrap(), &dest, &mut log).unwrap();
        assert_eq!(fs::read(dest.join("keep.txt")).unwrap(), b"mine");
        assert!(dest.join("docs").join("note.txt").exists());
    }

    #[test]
    fn test_remote_archive_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_archive(dir.path(), "backup-2026-01-01-000000.tar.gz");
        let remote = FakeRemote::new();
        remote.put_file(
            "/srv/backups/backup-2026-01-01-000000.tar.gz",
            &fs::read(&archive).unwrap(),
        );
        let config = config(dir.path());
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let dest = dir.path().join("out");
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let report = restore(
            &ctx,
            "bk@nas:/srv/backups/backup-2026-01-01-000000.tar.gz",
            &dest,
            &mut log,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            report.archive,
            "bk@nas:/srv/backups/backup-2026-01-01-000000.tar.gz"
        );
        assert!(dest.join("docs").join("note.txt").exists());
    }

    #[test]
    fn test_remote_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FakeRemote::new();
        let config = config(dir.path());
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let dest = dir.path().join("out");
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let err = restore(&ctx, "bk@nas:/srv/none.tar.gz", &dest, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveNotFound { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_remote_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FakeRemote::unreachable();
        let config = config(dir.path());
        let ctx = Context {
            config: &config,
            tools: Toolkit::new(&TarGzArchiver, &remote),
            progress: None,
        };
        let mut log = SessionLog::in_memory(SessionKind::Restore);

        let err = restore(&ctx, "bk@nas:/srv/backups", &dir.path().join("out"), &mut log)
            .unwrap_err();
        assert!(matches!(err, BackupError::ConnectivityFailure { .. }));
    }
}
