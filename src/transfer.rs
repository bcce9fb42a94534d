//! Placement of verified archives at their destination.

use crate::destination::RemoteTarget;
use crate::error::{BackupError, Result};
use crate::human::{format_ratio, format_size};
use crate::logger::SessionLog;
use crate::remote::{self, RemoteExec, SecureTransport};
use crate::verify::VerifiedArchive;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Logs archive size and compression ratio against the source size.
pub fn log_metrics(archive: &VerifiedArchive, source_bytes: u64, log: &mut SessionLog) {
    log.info(format!(
        "Archive size: {} ({} bytes)",
        format_size(archive.size()),
        archive.size()
    ));
    log.info(format!(
        "Compression ratio: {}",
        format_ratio(archive.size(), source_bytes)
    ));
}

/// Moves a verified archive into a local destination directory.
///
/// The final name only appears once the archive is complete. An archive
/// already at that name is never replaced.
pub fn place_local(
    archive: VerifiedArchive,
    dest_dir: &Path,
    log: &mut SessionLog,
) -> Result<VerifiedArchive> {
    let final_path = dest_dir.join(archive.file_name());
    let placed = match final_path.try_exists() {
        Ok(true) => Err(already_exists()),
        Ok(false) => move_file(archive.path(), &final_path),
        Err(e) => Err(e),
    };
    placed.map_err(|e| BackupError::PlacementFailure {
        destination: final_path.clone(),
        source: e,
    })?;
    log.info(format!("Archive placed at {}", final_path.display()));
    Ok(archive.relocated(final_path))
}

fn already_exists() -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        "an archive with this name is already in place",
    )
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!("rename across filesystems, copying {}", from.display());
            copy_then_rename(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Copies `from` to a hidden partial file beside `to`, then renames it.
fn copy_then_rename(from: &Path, to: &Path) -> io::Result<()> {
    let partial = partial_path(to);
    let result = fs::copy(from, &partial)
        .and_then(|_| fs::File::open(&partial)?.sync_all())
        .and_then(|_| fs::rename(&partial, to));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn partial_path(to: &Path) -> PathBuf {
    let name = to
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    to.with_file_name(format!(".{name}.partial"))
}

/// Copies a verified archive to a remote directory and returns its remote path.
///
/// The local copy is removed whether or not the transfer succeeded. An
/// archive already at the remote name is never replaced.
pub fn place_remote(
    transport: &dyn SecureTransport,
    exec: &dyn RemoteExec,
    archive: VerifiedArchive,
    target: &RemoteTarget,
    log: &mut SessionLog,
) -> Result<String> {
    let remote_path = target.join(&archive.file_name());
    let collision = remote::file_exists(exec, target, &remote_path);
    let result = if collision {
        Ok(())
    } else {
        log.info(format!("Copying archive to {}:{remote_path}", target.login()));
        transport.upload(archive.path(), target, &remote_path)
    };

    if let Err(e) = fs::remove_file(archive.path()) {
        log.warn(format!(
            "Failed to remove local temporary archive {}: {e}",
            archive.path().display()
        ));
    }

    if collision {
        return Err(BackupError::PlacementFailure {
            destination: PathBuf::from(target.with_path(remote_path).to_string()),
            source: already_exists(),
        });
    }
    result.map_err(|source| BackupError::TransferFailure {
        target: target.to_string(),
        source,
    })?;
    log.info(format!("Archive copied to {}:{remote_path}", target.login()));
    Ok(remote_path)
}
