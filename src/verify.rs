//! Integrity verification.
//!
//! [`VerifiedArchive`] can only be obtained from [`verify`], and placement
//! and extraction consume one, so an archive that has not passed both checks
//! in the current session cannot be transferred or unpacked.

use crate::archive::Archiver;
use crate::error::{BackupError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// An archive that passed the stream and listing checks.
#[derive(Debug)]
pub struct VerifiedArchive {
    path: PathBuf,
    size: u64,
    entries: usize,
}

impl VerifiedArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of entries in the container listing.
    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The same archive after a move that did not touch its bytes.
    pub(crate) fn relocated(self, path: PathBuf) -> Self {
        Self { path, ..self }
    }
}

/// Runs both integrity checks against `path`.
///
/// The stream check decompresses everything and fails on a checksum or
/// length mismatch; the listing check walks every container entry.
pub fn verify(archiver: &dyn Archiver, path: &Path) -> Result<VerifiedArchive> {
    let size = fs::metadata(path)
        .map_err(|e| BackupError::integrity(path, format!("cannot stat archive: {e}")))?
        .len();

    archiver
        .check_stream(path)
        .map_err(|e| BackupError::integrity(path, format!("compressed stream is corrupt: {e}")))?;

    let entries = archiver
        .list_entries(path)
        .map_err(|e| BackupError::integrity(path, format!("cannot list contents: {e}")))?;
    tracing::debug!("{} holds {} entries", path.display(), entries.len());

    Ok(VerifiedArchive {
        path: path.to_path_buf(),
        size,
        entries: entries.len(),
    })
}
