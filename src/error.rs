//! Error types for backup and restore sessions.
//!
//! Every variant of [`BackupError`] is fatal for the session that raised it.
//! Retention problems never surface here; they are logged as warnings by the
//! retention manager and do not change the session outcome.

use crate::remote::RemoteError;
use crate::sysexits;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout rbackup.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Fatal session errors.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Source directory does not exist or is not a directory
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source directory exists but cannot be listed
    #[error("Source directory is not readable: {}: {source}", path.display())]
    SourceUnreadable { path: PathBuf, source: io::Error },

    /// Archive to restore or verify does not exist
    #[error("Archive not found: {path}")]
    ArchiveNotFound { path: String },

    /// Destination directory cannot be created or written
    #[error("Destination is not writable: {}: {source}", path.display())]
    DestinationUnwritable { path: PathBuf, source: io::Error },

    /// Free space at the destination is below the configured minimum
    #[error(
        "Insufficient space at {}: {available_mb} MB available, {required_mb} MB required",
        path.display()
    )]
    InsufficientSpace {
        path: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    /// Remote host did not answer the connectivity probe
    #[error("Cannot connect to {target}: {source}")]
    ConnectivityFailure { target: String, source: RemoteError },

    /// Remote directory could not be created
    #[error("Cannot prepare remote path {target}: {source}")]
    RemotePathFailure { target: String, source: RemoteError },

    /// Writing the archive failed
    #[error("Failed to create archive {}: {source}", path.display())]
    ArchiveCreationFailure { path: PathBuf, source: io::Error },

    /// Archive failed the checksum or listing check
    #[error("Archive integrity check failed for {}: {reason}", path.display())]
    ArchiveIntegrityFailure { path: PathBuf, reason: String },

    /// Local move into the destination failed
    #[error("Failed to move archive into {}: {source}", destination.display())]
    PlacementFailure {
        destination: PathBuf,
        source: io::Error,
    },

    /// Secure copy to or from the remote host failed
    #[error("Secure copy with {target} failed: {source}")]
    TransferFailure { target: String, source: RemoteError },

    /// A verified archive could not be unpacked
    #[error("Failed to extract archive into {}: {source}", destination.display())]
    ExtractionFailure {
        destination: PathBuf,
        source: io::Error,
    },

    /// Local staging area for temporary archives is unusable
    #[error("Staging directory {} is unusable: {source}", path.display())]
    Staging { path: PathBuf, source: io::Error },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The command line could not be parsed
    #[error("Invalid arguments: {0}")]
    Usage(String),
}

impl BackupError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new integrity error
    pub fn integrity<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::ArchiveIntegrityFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SourceNotFound { .. }
            | Self::SourceUnreadable { .. }
            | Self::ArchiveNotFound { .. } => sysexits::EX_NOINPUT,
            Self::DestinationUnwritable { .. } | Self::RemotePathFailure { .. } => {
                sysexits::EX_CANTCREAT
            }
            Self::InsufficientSpace { .. }
            | Self::ArchiveCreationFailure { .. }
            | Self::PlacementFailure { .. }
            | Self::ExtractionFailure { .. } => sysexits::EX_IOERR,
            Self::ConnectivityFailure { .. } => sysexits::EX_UNAVAILABLE,
            Self::TransferFailure { .. } => sysexits::EX_TEMPFAIL,
            Self::ArchiveIntegrityFailure { .. } => sysexits::EX_DATAERR,
            Self::Staging { .. } => sysexits::EX_OSERR,
            Self::Config(_) => sysexits::EX_CONFIG,
            Self::Usage(_) => sysexits::EX_USAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display_includes_path() {
        let err = BackupError::SourceNotFound {
            path: PathBuf::from("/no/such/dir"),
        };
        assert_eq!(err.to_string(), "Source directory not found: /no/such/dir");

        let err = BackupError::InsufficientSpace {
            path: PathBuf::from("/backups"),
            available_mb: 12,
            required_mb: 500,
        };
        assert!(err.to_string().contains("12 MB available"));
        assert!(err.to_string().contains("500 MB required"));
    }

    #[test]
    fn test_exit_codes_are_non_zero() {
        let errors = vec![
            BackupError::ArchiveNotFound {
                path: "x.tar.gz".into(),
            },
            BackupError::integrity("x.tar.gz", "bad crc"),
            BackupError::ConnectivityFailure {
                target: "bk@host".into(),
                source: RemoteError::Timeout(Duration::from_secs(5)),
            },
            BackupError::config("retention must be at least 1"),
            BackupError::Usage("missing destination".into()),
        ];
        for err in errors {
            assert_ne!(err.exit_code(), 0, "{err}");
        }
    }

    #[test]
    fn test_integrity_and_extraction_are_distinct() {
        let integrity = BackupError::integrity("a.tar.gz", "listing failed");
        let extraction = BackupError::ExtractionFailure {
            destination: PathBuf::from("/restore"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_ne!(integrity.exit_code(), extraction.exit_code());
        assert!(integrity.to_string().contains("integrity"));
        assert!(extraction.to_string().contains("extract"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BackupError>();
    }
}
