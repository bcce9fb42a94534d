//! Archive engine.
//!
//! Archives are gzip-compressed tarballs named after their creation time,
//! `backup-YYYY-MM-DD-HHMMSS.tar.gz`, so that a plain lexicographic sort of
//! the names is also a sort by age.

use crate::config::Config;
use crate::error::{BackupError, Result};
use crate::fs_util;
use crate::human::{format_size, mb_to_bytes};
use crate::logger::SessionLog;
use chrono::{Local, NaiveDateTime};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::cell::Cell;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const ARCHIVE_PREFIX: &str = "backup-";
pub const TAR_GZ_EXTENSION: &str = "tar.gz";
const NAME_TIMESTAMP: &str = "%Y-%m-%d-%H%M%S";
const NAME_TIMESTAMP_LEN: usize = "YYYY-MM-DD-HHMMSS".len();

/// Name of an archive file, carrying its creation timestamp.
///
/// Ordering follows the timestamp, so the newest archive is the maximum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchiveName {
    timestamp: NaiveDateTime,
    extension: String,
}

impl ArchiveName {
    pub fn new<S: Into<String>>(timestamp: NaiveDateTime, extension: S) -> Self {
        Self {
            timestamp,
            extension: extension.into(),
        }
    }

    /// Name for an archive created now, in local time.
    pub fn now<S: Into<String>>(extension: S) -> Self {
        Self::new(Local::now().naive_local(), extension)
    }

    /// Parses `backup-YYYY-MM-DD-HHMMSS.<ext>`; anything else is `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(ARCHIVE_PREFIX)?;
        let stamp = rest.get(..NAME_TIMESTAMP_LEN)?;
        let extension = rest.get(NAME_TIMESTAMP_LEN..)?.strip_prefix('.')?;
        if extension.is_empty() {
            return None;
        }
        let timestamp = NaiveDateTime::parse_from_str(stamp, NAME_TIMESTAMP).ok()?;
        Some(Self::new(timestamp, extension))
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{ARCHIVE_PREFIX}{}.{}",
            self.timestamp.format(NAME_TIMESTAMP),
            self.extension
        )
    }
}

/// Receives byte counts while an archive is written.
///
/// Implementations only display; they never affect the archive contents.
pub trait ProgressCallback {
    /// Called once before any data is read, with the source size.
    fn on_started(&self, total_bytes: u64);

    /// Called as file data is read, with the running total.
    fn on_progress(&self, bytes_done: u64);

    /// Called once after the archive is complete.
    fn on_completed(&self);
}

/// What [`Archiver::create`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Written {
    /// Size of the archive file in bytes.
    pub bytes: u64,
    /// Source entries left out because the format cannot hold them.
    pub skipped: Vec<PathBuf>,
}

/// Container format capability.
pub trait Archiver {
    /// File extension of the produced archives, without the leading dot.
    fn extension(&self) -> &str;

    /// Writes an archive of `source` to `output`.
    fn create(
        &self,
        source: &Path,
        output: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> io::Result<Written>;

    /// Decompresses the whole archive, checking the stream checksum.
    fn check_stream(&self, archive: &Path) -> io::Result<()>;

    /// Enumerates the paths stored in the archive.
    fn list_entries(&self, archive: &Path) -> io::Result<Vec<PathBuf>>;

    /// Unpacks the archive below `destination`.
    fn extract(&self, archive: &Path, destination: &Path) -> io::Result<()>;
}

/// gzip-compressed tar archives.
///
/// Entries are stored under the source directory's own name, the way
/// `tar -C <parent> <name>` would store them, and in file name order.
/// Sockets have no tar representation and are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzArchiver;

impl Archiver for TarGzArchiver {
    fn extension(&self) -> &str {
        TAR_GZ_EXTENSION
    }

    fn create(
        &self,
        source: &Path,
        output: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> io::Result<Written> {
        let file = File::create(output)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut tar_builder = tar::Builder::new(encoder);
        tar_builder.follow_symlinks(false);

        let prefix = source.file_name().map(PathBuf::from).unwrap_or_default();
        let done = Cell::new(0u64);
        let mut skipped = Vec::new();

        for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(io::Error::other)?;
            let name = prefix.join(relative);
            if name.as_os_str().is_empty() {
                continue;
            }

            let file_type = entry.file_type();
            if is_socket(&file_type) {
                tracing::debug!("skipping socket {}", entry.path().display());
                skipped.push(entry.path().to_path_buf());
            } else if file_type.is_file() {
                let metadata = entry.metadata()?;
                let mut header = tar::Header::new_gnu();
                header.set_metadata(&metadata);
                let file = File::open(entry.path())?;
                match progress {
                    Some(callback) => {
                        let reader = ProgressReader {
                            inner: file,
                            done: &done,
                            callback,
                        };
                        tar_builder.append_data(&mut header, &name, reader)?;
                    }
                    None => tar_builder.append_data(&mut header, &name, file)?,
                }
            } else {
                tar_builder.append_path_with_name(entry.path(), &name)?;
            }
        }

        let mut writer = tar_builder.into_inner()?.finish()?;
        io::Write::flush(&mut writer)?;
        drop(writer);
        Ok(Written {
            bytes: fs::metadata(output)?.len(),
            skipped,
        })
    }

    fn check_stream(&self, archive: &Path) -> io::Result<()> {
        let file = File::open(archive)?;
        if file.metadata()?.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive is empty",
            ));
        }
        let mut decoder = GzDecoder::new(BufReader::new(file));
        io::copy(&mut decoder, &mut io::sink())?;
        Ok(())
    }

    fn list_entries(&self, archive: &Path) -> io::Result<Vec<PathBuf>> {
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        let mut entries = Vec::new();
        for entry in tar.entries()? {
            let entry = entry?;
            entries.push(entry.path()?.into_owned());
        }
        Ok(entries)
    }

    fn extract(&self, archive: &Path, destination: &Path) -> io::Result<()> {
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
        tar.set_preserve_permissions(true);
        tar.set_overwrite(true);
        tar.unpack(destination)
    }
}

#[cfg(unix)]
fn is_socket(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_socket()
}

#[cfg(not(unix))]
fn is_socket(_file_type: &fs::FileType) -> bool {
    false
}

struct ProgressReader<'a, R> {
    inner: R,
    done: &'a Cell<u64>,
    callback: &'a dyn ProgressCallback,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.done.set(self.done.get() + n as u64);
            self.callback.on_progress(self.done.get());
        }
        Ok(n)
    }
}

/// Checks that `source` is an existing, listable directory.
pub fn validate_source(source: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(BackupError::SourceNotFound {
            path: source.to_path_buf(),
        });
    }
    fs::read_dir(source).map_err(|e| BackupError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Size in bytes of everything below `source`.
pub fn source_size(source: &Path) -> Result<u64> {
    fs_util::dir_size(source).map_err(|e| BackupError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })
}

/// An archive written to staging, not yet verified.
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub name: ArchiveName,
    pub source_bytes: u64,
    pub archive_bytes: u64,
}

/// Archives `source` into `staging_dir` under a fresh timestamped name.
///
/// Progress is reported only when a callback is given, progress is enabled
/// and the source is larger than the configured threshold.
pub fn build(
    archiver: &dyn Archiver,
    source: &Path,
    staging_dir: &Path,
    config: &Config,
    progress: Option<&dyn ProgressCallback>,
    log: &mut SessionLog,
) -> Result<BuiltArchive> {
    validate_source(source)?;
    let source_bytes = source_size(source)?;
    log.info(format!(
        "Source {} size: {}",
        source.display(),
        format_size(source_bytes)
    ));

    let progress = progress
        .filter(|_| config.progress && source_bytes > mb_to_bytes(config.progress_threshold_mb));

    let name = ArchiveName::now(archiver.extension());
    let path = staging_dir.join(name.to_string());
    log.info(format!("Creating archive {name}"));

    if let Some(callback) = progress {
        callback.on_started(source_bytes);
    }
    let written = archiver
        .create(source, &path, progress)
        .map_err(|e| BackupError::ArchiveCreationFailure {
            path: path.clone(),
            source: e,
        })?;
    if let Some(callback) = progress {
        callback.on_completed();
    }
    for skipped in &written.skipped {
        log.warn(format!("{}: socket ignored", skipped.display()));
    }

    Ok(BuiltArchive {
        path,
        name,
        source_bytes,
        archive_bytes: written.bytes,
    })
}
