//! Destination resolution.
//!
//! A destination string is either `user@host:path`, which names a directory
//! on a remote host reached over ssh, or a local filesystem path. Each kind
//! has its own preflight that must pass before any archive is created for it.

use crate::config::Config;
use crate::error::{BackupError, Result};
use crate::fs_util;
use crate::human::mb_to_bytes;
use crate::logger::SessionLog;
use crate::remote::{self, ConnectivityProbe, RemoteExec};
use std::fmt;
use std::path::{Path, PathBuf};

/// A directory on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl RemoteTarget {
    pub fn new<S: Into<String>>(user: S, host: S, port: u16, path: S) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// `user@host`, as given to ssh.
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Remote path of `name` inside this directory.
    pub fn join(&self, name: &str) -> String {
        if self.path.ends_with('/') {
            format!("{}{name}", self.path)
        } else {
            format!("{}/{name}", self.path)
        }
    }

    /// The same host, pointing at `path`.
    pub fn with_path<S: Into<String>>(&self, path: S) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.path)
    }
}

/// Where archives are placed or restored from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    Remote(RemoteTarget),
}

impl Destination {
    /// Classifies a destination argument.
    ///
    /// It is remote when an `@` comes before a `:` and the user, host and
    /// path around them are all non-empty. Anything else is local.
    pub fn parse(raw: &str, port: u16) -> Self {
        match parse_remote(raw, port) {
            Some(target) => Destination::Remote(target),
            None => Destination::Local(fs_util::expand_home(raw)),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Destination::Remote(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local(path) => write!(f, "{}", path.display()),
            Destination::Remote(target) => target.fmt(f),
        }
    }
}

fn parse_remote(raw: &str, port: u16) -> Option<RemoteTarget> {
    let (user, rest) = raw.split_once('@')?;
    let (host, path) = rest.split_once(':')?;
    if user.is_empty() || host.is_empty() || path.is_empty() || user.contains('/') {
        return None;
    }
    Some(RemoteTarget::new(user, host, port, path))
}

/// Preflight for a local destination directory.
///
/// Creates the directory if needed, proves it is writable and checks that its
/// filesystem has at least `min_free_mb` available.
pub fn prepare_local(dir: &Path, config: &Config, log: &mut SessionLog) -> Result<()> {
    fs_util::ensure_writable_dir(dir).map_err(|source| BackupError::DestinationUnwritable {
        path: dir.to_path_buf(),
        source,
    })?;

    let available = match fs_util::available_space(dir) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::Unsupported => {
            log.warn(format!("Skipping free space check: {e}"));
            return Ok(());
        }
        Err(source) => {
            return Err(BackupError::DestinationUnwritable {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    let available_mb = available / (1024 * 1024);
    if available < mb_to_bytes(config.min_free_mb) {
        return Err(BackupError::InsufficientSpace {
            path: dir.to_path_buf(),
            available_mb,
            required_mb: config.min_free_mb,
        });
    }
    log.info(format!(
        "Destination {} ready ({available_mb} MB free)",
        dir.display()
    ));
    Ok(())
}

/// Preflight for a remote destination: probe, then `mkdir -p`.
pub fn prepare_remote(
    target: &RemoteTarget,
    config: &Config,
    probe: &dyn ConnectivityProbe,
    remote: &dyn RemoteExec,
    log: &mut SessionLog,
) -> Result<()> {
    check_connectivity(target, config, probe, log)?;
    remote::make_dir(remote, target, &target.path).map_err(|source| {
        BackupError::RemotePathFailure {
            target: target.to_string(),
            source,
        }
    })?;
    log.info(format!("Remote path {target} ready"));
    Ok(())
}

/// Bounded connectivity probe against `target`.
pub fn check_connectivity(
    target: &RemoteTarget,
    config: &Config,
    probe: &dyn ConnectivityProbe,
    log: &mut SessionLog,
) -> Result<()> {
    log.info(format!(
        "Checking connectivity to {} (port {}, timeout {}s)",
        target.login(),
        target.port,
        config.connect_timeout_secs
    ));
    probe_target(target, config, probe)
}

/// Runs the connectivity probe against `target` within the configured timeout.
pub fn probe_target(
    target: &RemoteTarget,
    config: &Config,
    probe: &dyn ConnectivityProbe,
) -> Result<()> {
    probe
        .probe(target, config.connect_timeout())
        .map_err(|source| BackupError::ConnectivityFailure {
            target: target.login(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::SessionKind;
    use crate::remote::fake::FakeRemote;

    #[test]
    fn test_parse_remote() {
        let dest = Destination::parse("backup@nas.local:/srv/backups", 2222);
        assert_eq!(
            dest,
            Destination::Remote(RemoteTarget::new("backup", "nas.local", 2222, "/srv/backups"))
        );
        assert!(dest.is_remote());
        assert_eq!(dest.to_string(), "backup@nas.local:/srv/backups");
    }

    #[test]
    fn test_parse_local() {
        assert_eq!(
            Destination::parse("/mnt/backups", 22),
            Destination::Local(PathBuf::from("/mnt/backups"))
        );
        // No path after the colon.
        assert!(!Destination::parse("user@host:", 22).is_remote());
        // Colon before the at sign.
        assert!(!Destination::parse("/mnt/a:b@c", 22).is_remote());
        // Empty user or host.
        assert!(!Destination::parse("@host:/x", 22).is_remote());
        assert!(!Destination::parse("user@:/x", 22).is_remote());
        // An @ inside a directory name.
        assert!(!Destination::parse("./dir/me@home:x", 22).is_remote());
    }

    #[test]
    fn test_remote_join() {
        let target = RemoteTarget::new("u", "h", 22, "/srv/backups");
        assert_eq!(target.join("a.tar.gz"), "/srv/backups/a.tar.gz");
        let target = target.with_path("/srv/backups/");
        assert_eq!(target.join("a.tar.gz"), "/srv/backups/a.tar.gz");
    }

    #[test]
    fn test_prepare_local_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("backups");
        let config = Config {
            min_free_mb: 0,
            ..Default::default()
        };
        let mut log = SessionLog::in_memory(SessionKind::Backup);

        prepare_local(&dest, &config, &mut log).unwrap();
        assert!(dest.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_local_insufficient_space() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            min_free_mb: u64::MAX / (1024 * 1024),
            ..Default::default()
        };
        let mut log = SessionLog::in_memory(SessionKind::Backup);

        let err = prepare_local(dir.path(), &config, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::InsufficientSpace { .. }));
    }

    #[test]
    fn test_prepare_local_unwritable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = Config::default();
        let mut log = SessionLog::in_memory(SessionKind::Backup);

        let err = prepare_local(file.path(), &config, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::DestinationUnwritable { .. }));
    }

    #[test]
    fn test_prepare_remote_creates_path() {
        let remote = FakeRemote::new();
        let target = RemoteTarget::new("bk", "nas", 22, "/srv/backups");
        let mut log = SessionLog::in_memory(SessionKind::Backup);

        prepare_remote(&target, &Config::default(), &remote, &remote, &mut log).unwrap();
        assert_eq!(remote.probe_count(), 1);
        assert!(remote.has_dir("/srv/backups"));
    }

    #[test]
    fn test_prepare_remote_unreachable() {
        let remote = FakeRemote::unreachable();
        let target = RemoteTarget::new("bk", "nas", 22, "/srv/backups");
        let mut log = SessionLog::in_memory(SessionKind::Backup);

        let err =
            prepare_remote(&target, &Config::default(), &remote, &remote, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::ConnectivityFailure { .. }));
        // No remote command is attempted after a failed probe.
        assert!(remote.commands().is_empty());
    }

    #[test]
    fn test_prepare_remote_mkdir_failure() {
        let remote = FakeRemote::new().fail_mkdir();
        let target = RemoteTarget::new("bk", "nas", 22, "/srv/backups");
        let mut log = SessionLog::in_memory(SessionKind::Backup);

        let err =
            prepare_remote(&target, &Config::default(), &remote, &remote, &mut log).unwrap_err();
        assert!(matches!(err, BackupError::RemotePathFailure { .. }));
    }

    #[test]
    fn test_probe_target_needs_no_session() {
        let target = RemoteTarget::new("bk", "nas", 22, "/srv/backups");

        probe_target(&target, &Config::default(), &FakeRemote::new()).unwrap();
        let err = probe_target(&target, &Config::default(), &FakeRemote::unreachable())
            .unwrap_err();
        assert!(matches!(err, BackupError::ConnectivityFailure { .. }));
    }
}
