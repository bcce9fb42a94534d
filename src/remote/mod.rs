/*!
Remote host capabilities.

The engine talks to remote destinations only through three small traits:
[`ConnectivityProbe`], [`SecureTransport`] and [`RemoteExec`]. The production
implementation, [`OpenSsh`], drives the system `ssh` and `scp` clients; tests
use the in-memory fake from the `fake` module.

Directory listing, creation and deletion are built here on top of
[`RemoteExec`], one command per step, so that a failure in a later step is
observable on its own.
*/

#[cfg(test)]
pub(crate) mod fake;
pub mod ssh;

use crate::destination::RemoteTarget;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use ssh::OpenSsh;

/// Failures of a single remote operation.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The operation did not finish within its bound
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The client program could not be started
    #[error("cannot run remote client: {0}")]
    Spawn(#[source] io::Error),

    /// The client ran and reported failure
    #[error("remote command failed (exit status {status:?}): {stderr}")]
    Failed { status: Option<i32>, stderr: String },
}

/// Checks that a remote host accepts our credentials and runs commands.
pub trait ConnectivityProbe {
    /// Authenticates and runs a no-op, giving up after `limit`.
    fn probe(&self, target: &RemoteTarget, limit: Duration) -> Result<(), RemoteError>;
}

/// Copies files to and from a remote host over an encrypted channel.
pub trait SecureTransport {
    fn upload(
        &self,
        local: &Path,
        target: &RemoteTarget,
        remote_path: &str,
    ) -> Result<(), RemoteError>;

    fn download(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local: &Path,
    ) -> Result<(), RemoteError>;
}

/// Runs a shell command on a remote host and returns its stdout.
pub trait RemoteExec {
    fn exec(&self, target: &RemoteTarget, command: &str) -> Result<String, RemoteError>;
}

/// Quotes `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Quotes a remote path, leaving a leading `~/` for the remote shell to expand.
pub fn quote_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some("") => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None if path == "~" => "~".to_string(),
        None => shell_quote(path),
    }
}

/// `mkdir -p` on the remote host.
pub fn make_dir(
    remote: &dyn RemoteExec,
    target: &RemoteTarget,
    dir: &str,
) -> Result<(), RemoteError> {
    remote
        .exec(target, &format!("mkdir -p -- {}", quote_path(dir)))
        .map(|_| ())
}

/// Names of the entries in a remote directory.
pub fn list_dir(
    remote: &dyn RemoteExec,
    target: &RemoteTarget,
    dir: &str,
) -> Result<Vec<String>, RemoteError> {
    let stdout = remote.exec(target, &format!("ls -1 -- {}", quote_path(dir)))?;
    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Removes the given remote files in a single command.
pub fn remove_files(
    remote: &dyn RemoteExec,
    target: &RemoteTarget,
    paths: &[String],
) -> Result<(), RemoteError> {
    if paths.is_empty() {
        return Ok(());
    }
    let args: Vec<String> = paths.iter().map(|p| quote_path(p)).collect();
    remote
        .exec(target, &format!("rm -f -- {}", args.join(" ")))
        .map(|_| ())
}

/// Whether a regular file exists at `path` on the remote host.
pub fn file_exists(remote: &dyn RemoteExec, target: &RemoteTarget, path: &str) -> bool {
    remote
        .exec(target, &format!("test -f {}", quote_path(path)))
        .is_ok()
}
