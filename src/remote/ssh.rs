//! OpenSSH-backed remote capabilities.

use super::{ConnectivityProbe, RemoteError, RemoteExec, SecureTransport};
use crate::destination::RemoteTarget;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::Builder;
use tokio::time::timeout;

/// Remote capabilities implemented with the system `ssh` and `scp` clients.
///
/// Both clients run in batch mode, so a host that asks for a password fails
/// instead of hanging on a prompt.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    connect_timeout: Duration,
    ssh_program: String,
    scp_program: String,
}

impl OpenSsh {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }

    /// Uses other client binaries, e.g. absolute paths.
    pub fn with_programs<S: Into<String>>(mut self, ssh: S, scp: S) -> Self {
        self.ssh_program = ssh.into();
        self.scp_program = scp.into();
        self
    }

    fn ssh(&self, target: &RemoteTarget, command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-p")
            .arg(target.port.to_string())
            .args(self.common_options())
            .arg(target.login())
            .arg(command);
        cmd
    }

    fn scp(&self, port: u16, from: &str, to: &str) -> Command {
        let mut cmd = Command::new(&self.scp_program);
        cmd.arg("-q")
            .arg("-P")
            .arg(port.to_string())
            .args(self.common_options())
            .arg(from)
            .arg(to);
        cmd
    }

    fn common_options(&self) -> [String; 4] {
        [
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }
}

impl ConnectivityProbe for OpenSsh {
    fn probe(&self, target: &RemoteTarget, limit: Duration) -> Result<(), RemoteError> {
        run(self.ssh(target, "true"), Some(limit)).map(|_| ())
    }
}

impl SecureTransport for OpenSsh {
    fn upload(
        &self,
        local: &Path,
        target: &RemoteTarget,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        let from = local.to_string_lossy();
        let to = format!("{}:{remote_path}", target.login());
        run(self.scp(target.port, &from, &to), None).map(|_| ())
    }

    fn download(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local: &Path,
    ) -> Result<(), RemoteError> {
        let from = format!("{}:{remote_path}", target.login());
        let to = local.to_string_lossy();
        run(self.scp(target.port, &from, &to), None).map(|_| ())
    }
}

impl RemoteExec for OpenSsh {
    fn exec(&self, target: &RemoteTarget, command: &str) -> Result<String, RemoteError> {
        run(self.ssh(target, command), None)
    }
}

/// Runs a client to completion and returns its stdout.
///
/// With a `limit`, the child is killed once the limit expires.
fn run(mut cmd: Command, limit: Option<Duration>) -> Result<String, RemoteError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tracing::debug!("running {:?}", cmd.as_std());

    let rt = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RemoteError::Spawn)?;

    rt.block_on(async move {
        let child = cmd.spawn().map_err(RemoteError::Spawn)?;
        let output = match limit {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| RemoteError::Timeout(limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(RemoteError::Spawn)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RemoteError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    })
}
