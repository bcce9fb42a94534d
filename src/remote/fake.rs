//! In-memory remote host used by the unit tests.

use super::{ConnectivityProbe, RemoteError, RemoteExec, SecureTransport};
use crate::destination::RemoteTarget;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Default)]
struct State {
    unreachable: bool,
    fail_mkdir: bool,
    fail_upload: bool,
    fail_list: bool,
    fail_delete: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    commands: Vec<String>,
    probes: usize,
    uploads: Vec<String>,
}

/// Remote host whose filesystem is a map of paths to bytes.
///
/// Understands the commands issued by the helpers in [`super`].
#[derive(Default)]
pub(crate) struct FakeRemote {
    state: RefCell<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        let remote = Self::new();
        remote.state.borrow_mut().unreachable = true;
        remote
    }

    pub fn fail_mkdir(self) -> Self {
        self.state.borrow_mut().fail_mkdir = true;
        self
    }

    pub fn fail_upload(self) -> Self {
        self.state.borrow_mut().fail_upload = true;
        self
    }

    pub fn fail_list(self) -> Self {
        self.state.borrow_mut().fail_list = true;
        self
    }

    pub fn fail_delete(self) -> Self {
        self.state.borrow_mut().fail_delete = true;
        self
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        if let Some((parent, _)) = path.rsplit_once('/') {
            state.dirs.insert(parent.to_string());
        }
        state.files.insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.borrow().files.get(path).cloned()
    }

    pub fn has_dir(&self, dir: &str) -> bool {
        self.state.borrow().dirs.contains(dir)
    }

    /// Sorted names of the files directly inside `dir`.
    pub fn file_names(&self, dir: &str) -> Vec<String> {
        names_in(&self.state.borrow().files, dir)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.state.borrow().probes
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.borrow().uploads.clone()
    }
}

fn names_in(files: &BTreeMap<String, Vec<u8>>, dir: &str) -> Vec<String> {
    let dir = dir.trim_end_matches('/');
    files
        .keys()
        .filter_map(|path| match path.rsplit_once('/') {
            Some((parent, name)) if parent == dir => Some(name.to_string()),
            _ => None,
        })
        .collect()
}

fn refused() -> RemoteError {
    RemoteError::Failed {
        status: Some(255),
        stderr: "ssh: connect to host: Connection refused".to_string(),
    }
}

fn failed(stderr: &str) -> RemoteError {
    RemoteError::Failed {
        status: Some(1),
        stderr: stderr.to_string(),
    }
}

/// Splits a POSIX shell command line produced by `shell_quote`.
fn split_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quote = false;
    let mut chars = command.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                in_word = true;
            }
            '\\' if !in_quote => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_word = true;
            }
            c if c.is_whitespace() && !in_quote => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

impl ConnectivityProbe for FakeRemote {
    fn probe(&self, _target: &RemoteTarget, limit: Duration) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.probes += 1;
        if state.unreachable {
            Err(RemoteError::Timeout(limit))
        } else {
            Ok(())
        }
    }
}

impl SecureTransport for FakeRemote {
    fn upload(
        &self,
        local: &Path,
        _target: &RemoteTarget,
        remote_path: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        if state.unreachable {
            return Err(refused());
        }
        if state.fail_upload {
            return Err(failed("scp: write failed: disk full"));
        }
        let parent = remote_path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        if !state.dirs.contains(parent) {
            return Err(failed("scp: No such file or directory"));
        }
        let data = fs::read(local).map_err(RemoteError::Spawn)?;
        state.files.insert(remote_path.to_string(), data);
        state.uploads.push(remote_path.to_string());
        Ok(())
    }

    fn download(
        &self,
        _target: &RemoteTarget,
        remote_path: &str,
        local: &Path,
    ) -> Result<(), RemoteError> {
        let state = self.state.borrow();
        if state.unreachable {
            return Err(refused());
        }
        let data = state
            .files
            .get(remote_path)
            .ok_or_else(|| failed("scp: No such file or directory"))?;
        fs::write(local, data).map_err(RemoteError::Spawn)
    }
}

impl RemoteExec for FakeRemote {
    fn exec(&self, _target: &RemoteTarget, command: &str) -> Result<String, RemoteError> {
        let mut state = self.state.borrow_mut();
        state.commands.push(command.to_string());
        if state.unreachable {
            return Err(refused());
        }

        let words = split_words(command);
        let args: Vec<&str> = words
            .iter()
            .skip(2)
            .map(String::as_str)
            .filter(|w| *w != "--")
            .collect();
        match words.first().map(String::as_str) {
            Some("mkdir") => {
                if state.fail_mkdir {
                    return Err(failed("mkdir: Permission denied"));
                }
                for dir in args {
                    state.dirs.insert(dir.trim_end_matches('/').to_string());
                }
                Ok(String::new())
            }
            Some("ls") => {
                if state.fail_list {
                    return Err(failed("ls: Permission denied"));
                }
                let dir = args.first().copied().unwrap_or("");
                if !state.dirs.contains(dir.trim_end_matches('/')) {
                    return Err(failed("ls: No such file or directory"));
                }
                let mut out = names_in(&state.files, dir).join("\n");
                out.push('\n');
                Ok(out)
            }
            Some("rm") => {
                if state.fail_delete {
                    return Err(failed("rm: Operation not permitted"));
                }
                for path in args {
                    state.files.remove(path);
                }
                Ok(String::new())
            }
            Some("test") => {
                let path = words.get(2).map(String::as_str).unwrap_or("");
                if state.files.contains_key(path) {
                    Ok(String::new())
                } else {
                    Err(failed(""))
                }
            }
            _ => Err(failed("unsupported command")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words(r"rm -f -- '/a b' 'it'\''s'"),
            vec!["rm", "-f", "--", "/a b", "it's"]
        );
    }
}
