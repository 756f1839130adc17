//! In-memory transport for testing
//!
//! Interprets the handful of shell commands guestctl issues (`mkdir -p`,
//! `test -f`, `rm -f`, `scrot`, `xdotool`, `echo`) against a fake remote
//! filesystem and records every command line it sees.

use async_trait::async_trait;
use guestctl_core::{ExecOutput, GuestError, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::Transport;

/// Bytes written by the fake `scrot`
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nmock-screen";

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    commands: Vec<String>,
    failures: Vec<(String, ExecOutput)>,
    disconnected: bool,
    latency: Option<Duration>,
    shutdowns: usize,
}

/// Mock transport; clones share one fake remote host
#[derive(Clone)]
pub struct MockTransport {
    target: String,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let mut state = MockState::default();
        for dir in ["/", "/tmp", "/home", "/home/robot"] {
            state.dirs.insert(dir.to_string());
        }
        Self {
            target: "robot@mock-vm".to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Any command containing `pattern` exits with `exit_code` and `stderr`
    pub fn with_failure(self, pattern: &str, exit_code: i32, stderr: &str) -> Self {
        self.state().failures.push((
            pattern.to_string(),
            ExecOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code,
            },
        ));
        self
    }

    /// Every call sleeps this long before answering
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    /// Seed a file on the fake remote host, creating its parents
    pub fn with_remote_file(self, path: &str, content: &[u8]) -> Self {
        {
            let mut state = self.state();
            if let Some(parent) = Path::new(path).parent() {
                add_dir_all(&mut state.dirs, &parent.to_string_lossy());
            }
            state.files.insert(path.to_string(), content.to_vec());
        }
        self
    }

    /// Simulate the remote end going away
    pub fn disconnect(&self) {
        self.state().disconnected = true;
    }

    /// Command lines received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn remote_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    pub fn has_remote_dir(&self, path: &str) -> bool {
        self.state().dirs.contains(path.trim_end_matches('/'))
    }

    pub fn shutdown_count(&self) -> usize {
        self.state().shutdowns
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test may poison the lock; the state is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.state().disconnected {
            return Err(GuestError::Connectivity(format!(
                "connection to {} lost",
                self.target
            )));
        }
        Ok(())
    }
}

fn add_dir_all(dirs: &mut HashSet<String>, path: &str) {
    let mut current = Some(Path::new(path));
    while let Some(dir) = current {
        let s = dir.to_string_lossy();
        if s.is_empty() {
            break;
        }
        dirs.insert(s.to_string());
        current = dir.parent();
    }
}

fn parent_exists(dirs: &HashSet<String>, path: &str) -> bool {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            dirs.contains(parent.to_string_lossy().as_ref())
        }
        _ => true,
    }
}

fn exit(code: i32, stdout: &str, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code: code,
    }
}

fn interpret(state: &mut MockState, command: &str) -> ExecOutput {
    let Some(words) = shlex::split(command) else {
        return exit(2, "", "sh: syntax error");
    };
    // Skip leading VAR=value environment assignments
    let mut words = words
        .into_iter()
        .skip_while(|w| w.contains('=') && !w.starts_with('-'));
    let Some(program) = words.next() else {
        return exit(0, "", "");
    };
    let args: Vec<String> = words.collect();
    let operands: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();

    match program.as_str() {
        "mkdir" => {
            for dir in operands {
                add_dir_all(&mut state.dirs, dir.trim_end_matches('/'));
            }
            exit(0, "", "")
        }
        "test" => match operands.first() {
            Some(path) if args.first().map(String::as_str) == Some("-f") => {
                if state.files.contains_key(path.as_str()) {
                    exit(0, "", "")
                } else {
                    exit(1, "", "")
                }
            }
            _ => exit(2, "", "test: unsupported expression"),
        },
        "rm" => {
            for path in operands {
                state.files.remove(path.as_str());
            }
            exit(0, "", "")
        }
        "scrot" => match operands.last() {
            Some(path) if parent_exists(&state.dirs, path) => {
                state.files.insert(path.to_string(), FAKE_PNG.to_vec());
                exit(0, "", "")
            }
            Some(_) => exit(2, "", "scrot: Saving to file failed"),
            None => exit(2, "", "scrot: no output file"),
        },
        "xdotool" => exit(0, "", ""),
        "echo" => exit(0, &format!("{}\n", args.join(" ")), ""),
        "true" => exit(0, "", ""),
        "false" => exit(1, "", ""),
        other => exit(127, "", &format!("sh: 1: {}: not found", other)),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn run(&self, command: &str) -> Result<ExecOutput> {
        self.delay().await;
        self.check_connected()?;

        let mut state = self.state();
        state.commands.push(command.to_string());
        let scripted = state
            .failures
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone());
        match scripted {
            Some(output) => Ok(output),
            None => Ok(interpret(&mut state, command)),
        }
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.delay().await;
        self.check_connected()?;

        let content = tokio::fs::read(local)
            .await
            .map_err(GuestError::io_at(local))?;
        let mut state = self.state();
        if !parent_exists(&state.dirs, remote) {
            return Err(GuestError::Io {
                path: local.to_path_buf(),
                source: std::io::Error::other(format!(
                    "scp: {}: No such file or directory",
                    remote
                )),
            });
        }
        state.files.insert(remote.to_string(), content);
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<()> {
        self.delay().await;
        self.check_connected()?;

        let content = self
            .state()
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| GuestError::NotFound(format!("remote file {}", remote)))?;
        tokio::fs::write(local, content)
            .await
            .map_err(GuestError::io_at(local))
    }

    async fn shutdown(&self) -> Result<()> {
        self.state().shutdowns += 1;
        Ok(())
    }

    fn target(&self) -> &str {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_filesystem_commands() {
        let mock = MockTransport::new();

        mock.run("mkdir -p '/opt/app/data'").await.unwrap();
        assert!(mock.has_remote_dir("/opt/app"));
        assert!(mock.has_remote_dir("/opt/app/data"));

        let missing = mock.run("test -f '/opt/app/data/x'").await.unwrap();
        assert_eq!(missing.exit_code, 1);

        mock.run("DISPLAY=:0 scrot '/tmp/shot.png'").await.unwrap();
        assert_eq!(mock.remote_file("/tmp/shot.png").unwrap(), FAKE_PNG);

        mock.run("rm -f '/tmp/shot.png'").await.unwrap();
        assert!(mock.remote_file("/tmp/shot.png").is_none());
    }

    #[tokio::test]
    async fn test_scripted_failure_and_history() {
        let mock = MockTransport::new().with_failure("xdotool click", 1, "no display");

        let ok = mock.run("xdotool mousemove --sync 1 2").await.unwrap();
        assert!(ok.success());
        let failed = mock.run("xdotool click --repeat 1 1").await.unwrap();
        assert_eq!(failed.exit_code, 1);
        assert_eq!(failed.stderr, "no display");

        assert_eq!(mock.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_program() {
        let mock = MockTransport::new();
        let out = mock.run("frobnicate --all").await.unwrap();
        assert_eq!(out.exit_code, 127);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let mock = MockTransport::new();
        mock.disconnect();
        let err = mock.run("echo hi").await.unwrap_err();
        assert!(matches!(err, GuestError::Connectivity(_)));
    }
}
