//! OpenSSH control-master transport
//!
//! One `ssh -M -N -f` master process owns the authenticated session. Every
//! command and `scp` transfer is multiplexed over its control socket, so the
//! whole process talks to the target through a single connection.

use async_trait::async_trait;
use guestctl_core::{ConnectionConfig, ExecOutput, GuestError, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::Transport;

/// Exit status `ssh` itself uses for connection-level failures
const SSH_CONNECTION_FAILURE: i32 = 255;

const SERVER_ALIVE_INTERVAL_SECS: u64 = 15;
const SERVER_ALIVE_COUNT_MAX: u64 = 3;

/// Transport backed by the system `ssh` and `scp` binaries
pub struct OpenSshTransport {
    target: String,
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
    control_path: PathBuf,
    closed: AtomicBool,
}

impl OpenSshTransport {
    fn new(config: &ConnectionConfig, control_path: PathBuf) -> Self {
        Self {
            target: config.target(),
            port: config.port,
            identity_file: config.identity_file.clone(),
            connect_timeout: config.connect_timeout(),
            control_path,
            closed: AtomicBool::new(false),
        }
    }

    /// Establish the control-master session
    ///
    /// Authentication runs non-interactively; any failure here is a
    /// `Connectivity` error and leaves no master process behind.
    #[instrument(skip(config), fields(target = %config.target(), port = config.port))]
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let transport = Self::new(config, build_control_path(&config.target()));
        debug!("Opening ssh master at {}", transport.control_path.display());

        // Leave headroom over ConnectTimeout for the key exchange itself
        let limit = transport.connect_timeout * 2;
        let output = match tokio::time::timeout(
            limit,
            run_process("ssh", &transport.master_args()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                transport.close_master().await;
                return Err(GuestError::Connectivity(format!(
                    "timed out connecting to {} after {}s",
                    transport.target,
                    limit.as_secs()
                )));
            }
        };

        if !output.success() {
            transport.close_master().await;
            return Err(GuestError::Connectivity(format!(
                "failed to connect to {}:{}: {}",
                transport.target,
                transport.port,
                failure_details(&output)
            )));
        }

        debug!("ssh master established");
        Ok(transport)
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            format!("ServerAliveInterval={}", SERVER_ALIVE_INTERVAL_SECS),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", SERVER_ALIVE_COUNT_MAX),
        ];
        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    fn master_args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        args.extend(self.common_options());
        args.push(self.target.clone());
        args
    }

    /// Options for clients that must ride the master and nothing else
    ///
    /// When the control socket is unusable ssh would otherwise open a fresh
    /// direct connection. `ProxyCommand=false` makes that fallback fail with
    /// 255 instead, which `check_connection` reports as a lost connection.
    fn mux_only_options() -> Vec<String> {
        vec![
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "ProxyCommand=false".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
        ]
    }

    fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-S".to_string(),
            self.control_path.display().to_string(),
        ];
        args.extend(Self::mux_only_options());
        args.push(self.target.clone());
        args.push(command.to_string());
        args
    }

    fn control_args(&self, verb: &str) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.control_path.display().to_string(),
            "-O".to_string(),
            verb.to_string(),
            self.target.clone(),
        ]
    }

    fn scp_options(&self) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-P".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        args.extend(Self::mux_only_options());
        args
    }

    fn scp_put_args(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut args = self.scp_options();
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.target, remote));
        args
    }

    fn scp_get_args(&self, remote: &str, local: &Path) -> Vec<String> {
        let mut args = self.scp_options();
        args.push(format!("{}:{}", self.target, remote));
        args.push(local.display().to_string());
        args
    }

    /// Ask the master process whether the session is still up
    async fn master_alive(&self) -> bool {
        match run_process("ssh", &self.control_args("check")).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }

    /// Turn an exit status of 255 into a connectivity error when the master is gone
    async fn check_connection(&self, output: &ExecOutput) -> Result<()> {
        if output.exit_code != SSH_CONNECTION_FAILURE || self.master_alive().await {
            return Ok(());
        }
        Err(GuestError::Connectivity(format!(
            "connection to {} lost: {}",
            self.target,
            failure_details(output)
        )))
    }

    async fn close_master(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = run_process("ssh", &self.control_args("exit")).await;
        let _ = tokio::fs::remove_file(&self.control_path).await;
    }

    async fn transfer(&self, args: Vec<String>, path: &Path, what: &str) -> Result<()> {
        let output = run_process("scp", &args).await?;
        if output.success() {
            return Ok(());
        }
        // scp reports both remote errors and transport failures as 1
        if !self.master_alive().await {
            return Err(GuestError::Connectivity(format!(
                "connection to {} lost during {}",
                self.target, what
            )));
        }
        Err(GuestError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("{} failed: {}", what, failure_details(&output))),
        })
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    #[instrument(skip(self, command), fields(target = %self.target))]
    async fn run(&self, command: &str) -> Result<ExecOutput> {
        debug!("ssh exec: {}", command);
        let output = run_process("ssh", &self.exec_args(command)).await?;
        self.check_connection(&output).await?;
        Ok(output)
    }

    #[instrument(skip(self), fields(target = %self.target))]
    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.transfer(self.scp_put_args(local, remote), local, "upload")
            .await
    }

    #[instrument(skip(self), fields(target = %self.target))]
    async fn get(&self, remote: &str, local: &Path) -> Result<()> {
        self.transfer(self.scp_get_args(remote, local), local, "download")
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing ssh master for {}", self.target);
        self.close_master().await;
        Ok(())
    }

    fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for OpenSshTransport {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("ssh transport dropped without shutdown; closing master");
        let _ = std::process::Command::new("ssh")
            .args(self.control_args("exit"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let _ = std::fs::remove_file(&self.control_path);
    }
}

fn build_control_path(target: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    target.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::env::temp_dir().join(format!("guestctl-ssh-{:x}.sock", hasher.finish()))
}

async fn run_process(program: &str, args: &[String]) -> Result<ExecOutput> {
    let mut cmd = Command::new(program);
    // Timeouts drop the future; the child must not outlive it
    cmd.kill_on_drop(true);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = cmd
        .output()
        .await
        .map_err(|e| GuestError::Connectivity(format!("{}: {}", program, e)))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn failure_details(output: &ExecOutput) -> String {
    let details = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    if details.is_empty() {
        format!("exited with {}", output.exit_code)
    } else {
        details.to_string()
    }
}

/// Quote a string as one POSIX shell word
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".into()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> OpenSshTransport {
        let config = ConnectionConfig {
            host: "10.0.0.5".into(),
            user: "robot".into(),
            port: 2222,
            identity_file: Some(PathBuf::from("/keys/id_ed25519")),
            ..Default::default()
        };
        let transport = OpenSshTransport::new(&config, PathBuf::from("/tmp/ctl.sock"));
        // Nothing to tear down in tests
        transport.closed.store(true, Ordering::SeqCst);
        transport
    }

    #[test]
    fn test_quote_empty() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_quote_with_single_quote() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_master_args() {
        let args = transport().master_args();
        assert_eq!(&args[..3], ["-M", "-N", "-f"]);
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.contains(&"ControlPath=/tmp/ctl.sock".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_ed25519"]));
        assert_eq!(args.last().map(String::as_str), Some("robot@10.0.0.5"));
    }

    #[test]
    fn test_exec_args_reuse_control_socket() {
        let args = transport().exec_args("uname -a");
        assert_eq!(
            args,
            [
                "-T",
                "-S",
                "/tmp/ctl.sock",
                "-o",
                "ControlMaster=no",
                "-o",
                "ProxyCommand=false",
                "-o",
                "BatchMode=yes",
                "robot@10.0.0.5",
                "uname -a"
            ]
        );
    }

    #[test]
    fn test_clients_cannot_fall_back_to_direct_connection() {
        let t = transport();
        let exec = t.exec_args("true");
        let put = t.scp_put_args(Path::new("/local/a.txt"), "/remote/a.txt");
        let get = t.scp_get_args("/remote/a.txt", Path::new("/local/a.txt"));
        for args in [&exec, &put, &get] {
            assert!(args.windows(2).any(|w| w == ["-o", "ProxyCommand=false"]));
            assert!(args.windows(2).any(|w| w == ["-o", "ControlMaster=no"]));
        }
        // The master itself must still be able to connect
        assert!(!t.master_args().iter().any(|a| a.starts_with("ProxyCommand")));
    }

    #[test]
    fn test_control_args() {
        assert_eq!(
            transport().control_args("check"),
            ["-S", "/tmp/ctl.sock", "-O", "check", "robot@10.0.0.5"]
        );
    }

    #[test]
    fn test_scp_args() {
        let t = transport();
        let put = t.scp_put_args(Path::new("/local/a.txt"), "/remote/dir/a.txt");
        assert!(put.windows(2).any(|w| w == ["-P", "2222"]));
        assert_eq!(
            &put[put.len() - 2..],
            ["/local/a.txt", "robot@10.0.0.5:/remote/dir/a.txt"]
        );

        let get = t.scp_get_args("/tmp/shot.png", Path::new("/ws/shot.png"));
        assert_eq!(
            &get[get.len() - 2..],
            ["robot@10.0.0.5:/tmp/shot.png", "/ws/shot.png"]
        );
    }

    #[test]
    fn test_control_path_in_temp_dir() {
        let a = build_control_path("robot@vm");
        assert_eq!(a.parent(), Some(std::env::temp_dir().as_path()));
        assert!(a
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("guestctl-ssh-")));
    }

    #[test]
    fn test_failure_details_prefers_stderr() {
        let output = ExecOutput {
            stdout: "partial".into(),
            stderr: "Permission denied (publickey).".into(),
            exit_code: 255,
        };
        assert_eq!(failure_details(&output), "Permission denied (publickey).");

        let silent = ExecOutput {
            exit_code: 1,
            ..Default::default()
        };
        assert_eq!(failure_details(&silent), "exited with 1");
    }
}
