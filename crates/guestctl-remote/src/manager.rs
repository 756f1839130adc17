//! Connection lifecycle and serialized remote access

use guestctl_core::{
    ConnectionConfig, ConnectionState, ConnectionStatus, ExecOutput, GuestError, Result,
};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{shell_quote, OpenSshTransport, Transport};

const STATE_OPEN: u8 = 0;
const STATE_LOST: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Owner of the single remote connection
///
/// Every remote call takes `channel` for its whole duration, so commands
/// never interleave on the remote shell. Once the connection is lost or
/// closed every later call fails with `Connectivity`; nothing reconnects.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    state: AtomicU8,
    channel: Mutex<()>,
    command_timeout: Duration,
}

impl ConnectionManager<OpenSshTransport> {
    /// Establish the connection described by `config`
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let transport = OpenSshTransport::connect(config).await?;
        info!("Connected to {}:{}", config.target(), config.port);
        Ok(Self::with_transport(transport, config.clone()))
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Wrap an already-established transport
    pub fn with_transport(transport: T, config: ConnectionConfig) -> Self {
        let command_timeout = config.command_timeout();
        Self {
            transport,
            config,
            state: AtomicU8::new(STATE_OPEN),
            channel: Mutex::new(()),
            command_timeout,
        }
    }

    /// Override the per-call timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN => ConnectionState::Open,
            STATE_LOST => ConnectionState::Lost,
            _ => ConnectionState::Closed,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Lost => Err(GuestError::Connectivity(format!(
                "connection to {} was lost; restart the session to reconnect",
                self.config.target()
            ))),
            ConnectionState::Closed => Err(GuestError::Connectivity(format!(
                "connection to {} is closed",
                self.config.target()
            ))),
        }
    }

    /// Bound one transport call by the command timeout and track connection loss
    async fn call<R, F>(&self, what: &str, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Err(GuestError::Connectivity(msg))) => {
                if self
                    .state
                    .compare_exchange(STATE_OPEN, STATE_LOST, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    warn!("Connection to {} lost: {}", self.config.target(), msg);
                }
                Err(GuestError::Connectivity(msg))
            }
            Ok(result) => result,
            Err(_) => Err(GuestError::Connectivity(format!(
                "{} timed out after {}s",
                what,
                self.command_timeout.as_secs_f64()
            ))),
        }
    }

    /// Run a command line verbatim and return its captured output
    ///
    /// Nonzero exit codes are returned, not raised.
    #[instrument(skip(self))]
    pub async fn execute(&self, command: &str) -> Result<ExecOutput> {
        let _guard = self.channel.lock().await;
        self.ensure_open()?;
        let output = self
            .call("remote command", self.transport.run(command))
            .await?;
        debug!("exit code {}", output.exit_code);
        Ok(output)
    }

    /// Run a command against the configured X display
    pub async fn execute_ui(&self, command: &str) -> Result<ExecOutput> {
        self.execute(&self.ui_command(command)).await
    }

    fn ui_command(&self, command: &str) -> String {
        format!("DISPLAY={} {}", shell_quote(&self.config.display), command)
    }

    /// Copy a local file to the remote host, creating remote parent directories
    #[instrument(skip(self))]
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(GuestError::io_at(local))?;
        if !meta.is_file() {
            return Err(GuestError::InvalidArgument(format!(
                "{} is not a regular file",
                local.display()
            )));
        }

        let _guard = self.channel.lock().await;
        self.ensure_open()?;

        if let Some(parent) = remote_parent(remote) {
            let mkdir = format!("mkdir -p {}", shell_quote(parent));
            let output = self.call("remote mkdir", self.transport.run(&mkdir)).await?;
            if !output.success() {
                return Err(GuestError::Io {
                    path: parent.into(),
                    source: std::io::Error::other(output.stderr.trim().to_string()),
                });
            }
        }

        self.call("upload", self.transport.put(local, remote))
            .await?;
        info!("Uploaded {} -> {}", local.display(), remote);
        Ok(())
    }

    /// Copy a remote file to the local machine, creating local parent directories
    ///
    /// A missing remote file fails before anything is created locally.
    #[instrument(skip(self))]
    pub async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let _guard = self.channel.lock().await;
        self.ensure_open()?;

        let probe = format!("test -f {}", shell_quote(remote));
        let exists = self.call("remote test", self.transport.run(&probe)).await?;
        if !exists.success() {
            return Err(GuestError::NotFound(format!("remote file {}", remote)));
        }

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(GuestError::io_at(parent))?;
        }

        self.call("download", self.transport.get(remote, local))
            .await?;
        info!("Downloaded {} -> {}", remote, local.display());
        Ok(())
    }

    /// Delete a remote file; a missing file is not an error
    pub async fn remove_remote(&self, remote: &str) -> Result<()> {
        let output = self
            .execute(&format!("rm -f {}", shell_quote(remote)))
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(GuestError::Io {
                path: remote.into(),
                source: std::io::Error::other(output.stderr.trim().to_string()),
            })
        }
    }

    /// Liveness snapshot; never touches the remote host
    pub fn status(&self) -> ConnectionStatus {
        let state = self.state();
        ConnectionStatus {
            connected: state == ConnectionState::Open,
            state,
            host: self.config.host.clone(),
            port: self.config.port,
            user: self.config.user.clone(),
            display: self.config.display.clone(),
            identity_file: self.config.identity_file.clone(),
        }
    }

    /// Release the connection; closing twice is a no-op
    pub async fn close(&self) -> Result<()> {
        let _guard = self.channel.lock().await;
        if self.state.swap(STATE_CLOSED, Ordering::SeqCst) == STATE_CLOSED {
            return Ok(());
        }
        info!("Closing connection to {}", self.transport.target());
        self.transport.shutdown().await
    }
}

fn remote_parent(remote: &str) -> Option<&str> {
    let trimmed = remote.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    match &trimmed[..idx] {
        "" => None,
        parent => Some(parent),
    }
}
