//! Configuration management for guestctl
//!
//! Settings come from an optional TOML file, are overlaid by the `VM_*`
//! environment variables and are validated once at startup. A configuration
//! that fails validation is fatal: no operation can run without a target.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{GuestError, Result};

/// Environment variable naming the target host
pub const ENV_HOST: &str = "VM_HOST";
/// Environment variable naming the remote principal
pub const ENV_USER: &str = "VM_USER";
/// Environment variable with the SSH port
pub const ENV_PORT: &str = "VM_PORT";
/// Environment variable with an optional private key path
pub const ENV_IDENTITY: &str = "VM_IDENTITY";
/// Environment variable with the X display used for UI automation
pub const ENV_DISPLAY: &str = "VM_DISPLAY";
/// Environment variable overriding the workspaces directory
pub const ENV_WORKSPACES: &str = "GUESTCTL_WORKSPACES";

/// Top-level guestctl configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestConfig {
    /// Remote connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Workspace storage settings
    #[serde(default)]
    pub workspaces: WorkspaceConfig,

    /// Audit log settings
    #[serde(default)]
    pub audit: AuditConfig,

    /// Synthetic input settings
    #[serde(default)]
    pub input: InputConfig,
}

/// Settings for the single remote-shell connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Target host name or address (required)
    #[serde(default)]
    pub host: String,

    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Remote principal (required)
    #[serde(default)]
    pub user: String,

    /// Private key used instead of agent/password authentication
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// X display injected into every UI automation command
    #[serde(default = "default_display")]
    pub display: String,

    /// Seconds allowed for establishing the connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed for any single remote command or transfer
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

/// Where workspaces live on the local machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory holding one sub-directory per workspace
    #[serde(default = "default_workspaces_root")]
    pub root: PathBuf,
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Longest string parameter kept in an audit line before truncation
    #[serde(default = "default_max_param_chars")]
    pub max_param_chars: usize,
}

/// Synthetic input settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Delay between typed characters, in milliseconds
    #[serde(default = "default_type_delay_ms")]
    pub type_delay_ms: u64,

    /// Longest single pause a batch step may request, in seconds
    #[serde(default = "default_max_pause_secs")]
    pub max_pause_secs: f64,
}

// Default value providers
fn default_port() -> u16 {
    22
}

fn default_display() -> String {
    ":0".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    60
}

fn default_workspaces_root() -> PathBuf {
    PathBuf::from("data/projects")
}

fn default_max_param_chars() -> usize {
    200
}

fn default_type_delay_ms() -> u64 {
    10
}

fn default_max_pause_secs() -> f64 {
    300.0
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            user: String::new(),
            identity_file: None,
            display: default_display(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspaces_root(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_param_chars: default_max_param_chars(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            type_delay_ms: default_type_delay_ms(),
            max_pause_secs: default_max_pause_secs(),
        }
    }
}

impl ConnectionConfig {
    /// `user@host` destination string
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl GuestConfig {
    /// Load configuration: optional TOML file, then environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuestError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| GuestError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Overlay values from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup
    ///
    /// An unparsable `VM_PORT` is kept as port 0 so that validation reports it.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let conn = &mut self.connection;
        if let Some(host) = lookup(ENV_HOST) {
            conn.host = host;
        }
        if let Some(user) = lookup(ENV_USER) {
            conn.user = user;
        }
        if let Some(port) = lookup(ENV_PORT) {
            conn.port = port.trim().parse().unwrap_or(0);
        }
        if let Some(identity) = lookup(ENV_IDENTITY) {
            conn.identity_file = if identity.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(identity))
            };
        }
        if let Some(display) = lookup(ENV_DISPLAY) {
            conn.display = display;
        }
        if let Some(root) = lookup(ENV_WORKSPACES) {
            if !root.trim().is_empty() {
                self.workspaces.root = PathBuf::from(root);
            }
        }
    }

    /// Check that every required value is present and sane
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        if conn.host.trim().is_empty() {
            return Err(GuestError::Config(format!(
                "target host is required (set {} or connection.host)",
                ENV_HOST
            )));
        }
        if conn.user.trim().is_empty() {
            return Err(GuestError::Config(format!(
                "remote user is required (set {} or connection.user)",
                ENV_USER
            )));
        }
        if conn.port == 0 {
            return Err(GuestError::Config(format!(
                "port must be between 1 and 65535 (check {})",
                ENV_PORT
            )));
        }
        if conn.display.trim().is_empty() {
            return Err(GuestError::Config("display identifier cannot be empty".into()));
        }
        if let Some(key) = &conn.identity_file {
            if !key.is_file() {
                return Err(GuestError::Config(format!(
                    "identity file {} does not exist",
                    key.display()
                )));
            }
        }
        if conn.connect_timeout_secs == 0 || conn.command_timeout_secs == 0 {
            return Err(GuestError::Config("timeouts must be at least one second".into()));
        }
        if self.audit.max_param_chars == 0 {
            return Err(GuestError::Config("audit.max_param_chars must be positive".into()));
        }
        if !self.input.max_pause_secs.is_finite() || self.input.max_pause_secs < 0.0 {
            return Err(GuestError::Config("input.max_pause_secs must be a non-negative number".into()));
        }
        Ok(())
    }
}
