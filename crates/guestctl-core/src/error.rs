//! Unified error types for guestctl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all guestctl operations
#[derive(Error, Debug)]
pub enum GuestError {
    // Transport errors
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Local storage errors
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Workspace state errors
    #[error("No active workspace. Initialize or load a workspace first.")]
    NoActiveWorkspace,

    #[error("Another workspace switch is already in progress")]
    AlreadyActive,

    // UI automation errors
    #[error("Action '{action}' failed with exit code {exit_code}: {stderr}")]
    Action {
        action: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Invalid step at index {index}: {reason}")]
    Validation { index: usize, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Startup errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using GuestError
pub type Result<T> = std::result::Result<T, GuestError>;

/// Stable, machine-readable error category reported to callers and audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "connectivity_error")]
    Connectivity,
    NotFound,
    #[serde(rename = "io_error")]
    Io,
    NoActiveWorkspace,
    AlreadyActive,
    #[serde(rename = "action_error")]
    Action,
    #[serde(rename = "validation_error")]
    Validation,
    InvalidArgument,
    #[serde(rename = "config_error")]
    Config,
    #[serde(rename = "serialization_error")]
    Serialization,
    #[serde(rename = "error")]
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity => write!(f, "connectivity_error"),
            Self::NotFound => write!(f, "not_found"),
            Self::Io => write!(f, "io_error"),
            Self::NoActiveWorkspace => write!(f, "no_active_workspace"),
            Self::AlreadyActive => write!(f, "already_active"),
            Self::Action => write!(f, "action_error"),
            Self::Validation => write!(f, "validation_error"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::Config => write!(f, "config_error"),
            Self::Serialization => write!(f, "serialization_error"),
            Self::Other => write!(f, "error"),
        }
    }
}

impl GuestError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io { .. } => ErrorKind::Io,
            Self::NoActiveWorkspace => ErrorKind::NoActiveWorkspace,
            Self::AlreadyActive => ErrorKind::AlreadyActive,
            Self::Action { .. } => ErrorKind::Action,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Build a mapper that attaches `path` to an I/O error
    ///
    /// `ErrorKind::NotFound` I/O failures become [`GuestError::NotFound`] so a
    /// missing file is never reported as a generic storage failure.
    ///
    /// ```
    /// use guestctl_core::GuestError;
    ///
    /// let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    /// let mapped = GuestError::io_at("/tmp/x")(err);
    /// assert!(matches!(mapped, GuestError::NotFound(_)));
    /// ```
    pub fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> GuestError {
        let path = path.into();
        move |source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                GuestError::NotFound(path.display().to_string())
            } else {
                GuestError::Io { path, source }
            }
        }
    }
}
