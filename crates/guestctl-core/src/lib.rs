//! # guestctl-core
//!
//! Core types for guestctl, a session orchestrator that drives a remote
//! graphical guest over SSH.
//!
//! ## Concepts
//!
//! - One long-lived connection per session, owned by `guestctl-remote`
//! - Workspaces are local directories holding logs, results, notes and artifacts
//! - UI automation is expressed as validated [`ActionStep`]s
//! - Every failure carries a stable [`ErrorKind`]

mod action;
mod config;
mod error;
pub mod fail_open;
mod types;

pub use action::{ActionStep, BatchFailure, BatchResult, MouseButton, PointerMode};
pub use config::{
    AuditConfig, ConnectionConfig, GuestConfig, InputConfig, WorkspaceConfig, ENV_DISPLAY,
    ENV_HOST, ENV_IDENTITY, ENV_PORT, ENV_USER, ENV_WORKSPACES,
};
pub use error::{ErrorKind, GuestError, Result};
pub use types::*;
