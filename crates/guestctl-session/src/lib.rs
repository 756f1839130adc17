//! # guestctl-session
//!
//! The orchestration object a dispatcher talks to.
//!
//! A `Session` owns the connection, the active-workspace registry and the
//! audit log. Every `Operation` goes through `Session::dispatch`, which runs
//! it and records an audit line in the active workspace.

mod audit;
mod operation;
mod session;

pub use audit::{truncate_param, AuditLog};
pub use operation::{Operation, OperationOutput};
pub use session::Session;
