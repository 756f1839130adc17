//! # guestctl-remote
//!
//! The one connection a guestctl session holds to its target host.
//!
//! This crate provides:
//! - The `Transport` abstraction over a remote shell
//! - An OpenSSH control-master transport
//! - An in-memory mock transport for tests
//! - `ConnectionManager`, which serializes, times out and tracks liveness
//!   of every remote call

mod manager;
pub mod mock;
mod ssh;
mod transport;

pub use manager::ConnectionManager;
pub use mock::MockTransport;
pub use ssh::{shell_quote, OpenSshTransport};
pub use transport::Transport;
