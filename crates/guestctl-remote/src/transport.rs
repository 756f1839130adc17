//! Remote shell transport abstraction

use async_trait::async_trait;
use guestctl_core::{ExecOutput, Result};
use std::path::Path;

/// Trait for driving a remote shell (allows mocking in tests)
///
/// Implementations report a dead session as `GuestError::Connectivity`.
/// A nonzero remote exit status is *not* an error at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a shell command line on the remote host
    async fn run(&self, command: &str) -> Result<ExecOutput>;

    /// Copy a local file to a remote path whose parent already exists
    async fn put(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy an existing remote file to a local path whose parent already exists
    async fn get(&self, remote: &str, local: &Path) -> Result<()>;

    /// Release the session
    async fn shutdown(&self) -> Result<()>;

    /// `user@host` this transport talks to
    fn target(&self) -> &str;
}
