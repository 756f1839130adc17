//! Fail-open helpers for best-effort side work
//!
//! Audit records and remote temp-file cleanup use these. The primary
//! operation's result must never depend on them.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run a best-effort operation, logging and swallowing any error
///
/// ```no_run
/// use guestctl_core::fail_open::fail_open;
/// use guestctl_core::Result;
///
/// async fn append_audit() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("audit", || append_audit()).await;
///     // None if the append failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GuestError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("audit", || async { Ok::<_, GuestError>(7) }).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("audit", || async {
            Err::<(), _>(GuestError::NoActiveWorkspace)
        })
        .await;
        assert_eq!(result, None);
    }
}
