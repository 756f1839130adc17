//! Screen capture on the remote display

use guestctl_core::fail_open::fail_open;
use guestctl_core::{Artifact, GuestError, Level, Result};
use guestctl_remote::{shell_quote, ConnectionManager, Transport};
use guestctl_workspace::{Reservation, Workspace};
use tracing::info;

async fn fetch<T: Transport>(
    conn: &ConnectionManager<T>,
    reservation: &Reservation,
    remote_tmp: &str,
) -> Result<()> {
    let output = conn
        .execute_ui(&format!("scrot {}", shell_quote(remote_tmp)))
        .await?;
    if !output.success() {
        return Err(GuestError::Action {
            action: "capture".to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    let downloaded = conn.download(remote_tmp, &reservation.path).await;
    fail_open("capture::remove_remote_tmp", || conn.remove_remote(remote_tmp)).await;
    downloaded
}

/// Capture the remote screen into the workspace's screenshots area
///
/// The artifact id is reserved before anything runs remotely and released
/// again if the capture or download fails.
pub async fn capture_screenshot<T: Transport>(
    conn: &ConnectionManager<T>,
    workspace: &Workspace,
) -> Result<Artifact> {
    let store = workspace.artifacts();
    let reservation = store.allocate().await?;
    let remote_tmp = format!("/tmp/guestctl-{}.png", reservation.id);

    if let Err(e) = fetch(conn, &reservation, &remote_tmp).await {
        store.discard(reservation).await;
        return Err(e);
    }

    let artifact = store.commit(reservation).await?;
    let message = format!("Screenshot captured: {}", artifact.id);
    fail_open("capture::log_event", || {
        workspace.append_event(Level::Info, &message)
    })
    .await;
    info!("{} ({} bytes)", message, artifact.size_bytes);
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestctl_core::ConnectionConfig;
    use guestctl_remote::mock::FAKE_PNG;
    use guestctl_remote::MockTransport;
    use tempfile::TempDir;

    fn conn(mock: MockTransport) -> ConnectionManager<MockTransport> {
        let config = ConnectionConfig {
            host: "vm".into(),
            user: "robot".into(),
            ..Default::default()
        };
        ConnectionManager::with_transport(mock, config)
    }

    #[tokio::test]
    async fn test_capture_stores_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "shots", "").await.unwrap();
        let mock = MockTransport::new();
        let conn = conn(mock.clone());

        let artifact = capture_screenshot(&conn, &ws).await.unwrap();

        assert_eq!(std::fs::read(&artifact.path).unwrap(), FAKE_PNG);
        assert_eq!(artifact.size_bytes, FAKE_PNG.len() as u64);
        let remote_tmp = format!("/tmp/guestctl-{}.png", artifact.id);
        assert!(mock.remote_file(&remote_tmp).is_none());
        assert!(mock.commands()[0].starts_with("DISPLAY=':0' scrot "));

        let log = ws.read_events(None, None).await.unwrap();
        assert_eq!(
            log.records.last().unwrap().message,
            format!("Screenshot captured: {}", artifact.id)
        );
    }

    #[tokio::test]
    async fn test_failed_capture_releases_reservation() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "shots", "").await.unwrap();
        let conn = conn(MockTransport::new().with_failure("scrot", 2, "Can't open X display"));

        let err = capture_screenshot(&conn, &ws).await.unwrap_err();
        assert!(matches!(err, GuestError::Action { .. }));
        assert_eq!(ws.artifacts().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_capture_when_disconnected() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "shots", "").await.unwrap();
        let mock = MockTransport::new();
        mock.disconnect();
        let conn = conn(mock);

        let err = capture_screenshot(&conn, &ws).await.unwrap_err();
        assert!(matches!(err, GuestError::Connectivity(_)));
        assert_eq!(ws.artifacts().count().await.unwrap(), 0);
    }
}
