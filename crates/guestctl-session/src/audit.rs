//! Audit records for dispatched operations
//!
//! Line format:
//!
//! ```text
//! TOOL: ui.type(text="hello") -> type_text (5 chars)
//! TOOL: remote.download(remote_path="/x", local_path="out") failed [not_found]: Not found: remote file /x
//! ```

use guestctl_core::fail_open::fail_open;
use guestctl_core::{GuestError, Level};
use guestctl_workspace::Workspace;
use serde_json::Value;
use tracing::debug;

use crate::OperationOutput;

/// Cut `value` to `max_chars` characters, marking how much was dropped
///
/// ```
/// use guestctl_session::truncate_param;
///
/// assert_eq!(truncate_param("abcdef", 4), "abcd…(+2 chars)");
/// assert_eq!(truncate_param("abc", 4), "abc");
/// ```
pub fn truncate_param(value: &str, max_chars: usize) -> String {
    let total = value.chars().count();
    if total <= max_chars {
        return value.to_string();
    }
    let kept: String = value.chars().take(max_chars).collect();
    format!("{}…(+{} chars)", kept, total - max_chars)
}

/// Formats and stores one audit line per dispatched operation
#[derive(Debug, Clone)]
pub struct AuditLog {
    max_param_chars: usize,
}

impl AuditLog {
    pub fn new(max_param_chars: usize) -> Self {
        Self { max_param_chars }
    }

    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("\"{}\"", truncate_param(s, self.max_param_chars)),
            other => truncate_param(&other.to_string(), self.max_param_chars),
        }
    }

    /// `name(k=v, …)` with long values truncated
    pub fn call_signature(&self, name: &str, params: &[(&str, Value)]) -> String {
        let rendered = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, self.render_value(value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", name, rendered)
    }

    /// Audit line and severity for an outcome
    pub fn format_outcome(
        &self,
        signature: &str,
        outcome: Result<&OperationOutput, &GuestError>,
    ) -> (Level, String) {
        match outcome {
            Ok(OperationOutput::Batch(batch)) if batch.failure.is_some() => {
                let (kind, detail) = batch
                    .failure
                    .as_ref()
                    .map(|f| {
                        (
                            f.kind.to_string(),
                            format!("step {} ({}): {}", f.index, f.action, f.message),
                        )
                    })
                    .unwrap_or_default();
                (
                    Level::Error,
                    format!("TOOL: {} failed [{}]: {}", signature, kind, detail),
                )
            }
            Ok(output) => (
                Level::Info,
                format!("TOOL: {} -> {}", signature, output.summary()),
            ),
            Err(e) => (
                Level::Error,
                format!("TOOL: {} failed [{}]: {}", signature, e.kind(), e),
            ),
        }
    }

    /// Append the audit line to `workspace`
    ///
    /// The caller passes the workspace the operation ran against, still
    /// guarded. Without one the record is dropped. Storage failures are
    /// logged and swallowed; they never change the operation's result.
    pub async fn record(
        &self,
        workspace: Option<&Workspace>,
        name: &str,
        params: &[(&str, Value)],
        outcome: Result<&OperationOutput, &GuestError>,
    ) {
        let signature = self.call_signature(name, params);
        let (level, line) = self.format_outcome(&signature, outcome);

        let Some(workspace) = workspace else {
            debug!("No active workspace; audit dropped: {}", line);
            return;
        };
        fail_open("audit::record", || workspace.append_event(level, &line)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestctl_core::{BatchFailure, BatchResult, ErrorKind, ExecOutput};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_param("ééééé", 2), "éé…(+3 chars)");
        assert_eq!(truncate_param("", 2), "");
    }

    #[test]
    fn test_call_signature() {
        let audit = AuditLog::new(5);
        let sig = audit.call_signature(
            "ui.type",
            &[("text", json!("hello world")), ("count", json!(3))],
        );
        assert_eq!(sig, "ui.type(text=\"hello…(+6 chars)\", count=3)");
        assert_eq!(audit.call_signature("artifact.capture", &[]), "artifact.capture()");
    }

    #[test]
    fn test_format_success_and_failure() {
        let audit = AuditLog::new(200);
        let out = OperationOutput::Exec(ExecOutput {
            exit_code: 0,
            ..Default::default()
        });
        let (level, line) = audit.format_outcome("remote.execute(command=\"ls\")", Ok(&out));
        assert_eq!(level, Level::Info);
        assert_eq!(line, "TOOL: remote.execute(command=\"ls\") -> exit 0");

        let err = GuestError::NoActiveWorkspace;
        let (level, line) = audit.format_outcome("workspace.info()", Err(&err));
        assert_eq!(level, Level::Error);
        assert!(line.starts_with("TOOL: workspace.info() failed [no_active_workspace]: "));
    }

    #[test]
    fn test_stopped_batch_is_error() {
        let audit = AuditLog::new(200);
        let out = OperationOutput::Batch(BatchResult {
            total: 3,
            completed: 1,
            steps: vec!["move_mouse (10, 10) [absolute]".into()],
            failure: Some(BatchFailure {
                index: 1,
                action: "click".into(),
                kind: ErrorKind::Action,
                message: "boom".into(),
            }),
        });
        let (level, line) = audit.format_outcome("ui.run_batch(steps=[])", Ok(&out));
        assert_eq!(level, Level::Error);
        assert_eq!(
            line,
            "TOOL: ui.run_batch(steps=[]) failed [action_error]: step 1 (click): boom"
        );
    }

    #[tokio::test]
    async fn test_record_without_workspace_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let audit = AuditLog::new(200);

        let out = OperationOutput::Ack {
            message: "ok".into(),
        };
        audit.record(None, "ui.click", &[], Ok(&out)).await;
        assert!(std::fs::read_dir(temp_dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_record_appends_to_given_workspace() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "audit", "").await.unwrap();
        let audit = AuditLog::new(200);

        let out = OperationOutput::Ack {
            message: "click left x1".into(),
        };
        audit
            .record(Some(&ws), "ui.click", &[("button", json!("left"))], Ok(&out))
            .await;

        let page = ws.read_events(Some(1), None).await.unwrap();
        assert_eq!(
            page.records[0].message,
            "TOOL: ui.click(button=\"left\") -> click left x1"
        );
    }
}
