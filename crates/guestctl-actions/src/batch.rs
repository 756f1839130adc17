//! Ordered batches of UI steps

use guestctl_core::{ActionStep, BatchFailure, BatchResult, GuestError, Result};
use guestctl_remote::Transport;
use serde_json::Value;
use tracing::{info, warn};

use crate::ActionExecutor;

/// Runs steps strictly in order, stopping at the first failure
///
/// Every step is checked before step 0 runs, so a malformed batch fails
/// with `Validation` and never leaves partial remote side effects.
pub struct BatchRunner<'a, T: Transport> {
    executor: ActionExecutor<'a, T>,
}

impl<'a, T: Transport> BatchRunner<'a, T> {
    pub fn new(executor: ActionExecutor<'a, T>) -> Self {
        Self { executor }
    }

    /// Decode raw JSON steps, reporting the index of the first bad one
    pub fn parse_steps(values: &[Value]) -> Result<Vec<ActionStep>> {
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                serde_json::from_value(value.clone()).map_err(|e| GuestError::Validation {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Structural checks for every step
    pub fn validate(steps: &[ActionStep], max_pause_secs: f64) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            step.validate(max_pause_secs)
                .map_err(|reason| GuestError::Validation { index, reason })?;
        }
        Ok(())
    }

    /// Validate, then execute
    ///
    /// Validation problems are returned as `Err`. A step failing at run time
    /// is reported inside the `BatchResult`; earlier steps stay done.
    pub async fn run(&self, steps: &[ActionStep]) -> Result<BatchResult> {
        Self::validate(steps, self.executor.input().max_pause_secs)?;

        let mut result = BatchResult {
            total: steps.len(),
            completed: 0,
            steps: Vec::with_capacity(steps.len()),
            failure: None,
        };

        for (index, step) in steps.iter().enumerate() {
            if let Err(e) = self.executor.run_step(step).await {
                warn!("Batch stopped at step {} ({}): {}", index, step.name(), e);
                result.failure = Some(BatchFailure {
                    index,
                    action: step.name().to_string(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                return Ok(result);
            }
            result.completed += 1;
            result.steps.push(step.summary());
        }

        info!("Batch completed: {} steps", result.completed);
        Ok(result)
    }

    /// Decode, validate and run raw JSON steps
    pub async fn run_values(&self, values: &[Value]) -> Result<BatchResult> {
        let steps = Self::parse_steps(values)?;
        self.run(&steps).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guestctl_core::{ConnectionConfig, ErrorKind, InputConfig};
    use guestctl_remote::{ConnectionManager, MockTransport};
    use serde_json::json;

    fn conn(mock: MockTransport) -> ConnectionManager<MockTransport> {
        let config = ConnectionConfig {
            host: "vm".into(),
            user: "robot".into(),
            ..Default::default()
        };
        ConnectionManager::with_transport(mock, config)
    }

    fn runner(conn: &ConnectionManager<MockTransport>) -> BatchRunner<'_, MockTransport> {
        BatchRunner::new(ActionExecutor::new(conn, InputConfig::default()))
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order() {
        let mock = MockTransport::new();
        let conn = conn(mock.clone());

        let result = runner(&conn)
            .run_values(&[
                json!({"action": "move_mouse", "x": 10, "y": 10}),
                json!({"action": "wait", "seconds": 0}),
                json!({"action": "wait", "seconds": 0}),
                json!({"action": "press_keys", "keys": ["Return"]}),
            ])
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.completed, 4);
        assert_eq!(result.steps.len(), 4);
        let commands = mock.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].ends_with("xdotool mousemove --sync 10 10"));
        assert!(commands[1].ends_with("xdotool key 'Return'"));
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let mock = MockTransport::new().with_failure("xdotool click", 1, "click failed");
        let conn = conn(mock.clone());

        let result = runner(&conn)
            .run_values(&[
                json!({"action": "move_mouse", "x": 10, "y": 10, "mode": "absolute"}),
                json!({"action": "click", "button": "left", "count": 1}),
                json!({"action": "type_text", "text": "hi"}),
            ])
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.total, 3);
        assert_eq!(result.completed, 1);
        let failure = result.failure.unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.action, "click");
        assert_eq!(failure.kind, ErrorKind::Action);
        assert!(!mock.commands().iter().any(|c| c.contains("xdotool type")));
    }

    #[tokio::test]
    async fn test_malformed_step_runs_nothing() {
        let mock = MockTransport::new();
        let conn = conn(mock.clone());

        let err = runner(&conn)
            .run_values(&[
                json!({"action": "click"}),
                json!({"action": "type_text", "text": "ok"}),
                json!({"action": "type_text"}),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, GuestError::Validation { index: 2, .. }));
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_values_fail_validation() {
        let mock = MockTransport::new();
        let conn = conn(mock.clone());

        let err = runner(&conn)
            .run_values(&[
                json!({"action": "move_mouse", "x": 1, "y": 1}),
                json!({"action": "wait", "seconds": 100000}),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, GuestError::Validation { index: 1, .. }));
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn test_connectivity_loss_stops_batch() {
        let mock = MockTransport::new();
        let conn = conn(mock.clone());
        mock.disconnect();

        let result = runner(&conn)
            .run_values(&[json!({"action": "click"}), json!({"action": "click"})])
            .await
            .unwrap();

        assert_eq!(result.completed, 0);
        let failure = result.failure.unwrap();
        assert_eq!(failure.index, 0);
        assert_eq!(failure.kind, ErrorKind::Connectivity);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let conn = conn(MockTransport::new());
        let result = runner(&conn).run(&[]).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.total, 0);
    }
}
