//! Single UI primitives as `xdotool` commands

use guestctl_core::{ActionStep, GuestError, InputConfig, MouseButton, PointerMode, Result};
use guestctl_remote::{shell_quote, ConnectionManager, Transport};
use std::time::Duration;
use tracing::{debug, instrument};

/// Canonical xdotool spelling of a modifier, if `key` is one
fn modifier(key: &str) -> Option<&'static str> {
    match key.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => Some("ctrl"),
        "alt" => Some("alt"),
        "shift" => Some("shift"),
        "super" | "cmd" | "win" | "meta" => Some("super"),
        _ => None,
    }
}

/// Normalize one key name for an xdotool key combination
///
/// Modifiers and single characters are lowercased; named keys such as
/// `Return` or `F5` are passed through unchanged.
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if let Some(m) = modifier(key) {
        return m.to_string();
    }
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_lowercase().collect(),
        _ => key.to_string(),
    }
}

pub(crate) fn move_command(x: i32, y: i32, mode: PointerMode) -> String {
    match mode {
        PointerMode::Absolute => format!("xdotool mousemove --sync {} {}", x, y),
        // `--` keeps negative offsets from being read as options
        PointerMode::Relative => format!("xdotool mousemove_relative --sync -- {} {}", x, y),
    }
}

pub(crate) fn click_command(button: MouseButton, count: u32) -> String {
    format!("xdotool click --repeat {} {}", count, button.number())
}

pub(crate) fn type_command(text: &str, delay_ms: u64) -> String {
    format!("xdotool type --delay {} -- {}", delay_ms, shell_quote(text))
}

pub(crate) fn key_command(keys: &[String]) -> String {
    let combo = keys
        .iter()
        .map(|k| normalize_key(k))
        .collect::<Vec<_>>()
        .join("+");
    format!("xdotool key {}", shell_quote(&combo))
}

/// Runs UI primitives against the remote display
pub struct ActionExecutor<'a, T: Transport> {
    conn: &'a ConnectionManager<T>,
    input: InputConfig,
}

impl<'a, T: Transport> ActionExecutor<'a, T> {
    pub fn new(conn: &'a ConnectionManager<T>, input: InputConfig) -> Self {
        Self { conn, input }
    }

    pub fn input(&self) -> &InputConfig {
        &self.input
    }

    async fn run_ui(&self, action: &str, command: String) -> Result<()> {
        let output = self.conn.execute_ui(&command).await?;
        if output.success() {
            return Ok(());
        }
        Err(GuestError::Action {
            action: action.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }

    pub async fn move_pointer(&self, x: i32, y: i32, mode: PointerMode) -> Result<()> {
        self.run_ui("move_mouse", move_command(x, y, mode)).await
    }

    pub async fn click(&self, button: MouseButton, count: u32) -> Result<()> {
        self.run_ui("click", click_command(button, count)).await
    }

    /// Type literal text, paced per character by the remote tool
    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.run_ui("type_text", type_command(text, self.input.type_delay_ms))
            .await
    }

    pub async fn press_keys(&self, keys: &[String]) -> Result<()> {
        self.run_ui("press_keys", key_command(keys)).await
    }

    /// Local sleep; the remote host is not contacted
    pub async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Run a step that has already passed validation
    #[instrument(skip(self), fields(action = step.name()))]
    pub async fn run_step(&self, step: &ActionStep) -> Result<()> {
        debug!("{}", step.summary());
        match step {
            ActionStep::MoveMouse { x, y, mode } => self.move_pointer(*x, *y, *mode).await,
            ActionStep::Click { button, count } => self.click(*button, *count).await,
            ActionStep::TypeText { text } => self.type_text(text).await,
            ActionStep::PressKeys { keys } => self.press_keys(keys).await,
            ActionStep::Wait { .. } => {
                let duration = step.pause_duration().ok_or_else(|| GuestError::Validation {
                    index: 0,
                    reason: "wait duration out of range".into(),
                })?;
                self.pause(duration).await;
                Ok(())
            }
        }
    }

    /// Validate and run a single step
    pub async fn perform(&self, step: &ActionStep) -> Result<()> {
        step.validate(self.input.max_pause_secs)
            .map_err(|reason| GuestError::Validation { index: 0, reason })?;
        self.run_step(step).await
    }
}
