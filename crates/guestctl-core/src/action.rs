//! UI automation steps and batch results

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ErrorKind;

/// How pointer coordinates are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerMode {
    #[default]
    Absolute,
    Relative,
}

impl std::fmt::Display for PointerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absolute => write!(f, "absolute"),
            Self::Relative => write!(f, "relative"),
        }
    }
}

impl std::str::FromStr for PointerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "absolute" => Ok(Self::Absolute),
            "relative" => Ok(Self::Relative),
            _ => Err(format!("mode must be 'absolute' or 'relative', got '{}'", s)),
        }
    }
}

/// Mouse button
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// X11 button number
    pub fn number(self) -> u8 {
        match self {
            Self::Left => 1,
            Self::Middle => 2,
            Self::Right => 3,
        }
    }
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Middle => write!(f, "middle"),
            Self::Right => write!(f, "right"),
        }
    }
}

impl std::str::FromStr for MouseButton {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "middle" => Ok(Self::Middle),
            "right" => Ok(Self::Right),
            _ => Err(format!("button must be left/middle/right, got '{}'", s)),
        }
    }
}

fn default_count() -> u32 {
    1
}

/// One UI automation primitive
///
/// Wire form is a JSON object tagged by `action`:
///
/// ```
/// use guestctl_core::ActionStep;
///
/// let step: ActionStep =
///     serde_json::from_str(r#"{"action": "press_keys", "keys": ["Ctrl", "L"]}"#).unwrap();
/// assert_eq!(step.name(), "press_keys");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum ActionStep {
    /// Move the pointer to (or by) the given coordinates
    #[serde(alias = "move_pointer")]
    MoveMouse {
        x: i32,
        y: i32,
        #[serde(default)]
        mode: PointerMode,
    },
    /// Click a button `count` times
    Click {
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_count")]
        count: u32,
    },
    /// Type a literal string
    TypeText { text: String },
    /// Press a key combination, e.g. `["Ctrl", "Shift", "p"]`
    PressKeys { keys: Vec<String> },
    /// Sleep locally without touching the remote host
    #[serde(alias = "pause")]
    Wait { seconds: f64 },
}

impl ActionStep {
    /// Wire name of this step's variant
    pub fn name(&self) -> &'static str {
        match self {
            Self::MoveMouse { .. } => "move_mouse",
            Self::Click { .. } => "click",
            Self::TypeText { .. } => "type_text",
            Self::PressKeys { .. } => "press_keys",
            Self::Wait { .. } => "wait",
        }
    }

    /// Structural checks that must pass before any remote command is issued
    pub fn validate(&self, max_pause_secs: f64) -> Result<(), String> {
        match self {
            Self::MoveMouse { .. } | Self::TypeText { .. } => Ok(()),
            Self::Click { count, .. } => {
                if *count == 0 {
                    Err("click count must be at least 1".into())
                } else {
                    Ok(())
                }
            }
            Self::PressKeys { keys } => {
                if keys.is_empty() {
                    return Err("press_keys needs at least one key".into());
                }
                if let Some(bad) = keys
                    .iter()
                    .find(|k| k.trim().is_empty() || k.chars().any(char::is_whitespace))
                {
                    return Err(format!("invalid key name '{}'", bad));
                }
                Ok(())
            }
            Self::Wait { seconds } => {
                if !seconds.is_finite() || *seconds < 0.0 {
                    Err(format!("wait seconds must be a non-negative number, got {}", seconds))
                } else if *seconds > max_pause_secs {
                    Err(format!(
                        "wait of {}s exceeds the {}s limit",
                        seconds, max_pause_secs
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Pause duration for a validated `Wait` step
    pub fn pause_duration(&self) -> Option<Duration> {
        match self {
            Self::Wait { seconds } => Duration::try_from_secs_f64(*seconds).ok(),
            _ => None,
        }
    }

    /// Short human-readable description, safe to log
    pub fn summary(&self) -> String {
        match self {
            Self::MoveMouse { x, y, mode } => format!("move_mouse ({}, {}) [{}]", x, y, mode),
            Self::Click { button, count } => format!("click {} x{}", button, count),
            Self::TypeText { text } => format!("type_text ({} chars)", text.chars().count()),
            Self::PressKeys { keys } => format!("press_keys [{}]", keys.join(", ")),
            Self::Wait { seconds } => format!("wait {}s", seconds),
        }
    }
}

/// Where and why a batch stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Zero-based index of the failing step
    pub index: usize,
    pub action: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of running a batch of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    /// Number of steps that finished successfully
    pub completed: usize,
    /// Summary line per completed step, in execution order
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<BatchFailure>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.completed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let step: ActionStep = serde_json::from_str(r#"{"action": "click"}"#).unwrap();
        assert_eq!(
            step,
            ActionStep::Click {
                button: MouseButton::Left,
                count: 1
            }
        );

        let step: ActionStep =
            serde_json::from_str(r#"{"action": "move_mouse", "x": 5, "y": -3}"#).unwrap();
        assert_eq!(
            step,
            ActionStep::MoveMouse {
                x: 5,
                y: -3,
                mode: PointerMode::Absolute
            }
        );
    }

    #[test]
    fn test_aliases() {
        let step: ActionStep = serde_json::from_str(r#"{"action": "pause", "seconds": 0.5}"#).unwrap();
        assert_eq!(step.name(), "wait");
        assert_eq!(step.pause_duration(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_missing_required_field() {
        let err = serde_json::from_str::<ActionStep>(r#"{"action": "type_text"}"#).unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(serde_json::from_str::<ActionStep>(r#"{"action": "teleport"}"#).is_err());
    }

    #[test]
    fn test_bad_enum_values() {
        assert!(serde_json::from_str::<ActionStep>(
            r#"{"action": "click", "button": "side"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<ActionStep>(
            r#"{"action": "move_mouse", "x": 1, "y": 1, "mode": "diagonal"}"#
        )
        .is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ActionStep::Click {
            button: MouseButton::Right,
            count: 0
        }
        .validate(300.0)
        .is_err());
        assert!(ActionStep::PressKeys { keys: vec![] }.validate(300.0).is_err());
        assert!(ActionStep::PressKeys {
            keys: vec!["ctrl".into(), "page down".into()]
        }
        .validate(300.0)
        .is_err());
        assert!(ActionStep::Wait { seconds: -1.0 }.validate(300.0).is_err());
        assert!(ActionStep::Wait { seconds: f64::NAN }.validate(300.0).is_err());
        assert!(ActionStep::Wait { seconds: 301.0 }.validate(300.0).is_err());
        assert!(ActionStep::Wait { seconds: 0.0 }.validate(300.0).is_ok());
    }

    #[test]
    fn test_summary_hides_text() {
        let step = ActionStep::TypeText {
            text: "hunter2".into(),
        };
        assert_eq!(step.summary(), "type_text (7 chars)");
    }

    #[test]
    fn test_button_numbers() {
        assert_eq!(MouseButton::Left.number(), 1);
        assert_eq!(MouseButton::Middle.number(), 2);
        assert_eq!(MouseButton::Right.number(), 3);
    }
}
