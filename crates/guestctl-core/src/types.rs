//! Core type definitions shared across guestctl crates

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Timestamp layout used in event log lines
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Event severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[serde(alias = "debug")]
    Debug,
    #[default]
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "WARN", alias = "warning", alias = "warn")]
    Warning,
    #[serde(alias = "error")]
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Invalid level: {}", s)),
        }
    }
}

/// One line of a workspace's append-only event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
}

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] \[([A-Z]+)\] (.*)$")
            .expect("event line pattern is valid")
    })
}

impl EventRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }

    /// Render as a single log line (no trailing newline)
    ///
    /// Line breaks inside the message are escaped so one record is always one line.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format(LOG_TIMESTAMP_FORMAT),
            self.level,
            escape_message(&self.message)
        )
    }

    /// Parse a line produced by [`EventRecord::to_line`]
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = line_pattern().captures(line.trim_end_matches(['\r', '\n']))?;
        let naive = NaiveDateTime::parse_from_str(&caps[1], LOG_TIMESTAMP_FORMAT).ok()?;
        let level = caps[2].parse().ok()?;
        Some(Self {
            timestamp: Utc.from_utc_datetime(&naive),
            level,
            message: unescape_message(&caps[3]),
        })
    }
}

fn escape_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_message(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A saved operator note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEntry {
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// File name inside the workspace notes area
    pub file: String,
}

/// A captured screen image stored in a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Opaque identifier, unique within its workspace
    pub id: String,
    /// Absolute location of the stored image
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Resource URI handed to external callers
    pub uri: String,
}

impl Artifact {
    /// Resource URI for an artifact id
    pub fn uri_for(id: &str) -> String {
        format!("vm://screenshot/{}", id)
    }
}

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Lifecycle state of the remote connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    /// The transport reported the session gone; it is never reopened implicitly
    Lost,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Lost => write!(f, "lost"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Liveness snapshot of the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub display: String,
    pub identity_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("WARN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!(" error ".parse::<Level>().unwrap(), Level::Error);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_serde_accepts_lowercase() {
        let level: Level = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, Level::Warning);
        assert_eq!(serde_json::to_string(&Level::Info).unwrap(), "\"INFO\"");
    }

    #[test]
    fn test_event_line_format() {
        let record = EventRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap(),
            level: Level::Warning,
            message: "disk almost full".into(),
        };
        assert_eq!(record.to_line(), "[2024-05-01 13:04:05] [WARNING] disk almost full");
        assert_eq!(EventRecord::parse_line(&record.to_line()), Some(record));
    }

    #[test]
    fn test_multiline_message_stays_on_one_line() {
        let record = EventRecord::new(Level::Error, "first\nsecond \\ third");
        let line = record.to_line();
        assert!(!line.contains('\n'));

        let parsed = EventRecord::parse_line(&line).unwrap();
        assert_eq!(parsed.message, "first\nsecond \\ third");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(EventRecord::parse_line("not a log line").is_none());
        assert!(EventRecord::parse_line("[2024-05-01 13:04:05] [LOUD] hi").is_none());
    }

    #[test]
    fn test_artifact_uri() {
        assert_eq!(Artifact::uri_for("abc"), "vm://screenshot/abc");
    }
}
