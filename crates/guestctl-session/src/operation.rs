//! Named operations and their results

use guestctl_core::{
    ActionStep, Artifact, BatchResult, ConnectionStatus, ExecOutput, Level, MouseButton,
    NoteEntry, PointerMode,
};
use guestctl_workspace::{LogPage, WorkspaceInfo, WorkspaceSummary};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

fn default_count() -> u32 {
    1
}

/// A request from the outer dispatcher
///
/// JSON form is tagged by `op`, e.g.
/// `{"op": "remote.execute", "command": "uname -a"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Operation {
    #[serde(rename = "connection.status")]
    ConnectionStatus,

    #[serde(rename = "remote.execute")]
    Execute { command: String },

    #[serde(rename = "remote.upload")]
    Upload {
        local_path: PathBuf,
        remote_path: String,
    },

    #[serde(rename = "remote.download")]
    Download {
        remote_path: String,
        local_path: PathBuf,
    },

    #[serde(rename = "workspace.initialize")]
    InitializeWorkspace {
        name: String,
        #[serde(default)]
        description: String,
    },

    #[serde(rename = "workspace.load")]
    LoadWorkspace { path: String },

    #[serde(rename = "workspace.list")]
    ListWorkspaces,

    #[serde(rename = "workspace.info")]
    WorkspaceInfo,

    #[serde(rename = "workspace.log")]
    Log {
        message: String,
        #[serde(default)]
        level: Level,
    },

    #[serde(rename = "workspace.read_logs")]
    ReadLogs {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        level: Option<Level>,
    },

    #[serde(rename = "workspace.save_result")]
    SaveResult { filename: String, content: String },

    #[serde(rename = "workspace.save_advice")]
    SaveAdvice { title: String, content: String },

    #[serde(rename = "workspace.read_advice")]
    ReadAdvice,

    #[serde(rename = "ui.move")]
    Move {
        x: i32,
        y: i32,
        #[serde(default)]
        mode: PointerMode,
    },

    #[serde(rename = "ui.click")]
    Click {
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_count")]
        count: u32,
    },

    #[serde(rename = "ui.type")]
    Type { text: String },

    #[serde(rename = "ui.keys")]
    Keys { keys: Vec<String> },

    #[serde(rename = "ui.wait")]
    Wait { seconds: f64 },

    /// Steps stay raw so a malformed one is reported with its index
    #[serde(rename = "ui.run_batch")]
    RunBatch { steps: Vec<Value> },

    #[serde(rename = "artifact.capture")]
    Capture,

    #[serde(rename = "artifact.resolve")]
    Resolve { id: String },

    #[serde(rename = "artifact.list")]
    ListArtifacts,
}

impl Operation {
    /// Wire name, e.g. `remote.execute`
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStatus => "connection.status",
            Self::Execute { .. } => "remote.execute",
            Self::Upload { .. } => "remote.upload",
            Self::Download { .. } => "remote.download",
            Self::InitializeWorkspace { .. } => "workspace.initialize",
            Self::LoadWorkspace { .. } => "workspace.load",
            Self::ListWorkspaces => "workspace.list",
            Self::WorkspaceInfo => "workspace.info",
            Self::Log { .. } => "workspace.log",
            Self::ReadLogs { .. } => "workspace.read_logs",
            Self::SaveResult { .. } => "workspace.save_result",
            Self::SaveAdvice { .. } => "workspace.save_advice",
            Self::ReadAdvice => "workspace.read_advice",
            Self::Move { .. } => "ui.move",
            Self::Click { .. } => "ui.click",
            Self::Type { .. } => "ui.type",
            Self::Keys { .. } => "ui.keys",
            Self::Wait { .. } => "ui.wait",
            Self::RunBatch { .. } => "ui.run_batch",
            Self::Capture => "artifact.capture",
            Self::Resolve { .. } => "artifact.resolve",
            Self::ListArtifacts => "artifact.list",
        }
    }

    /// Arguments in declaration order, for audit lines
    pub fn params(&self) -> Vec<(&'static str, Value)> {
        match self {
            Self::ConnectionStatus
            | Self::ListWorkspaces
            | Self::WorkspaceInfo
            | Self::ReadAdvice
            | Self::Capture
            | Self::ListArtifacts => Vec::new(),
            Self::Execute { command } => vec![("command", json!(command))],
            Self::Upload {
                local_path,
                remote_path,
            } => vec![
                ("local_path", json!(local_path)),
                ("remote_path", json!(remote_path)),
            ],
            Self::Download {
                remote_path,
                local_path,
            } => vec![
                ("remote_path", json!(remote_path)),
                ("local_path", json!(local_path)),
            ],
            Self::InitializeWorkspace { name, description } => {
                vec![("name", json!(name)), ("description", json!(description))]
            }
            Self::LoadWorkspace { path } => vec![("path", json!(path))],
            Self::Log { message, level } => {
                vec![("message", json!(message)), ("level", json!(level))]
            }
            Self::ReadLogs { limit, level } => {
                vec![("limit", json!(limit)), ("level", json!(level))]
            }
            Self::SaveResult { filename, content } => {
                vec![("filename", json!(filename)), ("content", json!(content))]
            }
            Self::SaveAdvice { title, content } => {
                vec![("title", json!(title)), ("content", json!(content))]
            }
            Self::Resolve { id } => vec![("id", json!(id))],
            Self::RunBatch { steps } => vec![("steps", json!(steps))],
            Self::Move { .. }
            | Self::Click { .. }
            | Self::Type { .. }
            | Self::Keys { .. }
            | Self::Wait { .. } => match self.as_step() {
                Some(ActionStep::MoveMouse { x, y, mode }) => {
                    vec![("x", json!(x)), ("y", json!(y)), ("mode", json!(mode))]
                }
                Some(ActionStep::Click { button, count }) => {
                    vec![("button", json!(button)), ("count", json!(count))]
                }
                Some(ActionStep::TypeText { text }) => vec![("text", json!(text))],
                Some(ActionStep::PressKeys { keys }) => vec![("keys", json!(keys))],
                Some(ActionStep::Wait { seconds }) => vec![("seconds", json!(seconds))],
                None => Vec::new(),
            },
        }
    }

    /// The UI step behind a single `ui.*` operation
    pub fn as_step(&self) -> Option<ActionStep> {
        match self {
            Self::Move { x, y, mode } => Some(ActionStep::MoveMouse {
                x: *x,
                y: *y,
                mode: *mode,
            }),
            Self::Click { button, count } => Some(ActionStep::Click {
                button: *button,
                count: *count,
            }),
            Self::Type { text } => Some(ActionStep::TypeText { text: text.clone() }),
            Self::Keys { keys } => Some(ActionStep::PressKeys { keys: keys.clone() }),
            Self::Wait { seconds } => Some(ActionStep::Wait { seconds: *seconds }),
            _ => None,
        }
    }
}

/// What an operation produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationOutput {
    Status(ConnectionStatus),
    Exec(ExecOutput),
    Ack {
        message: String,
    },
    Workspace(WorkspaceSummary),
    Loaded {
        workspace: WorkspaceSummary,
        notes: Vec<NoteEntry>,
    },
    Workspaces {
        workspaces: Vec<WorkspaceSummary>,
    },
    Info(WorkspaceInfo),
    Logs(LogPage),
    Saved {
        path: PathBuf,
    },
    Note(NoteEntry),
    Notes {
        notes: Vec<NoteEntry>,
    },
    Batch(BatchResult),
    Artifact(Artifact),
    Artifacts {
        artifacts: Vec<Artifact>,
    },
    /// Resolved artifact content; the bytes are not part of the JSON form
    Bytes {
        id: String,
        length: usize,
        #[serde(skip)]
        data: Vec<u8>,
    },
}

impl OperationOutput {
    /// One-line result description for audit records
    pub fn summary(&self) -> String {
        match self {
            Self::Status(status) => format!("{}", status.state),
            Self::Exec(out) => format!("exit {}", out.exit_code),
            Self::Ack { message } => message.clone(),
            Self::Workspace(ws) => ws.id.clone(),
            Self::Loaded { workspace, notes } => {
                format!("{} ({} notes)", workspace.id, notes.len())
            }
            Self::Workspaces { workspaces } => format!("{} workspaces", workspaces.len()),
            Self::Info(info) => format!(
                "artifacts={} log_lines={} results={} notes={}",
                info.counts.artifacts,
                info.counts.log_lines,
                info.counts.results,
                info.counts.notes
            ),
            Self::Logs(page) => format!("{} of {} records", page.records.len(), page.total_matching),
            Self::Saved { path } => path.display().to_string(),
            Self::Note(note) => note.file.clone(),
            Self::Notes { notes } => format!("{} notes", notes.len()),
            Self::Batch(batch) => format!("{}/{} steps", batch.completed, batch.total),
            Self::Artifact(artifact) => artifact.id.clone(),
            Self::Artifacts { artifacts } => format!("{} artifacts", artifacts.len()),
            Self::Bytes { id, length, .. } => format!("{} ({} bytes)", id, length),
        }
    }
}
