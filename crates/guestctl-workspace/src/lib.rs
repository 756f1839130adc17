//! # guestctl-workspace
//!
//! Local state for guestctl sessions.
//!
//! This crate provides:
//! - `Workspace`: one timestamped directory with screenshots, an event log,
//!   saved results and operator notes
//! - `WorkspaceRegistry`: the single active workspace and the switch gate
//! - `ArtifactStore`: id allocation and lookup for captured screenshots

mod artifacts;
mod registry;
mod workspace;

pub use artifacts::{ArtifactStore, Reservation};
pub use registry::{ActiveWorkspace, WorkspaceRegistry};
pub use workspace::{
    sanitize_name, LogPage, Workspace, WorkspaceCounts, WorkspaceInfo, WorkspaceMetadata,
    WorkspaceSummary,
};
