//! Process-wide active workspace

use guestctl_core::{GuestError, Level, NoteEntry, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::{Workspace, WorkspaceSummary};

/// Read access to the active workspace
///
/// A switch waits until every outstanding guard is dropped.
pub type ActiveWorkspace<'a> = RwLockReadGuard<'a, Workspace>;

/// Knows where workspaces live and which one is active
///
/// Scoped operations hold an [`ActiveWorkspace`] guard for their whole
/// duration. `initialize` and `load` first take the switch gate without
/// waiting (a concurrent switch fails with `AlreadyActive`) and then the
/// write lock, so no read or append lands in a workspace being replaced.
/// Both hand back a guard on the new workspace, taken before the write lock
/// is released, so the caller's follow-up writes land there too.
pub struct WorkspaceRegistry {
    root: PathBuf,
    active: RwLock<Option<Workspace>>,
    switch_gate: Mutex<()>,
}

impl WorkspaceRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active: RwLock::new(None),
            switch_gate: Mutex::new(()),
        }
    }

    /// Directory holding every workspace
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a workspace and make it active
    pub async fn initialize(&self, name: &str, description: &str) -> Result<ActiveWorkspace<'_>> {
        let _gate = self
            .switch_gate
            .try_lock()
            .map_err(|_| GuestError::AlreadyActive)?;

        let workspace = Workspace::create(&self.root, name, description).await?;
        workspace
            .append_event(Level::Info, &format!("Workspace initialized: {}", name.trim()))
            .await?;

        let active = self.install(workspace).await?;
        info!("Workspace initialized: {}", active.id());
        Ok(active)
    }

    /// Activate an existing workspace and return its saved notes
    ///
    /// `target` is a path to a workspace directory or a bare workspace id.
    pub async fn load(&self, target: &str) -> Result<(ActiveWorkspace<'_>, Vec<NoteEntry>)> {
        let _gate = self
            .switch_gate
            .try_lock()
            .map_err(|_| GuestError::AlreadyActive)?;

        let root = self.resolve_target(target);
        let workspace = Workspace::open(&root).await?;
        let notes = workspace.notes().await?;
        workspace
            .append_event(Level::Info, &format!("Workspace loaded: {}", workspace.id()))
            .await?;

        let active = self.install(workspace).await?;
        info!(
            "Workspace loaded: {} ({} saved notes)",
            active.id(),
            notes.len()
        );
        Ok((active, notes))
    }

    /// Replace the active workspace and keep read access to the new one
    async fn install(&self, workspace: Workspace) -> Result<ActiveWorkspace<'_>> {
        let mut slot = self.active.write().await;
        *slot = Some(workspace);
        RwLockReadGuard::try_map(RwLockWriteGuard::downgrade(slot), |ws| ws.as_ref())
            .map_err(|_| GuestError::NoActiveWorkspace)
    }

    fn resolve_target(&self, target: &str) -> PathBuf {
        let path = Path::new(target);
        if path.is_absolute() || path.components().count() > 1 || path.exists() {
            path.to_path_buf()
        } else {
            self.root.join(target)
        }
    }

    /// Every workspace under the root with readable metadata, newest first
    pub async fn list(&self) -> Result<Vec<WorkspaceSummary>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GuestError::io_at(&self.root)(e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(GuestError::io_at(&self.root))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            let path = entry.path();
            match Workspace::read_metadata(&path).await {
                Ok(meta) => summaries.push(WorkspaceSummary {
                    id: name,
                    name: meta.name,
                    description: meta.description,
                    created_at: meta.created_at,
                    path,
                }),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    /// The active workspace, or `NoActiveWorkspace`
    pub async fn active(&self) -> Result<ActiveWorkspace<'_>> {
        RwLockReadGuard::try_map(self.active.read().await, |ws| ws.as_ref())
            .map_err(|_| GuestError::NoActiveWorkspace)
    }

    /// The active workspace if one is set
    pub async fn try_active(&self) -> Option<ActiveWorkspace<'_>> {
        self.active().await.ok()
    }
}
