//! Screenshot artifact storage
//!
//! Ids look like `20240501-130405-123456-1a2b3c4d`. An id is reserved by
//! creating its file with `create_new`, which only rules out ids whose file
//! still exists. Uniqueness after a deletion rests on the microsecond
//! timestamp plus the random suffix.

use chrono::{DateTime, Utc};
use guestctl_core::{Artifact, GuestError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const ARTIFACT_EXTENSION: &str = "png";

/// Attempts at finding an unused id before giving up
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

/// A missing file is an unknown artifact; anything else is a local I/O failure
fn lookup_error(id: &str, path: &Path) -> impl FnOnce(std::io::Error) -> GuestError {
    let id = id.to_string();
    let path = path.to_path_buf();
    move |source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            GuestError::NotFound(format!("artifact {}", id))
        } else {
            GuestError::Io { path, source }
        }
    }
}

/// An id whose backing file has been created but not yet filled
#[derive(Debug)]
pub struct Reservation {
    pub id: String,
    pub path: PathBuf,
}

/// Manages the screenshots area of one workspace
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn generate_id() -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S-%6f"), &random[..8])
    }

    /// Reserve a fresh id
    pub async fn allocate(&self) -> Result<Reservation> {
        let mut last_error = None;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let id = Self::generate_id();
            let path = self.file_for(&id);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    debug!("Reserved artifact {}", id);
                    return Ok(Reservation { id, path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => last_error = Some(e),
                Err(e) => return Err(GuestError::io_at(&path)(e)),
            }
        }
        Err(GuestError::Io {
            path: self.dir.clone(),
            source: last_error
                .unwrap_or_else(|| std::io::Error::other("could not allocate artifact id")),
        })
    }

    /// Turn a filled reservation into an artifact record
    pub async fn commit(&self, reservation: Reservation) -> Result<Artifact> {
        self.describe(&reservation.id, reservation.path).await
    }

    /// Drop a reservation that never got its content
    pub async fn discard(&self, reservation: Reservation) {
        if let Err(e) = fs::remove_file(&reservation.path).await {
            debug!("Failed to remove reservation {}: {}", reservation.id, e);
        }
    }

    fn file_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, ARTIFACT_EXTENSION))
    }

    /// Location of an artifact, rejecting ids that could escape the store
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(GuestError::NotFound(format!("artifact {}", id)));
        }
        Ok(self.file_for(id))
    }

    async fn describe(&self, id: &str, path: PathBuf) -> Result<Artifact> {
        let meta = fs::metadata(&path)
            .await
            .map_err(lookup_error(id, &path))?;
        let created_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Artifact {
            id: id.to_string(),
            uri: Artifact::uri_for(id),
            path,
            created_at,
            size_bytes: meta.len(),
        })
    }

    /// Metadata for one artifact
    pub async fn get(&self, id: &str) -> Result<Artifact> {
        let path = self.path_for(id)?;
        self.describe(id, path).await
    }

    /// Raw bytes of an artifact
    pub async fn resolve(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        fs::read(&path).await.map_err(lookup_error(id, &path))
    }

    /// All stored artifacts, oldest first
    pub async fn list(&self) -> Result<Vec<Artifact>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(GuestError::io_at(&self.dir))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(GuestError::io_at(&self.dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(id.to_string());
            }
        }
        // Ids start with a timestamp, so lexical order is creation order
        ids.sort();

        let mut artifacts = Vec::with_capacity(ids.len());
        for id in ids {
            let path = self.file_for(&id);
            // Removed between listing and stat; skip it
            if let Ok(artifact) = self.describe(&id, path).await {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }

    /// Number of stored artifacts
    pub async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}
