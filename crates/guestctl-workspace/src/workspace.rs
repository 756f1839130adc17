//! A single workspace on disk
//!
//! ```text
//! <workspaces>/<YYYYmmdd-HHMMSS>_<name>/
//!   screenshots/        captured artifacts
//!   logs/project.log    append-only event log
//!   results/            saved outputs
//!   advice/             operator notes, one markdown file each
//!   metadata.json       {name, description, created_at}
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use guestctl_core::{EventRecord, GuestError, Level, NoteEntry, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::ArtifactStore;

const SCREENSHOTS_DIR: &str = "screenshots";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "project.log";
const RESULTS_DIR: &str = "results";
const ADVICE_DIR: &str = "advice";
const METADATA_FILE: &str = "metadata.json";

const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const NOTE_TITLE_MAX_CHARS: usize = 50;

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Identity of a workspace, as returned by list/initialize/load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceCounts {
    pub artifacts: usize,
    pub log_lines: usize,
    pub results: usize,
    pub notes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    #[serde(flatten)]
    pub summary: WorkspaceSummary,
    pub counts: WorkspaceCounts,
}

/// Result of a filtered log read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    /// Most recent matching records, oldest first
    pub records: Vec<EventRecord>,
    /// Matching records in the whole log, before the limit
    pub total_matching: usize,
}

/// Make a human name safe for use in a directory name
pub fn sanitize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GuestError::InvalidArgument(
            "workspace name cannot be empty".into(),
        ));
    }
    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

fn note_slug(title: &str) -> String {
    let slug: String = title
        .trim()
        .chars()
        .take(NOTE_TITLE_MAX_CHARS)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "note".to_string()
    } else {
        slug.to_string()
    }
}

/// Sequence number prefix of a note file, e.g. 3 for `000003-...md`
fn note_sequence(file_name: &str) -> Option<u64> {
    file_name.split('-').next()?.parse().ok()
}

fn parse_note(file_name: &str, raw: &str) -> (String, String) {
    let mut parts = raw.splitn(2, '\n');
    let first = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    match first.strip_prefix("# ") {
        Some(title) => {
            let body = rest.strip_prefix('\n').unwrap_or(rest);
            let body = body.strip_suffix('\n').unwrap_or(body);
            (title.to_string(), body.to_string())
        }
        None => (file_name.trim_end_matches(".md").to_string(), raw.to_string()),
    }
}

fn note_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    // NNNNNN-YYYYmmdd-HHMMSS-slug.md
    let stamp = file_name.get(7..22)?;
    NaiveDateTime::parse_from_str(stamp, ID_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

async fn count_files(dir: &Path, extension: Option<&str>) -> Result<usize> {
    let mut entries = fs::read_dir(dir).await.map_err(GuestError::io_at(dir))?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await.map_err(GuestError::io_at(dir))? {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        let matches = match extension {
            Some(ext) => path.extension().and_then(|e| e.to_str()) == Some(ext),
            None => true,
        };
        if is_file && matches {
            count += 1;
        }
    }
    Ok(count)
}

/// One workspace directory
#[derive(Debug)]
pub struct Workspace {
    id: String,
    root: PathBuf,
    metadata: WorkspaceMetadata,
    artifacts: ArtifactStore,
    /// Serializes appends to the event log and note numbering
    write_lock: Mutex<()>,
}

impl Workspace {
    fn from_parts(root: PathBuf, metadata: WorkspaceMetadata) -> Self {
        let id = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let artifacts = ArtifactStore::new(root.join(SCREENSHOTS_DIR));
        Self {
            id,
            root,
            metadata,
            artifacts,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a new workspace under `parent`
    ///
    /// The whole tree is staged in a hidden sibling directory and renamed
    /// into place, so a half-built workspace is never visible.
    pub async fn create(parent: &Path, name: &str, description: &str) -> Result<Self> {
        Self::create_at(parent, name, description, Utc::now()).await
    }

    async fn create_at(
        parent: &Path,
        name: &str,
        description: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let safe_name = sanitize_name(name)?;
        let id = format!("{}_{}", created_at.format(ID_TIMESTAMP_FORMAT), safe_name);
        let root = parent.join(&id);

        fs::create_dir_all(parent)
            .await
            .map_err(GuestError::io_at(parent))?;

        if fs::try_exists(&root).await.map_err(GuestError::io_at(&root))? {
            return Err(GuestError::Io {
                path: root,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "workspace already exists",
                ),
            });
        }

        let metadata = WorkspaceMetadata {
            name: name.trim().to_string(),
            description: description.to_string(),
            created_at,
        };

        let staging = parent.join(format!(
            ".{}.staging-{}-{}",
            id,
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));

        if let Err(e) = Self::build_tree(&staging, &metadata).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&staging, &root).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(GuestError::Io { path: root, source: e });
        }

        debug!("Created workspace at {}", root.display());
        Ok(Self::from_parts(root, metadata))
    }

    async fn build_tree(staging: &Path, metadata: &WorkspaceMetadata) -> Result<()> {
        for dir in [SCREENSHOTS_DIR, LOGS_DIR, RESULTS_DIR, ADVICE_DIR] {
            let path = staging.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(GuestError::io_at(&path))?;
        }

        let log_path = staging.join(LOGS_DIR).join(LOG_FILE);
        fs::write(&log_path, b"")
            .await
            .map_err(GuestError::io_at(&log_path))?;

        let meta_path = staging.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(&meta_path, json)
            .await
            .map_err(GuestError::io_at(&meta_path))
    }

    /// Read just the metadata record of a workspace directory
    pub async fn read_metadata(root: &Path) -> Result<WorkspaceMetadata> {
        let meta_path = root.join(METADATA_FILE);
        let raw = fs::read_to_string(&meta_path)
            .await
            .map_err(GuestError::io_at(&meta_path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Open an existing workspace, checking its full layout
    pub async fn open(root: &Path) -> Result<Self> {
        let required = [
            root.to_path_buf(),
            root.join(SCREENSHOTS_DIR),
            root.join(LOGS_DIR),
            root.join(RESULTS_DIR),
            root.join(ADVICE_DIR),
        ];
        for dir in &required {
            if !fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                return Err(GuestError::NotFound(format!(
                    "workspace directory {}",
                    dir.display()
                )));
            }
        }

        let log_path = root.join(LOGS_DIR).join(LOG_FILE);
        if !fs::metadata(&log_path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(GuestError::NotFound(format!(
                "workspace log {}",
                log_path.display()
            )));
        }

        let metadata = Self::read_metadata(root).await.map_err(|e| match e {
            GuestError::Serialization(e) => GuestError::NotFound(format!(
                "valid metadata in {} ({})",
                root.display(),
                e
            )),
            other => other,
        })?;

        Ok(Self::from_parts(root.to_path_buf(), metadata))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &WorkspaceMetadata {
        &self.metadata
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOGS_DIR).join(LOG_FILE)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn advice_dir(&self) -> PathBuf {
        self.root.join(ADVICE_DIR)
    }

    pub fn summary(&self) -> WorkspaceSummary {
        WorkspaceSummary {
            id: self.id.clone(),
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            created_at: self.metadata.created_at,
            path: self.root.clone(),
        }
    }

    /// Append one record to the event log
    pub async fn append_event(&self, level: Level, message: &str) -> Result<()> {
        let record = EventRecord::new(level, message);
        let line = format!("{}\n", record.to_line());
        let log_path = self.log_path();

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(GuestError::io_at(&log_path))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(GuestError::io_at(&log_path))?;
        file.flush().await.map_err(GuestError::io_at(&log_path))
    }

    /// Most recent `limit` records at or above `min_level`, oldest first
    pub async fn read_events(&self, limit: Option<usize>, min_level: Option<Level>) -> Result<LogPage> {
        let log_path = self.log_path();
        let raw = fs::read_to_string(&log_path)
            .await
            .map_err(GuestError::io_at(&log_path))?;

        let mut records: Vec<EventRecord> = raw
            .lines()
            .filter_map(EventRecord::parse_line)
            .filter(|r| min_level.map_or(true, |min| r.level >= min))
            .collect();

        let total_matching = records.len();
        if let Some(limit) = limit {
            let skip = total_matching.saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(LogPage {
            records,
            total_matching,
        })
    }

    /// Write a file into the results area, replacing any previous version
    pub async fn save_result(&self, filename: &str, content: &str) -> Result<PathBuf> {
        let mut components = Path::new(filename).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single || filename.contains('\\') {
            return Err(GuestError::InvalidArgument(format!(
                "result filename must be a plain file name, got '{}'",
                filename
            )));
        }

        let path = self.results_dir().join(filename);
        fs::write(&path, content)
            .await
            .map_err(GuestError::io_at(&path))?;
        info!("Saved result {}", path.display());
        Ok(path)
    }

    /// Store a new note; notes with the same title are kept side by side
    pub async fn save_note(&self, title: &str, content: &str) -> Result<NoteEntry> {
        let title = title.replace(['\r', '\n'], " ");
        let dir = self.advice_dir();
        let created_at = Utc::now();

        let _guard = self.write_lock.lock().await;
        let next = self
            .note_files()
            .await?
            .iter()
            .filter_map(|name| note_sequence(name))
            .max()
            .unwrap_or(0)
            + 1;

        let file = format!(
            "{:06}-{}-{}.md",
            next,
            created_at.format(ID_TIMESTAMP_FORMAT),
            note_slug(&title)
        );
        let path = dir.join(&file);
        let mut handle = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(GuestError::io_at(&path))?;
        handle
            .write_all(format!("# {}\n\n{}\n", title, content).as_bytes())
            .await
            .map_err(GuestError::io_at(&path))?;
        handle.flush().await.map_err(GuestError::io_at(&path))?;

        Ok(NoteEntry {
            title,
            content: content.to_string(),
            created_at,
            file,
        })
    }

    async fn note_files(&self) -> Result<Vec<String>> {
        let dir = self.advice_dir();
        let mut entries = fs::read_dir(&dir).await.map_err(GuestError::io_at(&dir))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(GuestError::io_at(&dir))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".md") && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort_by_key(|name| (note_sequence(name).unwrap_or(u64::MAX), name.clone()));
        Ok(names)
    }

    /// Every saved note in creation order
    pub async fn notes(&self) -> Result<Vec<NoteEntry>> {
        let dir = self.advice_dir();
        let mut notes = Vec::new();
        for file in self.note_files().await? {
            let path = dir.join(&file);
            let raw = fs::read_to_string(&path)
                .await
                .map_err(GuestError::io_at(&path))?;
            let (title, content) = parse_note(&file, &raw);
            let created_at = match note_timestamp(&file) {
                Some(ts) => ts,
                None => fs::metadata(&path)
                    .await
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            };
            notes.push(NoteEntry {
                title,
                content,
                created_at,
                file,
            });
        }
        Ok(notes)
    }

    pub async fn counts(&self) -> Result<WorkspaceCounts> {
        let log_path = self.log_path();
        let log = fs::read_to_string(&log_path)
            .await
            .map_err(GuestError::io_at(&log_path))?;

        Ok(WorkspaceCounts {
            artifacts: self.artifacts.count().await?,
            log_lines: log.lines().filter(|l| !l.trim().is_empty()).count(),
            results: count_files(&self.results_dir(), None).await?,
            notes: count_files(&self.advice_dir(), Some("md")).await?,
        })
    }

    pub async fn info(&self) -> Result<WorkspaceInfo> {
        Ok(WorkspaceInfo {
            summary: self.summary(),
            counts: self.counts().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("login flow/v2").unwrap(), "login_flow_v2");
        assert_eq!(sanitize_name("  demo ").unwrap(), "demo");
        assert!(sanitize_name("   ").is_err());
    }

    #[test]
    fn test_note_helpers() {
        assert_eq!(note_slug("Use the ../ menu!"), "Use_the_____menu");
        assert_eq!(note_slug("!!!"), "note");
        assert_eq!(note_sequence("000012-20240101-000000-x.md"), Some(12));

        let ts = note_timestamp("000012-20240102-030405-x.md").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());

        let (title, body) = parse_note("x.md", "# Login\n\nuse admin/admin\nthen wait\n");
        assert_eq!(title, "Login");
        assert_eq!(body, "use admin/admin\nthen wait");
    }

    #[tokio::test]
    async fn test_create_layout() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "demo", "test").await.unwrap();

        assert!(ws.id().ends_with("_demo"));
        for dir in ["screenshots", "logs", "results", "advice"] {
            assert!(ws.root().join(dir).is_dir(), "{} missing", dir);
        }
        assert!(ws.log_path().is_file());

        let meta = Workspace::read_metadata(ws.root()).await.unwrap();
        assert_eq!(meta.name, "demo");
        assert_eq!(meta.description, "test");

        // No staging leftovers
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_create_existing_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap();
        let first = Workspace::create_at(temp_dir.path(), "dup", "", at).await.unwrap();
        assert_eq!(first.id(), "20240501-130405_dup");

        let err = Workspace::create_at(temp_dir.path(), "dup", "", at)
            .await
            .unwrap_err();
        assert!(matches!(err, GuestError::Io { .. }));
        assert!(first.root().is_dir());
    }

    #[tokio::test]
    async fn test_open_rejects_partial_layout() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "demo", "").await.unwrap();
        std::fs::remove_dir(ws.root().join("results")).unwrap();

        let err = Workspace::open(ws.root()).await.unwrap_err();
        assert!(matches!(err, GuestError::NotFound(_)));

        let err = Workspace::open(&temp_dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, GuestError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_event_log_filter_and_limit() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "logs", "").await.unwrap();

        ws.append_event(Level::Debug, "d1").await.unwrap();
        ws.append_event(Level::Info, "i1").await.unwrap();
        ws.append_event(Level::Error, "e1").await.unwrap();
        ws.append_event(Level::Warning, "w1").await.unwrap();
        ws.append_event(Level::Info, "i2").await.unwrap();

        let all = ws.read_events(None, None).await.unwrap();
        assert_eq!(all.total_matching, 5);
        assert_eq!(all.records[0].message, "d1");

        let page = ws.read_events(Some(2), Some(Level::Warning)).await.unwrap();
        assert_eq!(page.total_matching, 2);
        let messages: Vec<_> = page.records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["e1", "w1"]);

        let last = ws.read_events(Some(1), None).await.unwrap();
        assert_eq!(last.records[0].message, "i2");
    }

    #[tokio::test]
    async fn test_save_result_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "r", "").await.unwrap();

        ws.save_result("report.txt", "first").await.unwrap();
        let path = ws.save_result("report.txt", "second").await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "second");
        assert_eq!(ws.counts().await.unwrap().results, 1);
    }

    #[tokio::test]
    async fn test_save_result_rejects_paths() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "r", "").await.unwrap();

        for name in ["../escape.txt", "sub/file.txt", "/etc/passwd", "", "..", "a\\b"] {
            let err = ws.save_result(name, "x").await.unwrap_err();
            assert!(matches!(err, GuestError::InvalidArgument(_)), "{:?}", name);
        }
    }

    #[tokio::test]
    async fn test_notes_keep_duplicates_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "n", "").await.unwrap();

        ws.save_note("A", "x").await.unwrap();
        ws.save_note("B", "multi\nline").await.unwrap();
        ws.save_note("A", "y").await.unwrap();

        let notes = ws.notes().await.unwrap();
        let pairs: Vec<_> = notes
            .iter()
            .map(|n| (n.title.as_str(), n.content.as_str()))
            .collect();
        assert_eq!(pairs, [("A", "x"), ("B", "multi\nline"), ("A", "y")]);
        assert!(notes[0].file.starts_with("000001-"));
        assert_eq!(ws.counts().await.unwrap().notes, 3);
    }

    #[tokio::test]
    async fn test_counts() {
        let temp_dir = TempDir::new().unwrap();
        let ws = Workspace::create(temp_dir.path(), "c", "").await.unwrap();

        ws.append_event(Level::Info, "one").await.unwrap();
        ws.append_event(Level::Info, "two").await.unwrap();
        std::fs::write(ws.root().join("screenshots/a.png"), b"x").unwrap();

        let info = ws.info().await.unwrap();
        assert_eq!(info.summary.name, "c");
        assert_eq!(
            info.counts,
            WorkspaceCounts {
                artifacts: 1,
                log_lines: 2,
                results: 0,
                notes: 0
            }
        );
    }
}
