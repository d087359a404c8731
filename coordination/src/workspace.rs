//! Per-session output directories.
//!
//! A session gets one directory under the output root, allocated on first use
//! and reused afterwards. All file operations resolve paths relative to that
//! directory and reject anything that would land outside it.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

/// Errors from workspace allocation and file operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path `{0}` escapes the session workspace")]
    Escape(String),

    #[error("no workspace allocated for session `{0}`")]
    UnknownSession(String),

    #[error("invalid session id `{0}`")]
    InvalidSessionId(String),

    #[error("session registry lock poisoned")]
    Poisoned,
}

/// Session id → workspace directory table.
///
/// Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, PathBuf>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with known allocations, e.g. from a previous process.
    pub fn from_entries(entries: HashMap<String, PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(entries)),
        }
    }

    /// Copy of the current table.
    pub fn snapshot(&self) -> Result<HashMap<String, PathBuf>, WorkspaceError> {
        let table = self.inner.lock().map_err(|_| WorkspaceError::Poisoned)?;
        Ok(table.clone())
    }

    pub fn get(&self, session_id: &str) -> Result<Option<PathBuf>, WorkspaceError> {
        let table = self.inner.lock().map_err(|_| WorkspaceError::Poisoned)?;
        Ok(table.get(session_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allocates and resolves session workspaces under a single output root.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    root: PathBuf,
    registry: SessionRegistry,
}

impl WorkspaceAllocator {
    pub fn new(root: impl Into<PathBuf>, registry: SessionRegistry) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Directory for `session_id`, creating it on first call.
    ///
    /// Idempotent: later calls return the same path regardless of `project_name`.
    pub fn allocate_workspace(
        &self,
        project_name: &str,
        session_id: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let session = sanitize(session_id);
        if session.is_empty() {
            return Err(WorkspaceError::InvalidSessionId(session_id.to_string()));
        }

        let mut table = self
            .registry
            .inner
            .lock()
            .map_err(|_| WorkspaceError::Poisoned)?;
        if let Some(existing) = table.get(session_id) {
            debug!(session_id, path = %existing.display(), "reusing session workspace");
            fs::create_dir_all(existing)?;
            return Ok(existing.clone());
        }

        let project = match sanitize(project_name) {
            p if p.is_empty() => "project".to_string(),
            p => p,
        };
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let dir = self.root.join(format!("{project}_{session}_{stamp}"));
        fs::create_dir_all(&dir)?;

        info!(session_id, path = %dir.display(), "allocated session workspace");
        table.insert(session_id.to_string(), dir.clone());
        Ok(dir)
    }

    /// Forget the session's workspace. The directory itself is left on disk.
    ///
    /// Returns the path that was registered, if any.
    pub fn reset_workspace(&self, session_id: &str) -> Result<Option<PathBuf>, WorkspaceError> {
        let mut table = self
            .registry
            .inner
            .lock()
            .map_err(|_| WorkspaceError::Poisoned)?;
        let removed = table.remove(session_id);
        if removed.is_some() {
            info!(session_id, "reset session workspace");
        }
        Ok(removed)
    }

    /// Workspace directory of an already-allocated session.
    pub fn workspace(&self, session_id: &str) -> Result<PathBuf, WorkspaceError> {
        self.registry
            .get(session_id)?
            .ok_or_else(|| WorkspaceError::UnknownSession(session_id.to_string()))
    }

    /// Write `content` to `relative_path`, creating parent directories.
    pub fn write_file(
        &self,
        session_id: &str,
        relative_path: &str,
        content: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let full = confine(&self.workspace(session_id)?, relative_path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, content)?;
        debug!(session_id, path = %full.display(), bytes = content.len(), "wrote file");
        Ok(full)
    }

    pub fn create_folder(
        &self,
        session_id: &str,
        relative_path: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let full = confine(&self.workspace(session_id)?, relative_path)?;
        fs::create_dir_all(&full)?;
        Ok(full)
    }

    /// Indented tree of the session workspace, directories first, sorted by name.
    pub fn list_structure(&self, session_id: &str) -> Result<String, WorkspaceError> {
        let root = self.workspace(session_id)?;
        let mut lines = Vec::new();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        lines.push(format!("{name}/"));
        walk(&root, 1, &mut lines)?;
        Ok(lines.join("\n"))
    }
}

fn walk(dir: &Path, depth: usize, lines: &mut Vec<String>) -> Result<(), WorkspaceError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| (!e.path().is_dir(), e.file_name()));

    let indent = "  ".repeat(depth);
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            lines.push(format!("{indent}{name}/"));
            walk(&entry.path(), depth + 1, lines)?;
        } else {
            lines.push(format!("{indent}{name}"));
        }
    }
    Ok(())
}

/// Join `relative` onto `root`, rejecting absolute paths and `..` components.
///
/// Purely lexical so it works for paths that do not exist yet.
fn confine(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let candidate = Path::new(relative);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::Escape(relative.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(WorkspaceError::Escape(relative.to_string()));
    }
    Ok(root.join(clean))
}

/// Keep `[A-Za-z0-9_-]`, map everything else to `_`, trim leading/trailing `_`.
fn sanitize(name: &str) -> String {
    let mapped: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn allocator() -> (TempDir, WorkspaceAllocator) {
        let tmp = TempDir::new().unwrap();
        let alloc = WorkspaceAllocator::new(tmp.path(), SessionRegistry::new());
        (tmp, alloc)
    }

    #[test]
    fn allocation_is_idempotent_per_session() {
        let (_tmp, alloc) = allocator();
        let first = alloc.allocate_workspace("Sales Report", "s-1").unwrap();
        let again = alloc.allocate_workspace("something else", "s-1").unwrap();
        assert_eq!(first, again);
        assert!(first.is_dir());

        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Sales_Report_s-1_"), "{name}");
    }

    #[test]
    fn sessions_get_distinct_directories() {
        let (_tmp, alloc) = allocator();
        let a = alloc.allocate_workspace("proj", "a").unwrap();
        let b = alloc.allocate_workspace("proj", "b").unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.registry().len(), 2);
    }

    #[test]
    fn shared_registry_sees_allocations() {
        let tmp = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let one = WorkspaceAllocator::new(tmp.path(), registry.clone());
        let two = WorkspaceAllocator::new(tmp.path(), registry);
        let path = one.allocate_workspace("p", "shared").unwrap();
        assert_eq!(two.allocate_workspace("p", "shared").unwrap(), path);
    }

    #[test]
    fn reset_forgets_session() {
        let (_tmp, alloc) = allocator();
        let path = alloc.allocate_workspace("p", "s").unwrap();
        assert_eq!(alloc.reset_workspace("s").unwrap(), Some(path.clone()));
        assert_eq!(alloc.reset_workspace("s").unwrap(), None);
        assert!(matches!(
            alloc.workspace("s"),
            Err(WorkspaceError::UnknownSession(_))
        ));
        // Directory stays on disk.
        assert!(path.is_dir());
    }

    #[test]
    fn registry_round_trips_through_snapshot() {
        let (tmp, alloc) = allocator();
        let path = alloc.allocate_workspace("p", "s").unwrap();
        let restored = SessionRegistry::from_entries(alloc.registry().snapshot().unwrap());
        let again = WorkspaceAllocator::new(tmp.path(), restored);
        assert_eq!(again.allocate_workspace("p", "s").unwrap(), path);
    }

    #[test]
    fn rejects_blank_session_id() {
        let (_tmp, alloc) = allocator();
        assert!(matches!(
            alloc.allocate_workspace("p", " / "),
            Err(WorkspaceError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn write_and_list() {
        let (_tmp, alloc) = allocator();
        alloc.allocate_workspace("p", "s").unwrap();
        alloc.create_folder("s", "data").unwrap();
        alloc.write_file("s", "src/main.py", "print(1)\n").unwrap();
        alloc.write_file("s", "./README.md", "# p\n").unwrap();

        let listing = alloc.list_structure("s").unwrap();
        let lines: Vec<&str> = listing.lines().skip(1).collect();
        assert_eq!(lines, vec!["  data/", "  src/", "    main.py", "  README.md"]);
    }

    #[test]
    fn rejects_escaping_paths() {
        let (_tmp, alloc) = allocator();
        alloc.allocate_workspace("p", "s").unwrap();
        for bad in ["../outside.txt", "a/../../x", "/etc/passwd", ""] {
            assert!(
                matches!(alloc.write_file("s", bad, "x"), Err(WorkspaceError::Escape(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn file_ops_need_allocation() {
        let (_tmp, alloc) = allocator();
        assert!(matches!(
            alloc.write_file("nope", "a.txt", "x"),
            Err(WorkspaceError::UnknownSession(_))
        ));
    }
}
