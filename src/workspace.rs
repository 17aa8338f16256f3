//! Per-request ephemeral workspaces.
//!
//! A [`Workspace`] is a guard: the directory is removed when the guard is
//! released or dropped, so every exit path (success, `?`, panic unwinding,
//! cancelled request future) cleans up. Deletion failures are logged and left
//! for the janitor.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{RelayError, RelayResult};

/// Directory name prefix of every workspace under the root
pub const WORKSPACE_PREFIX: &str = "ws-";

#[derive(Debug, Clone)]
struct ActiveEntry {
    created_at: DateTime<Utc>,
    request_id: String,
}

type Registry = Arc<Mutex<HashMap<Uuid, ActiveEntry>>>;

/// Metadata reported by `/workspace/list`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceInfo {
    pub id: Uuid,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub age_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Owned by an in-flight request; inactive entries are orphans
    pub active: bool,
}

/// Result of one janitor pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Allocates and tracks workspaces under a single root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    active: Registry,
}

impl WorkspaceManager {
    /// Create the root if needed; the stored root is canonical
    pub fn new(root: impl AsRef<Path>) -> RelayResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self {
            root,
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Allocate a fresh directory for one request
    #[instrument(skip(self))]
    pub async fn acquire(&self, request_id: &str) -> RelayResult<Workspace> {
        let id = Uuid::new_v4();
        let path = self.root.join(format!("{WORKSPACE_PREFIX}{id}"));
        let created_at = Utc::now();

        // Registered first so the janitor never sees it as an orphan
        self.register(id, created_at, request_id);
        if let Err(e) = tokio::fs::create_dir(&path).await {
            self.unregister(id);
            return Err(RelayError::Io(e));
        }

        debug!(workspace = %path.display(), "workspace acquired");
        Ok(Workspace {
            id,
            path,
            created_at,
            request_id: request_id.to_string(),
            registry: Arc::clone(&self.active),
            released: false,
        })
    }

    /// Run `work` inside a workspace that is released whatever the outcome
    pub async fn scoped<F, Fut, T>(&self, request_id: &str, work: F) -> RelayResult<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = RelayResult<T>>,
    {
        let workspace = self.acquire(request_id).await?;
        let result = work(workspace.path().to_path_buf()).await;
        workspace.release().await;
        result
    }

    /// Every workspace directory currently on disk
    pub fn list(&self) -> RelayResult<Vec<WorkspaceInfo>> {
        let active = self
            .active
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default();
        let now = Utc::now();

        let mut infos = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(id) = parse_workspace_name(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let (created_at, request_id, is_active) = match active.get(&id) {
                Some(a) => (a.created_at, Some(a.request_id.clone()), true),
                None => (disk_timestamp(&entry.path()), None, false),
            };
            infos.push(WorkspaceInfo {
                id,
                path: entry.path().to_string_lossy().to_string(),
                created_at,
                age_secs: (now - created_at).num_seconds().max(0) as u64,
                request_id,
                active: is_active,
            });
        }
        infos.sort_by_key(|i| i.created_at);
        Ok(infos)
    }

    /// Remove inactive workspaces older than `max_age`
    pub fn sweep_orphans(&self, max_age: Duration) -> RelayResult<SweepReport> {
        let mut report = SweepReport::default();
        for info in self.list()? {
            if info.active || info.age_secs < max_age.as_secs() {
                continue;
            }
            let path = PathBuf::from(&info.path);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(workspace = %path.display(), age_secs = info.age_secs, "swept orphaned workspace");
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!(workspace = %path.display(), error = %e, "failed to sweep orphaned workspace");
                    report.failed.push(path);
                }
            }
        }
        Ok(report)
    }

    /// Periodically sweep orphans in the background
    pub fn spawn_janitor(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let pass = manager.clone();
                match tokio::task::spawn_blocking(move || pass.sweep_orphans(max_age)).await {
                    Ok(Ok(report)) if !report.removed.is_empty() => {
                        info!(removed = report.removed.len(), "janitor pass complete");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "janitor pass failed"),
                    Err(e) => warn!(error = %e, "janitor task panicked"),
                }
            }
        })
    }

    fn register(&self, id: Uuid, created_at: DateTime<Utc>, request_id: &str) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(
                id,
                ActiveEntry {
                    created_at,
                    request_id: request_id.to_string(),
                },
            );
        }
    }

    fn unregister(&self, id: Uuid) {
        unregister(&self.active, id);
    }
}

fn unregister(registry: &Registry, id: Uuid) {
    if let Ok(mut active) = registry.lock() {
        active.remove(&id);
    }
}

fn parse_workspace_name(name: &str) -> Option<Uuid> {
    name.strip_prefix(WORKSPACE_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

fn disk_timestamp(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

/// Exclusive ownership of one workspace directory
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    path: PathBuf,
    created_at: DateTime<Utc>,
    request_id: String,
    registry: Registry,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Delete the directory tree. Failures are logged, never returned.
    pub async fn release(mut self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            warn!(workspace = %self.path.display(), error = %e, "workspace cleanup failed");
        } else {
            debug!(workspace = %self.path.display(), "workspace released");
        }
        unregister(&self.registry, self.id);
        self.released = true;
    }
}

impl Drop for Workspace {
    /// Inside a runtime the delete runs on the blocking pool. The entry stays
    /// registered until the directory is gone.
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let registry = Arc::clone(&self.registry);
        let id = self.id;
        let cleanup = move || {
            remove_on_drop(&path);
            unregister(&registry, id);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(cleanup);
            }
            Err(_) => cleanup(),
        }
    }
}

fn remove_on_drop(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(workspace = %path.display(), "workspace released on drop"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(workspace = %path.display(), error = %e, "workspace cleanup failed");
        }
    }
}
