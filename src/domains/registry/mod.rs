//! The keyed table of managed repositories and their lifecycle state — the
//! core of the manager (spec §4.4). Grounded on
//! `domains/services/mod.rs::RunningServicesRegistry`'s
//! `Arc<RwLock<HashMap<..>>>` shape, generalized into the spec's two-lock
//! discipline: a registry lock over the id→entry map, and a per-entry lock
//! over each entry's mutable fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::domains::clone_driver::ProgressEvent;
use crate::domains::git_reader::GitReader;
use crate::domains::progress_hub::{ProgressHub, ProgressUpdate};
use crate::domains::url_normalizer;
use crate::errors::ManagerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Pending,
    Cloning,
    Ready,
    Error,
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepoState::Pending => "pending",
            RepoState::Cloning => "cloning",
            RepoState::Ready => "ready",
            RepoState::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub phase: String,
    pub percent: u8,
}

/// Snapshot DTO returned by `List`. Plain `Serialize` so the eventual HTTP
/// layer can hand it to `serde_json` without reaching into manager
/// internals.
#[derive(Debug, Clone, Serialize)]
pub struct RepoInfo {
    pub id: String,
    pub original_url: String,
    pub state: RepoState,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub last_fetch: Option<DateTime<Utc>>,
}

/// Snapshot DTO returned by `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    pub state: RepoState,
    pub error_message: String,
    pub progress: ProgressSnapshot,
    /// Ambient addition (SPEC_FULL.md §4.5): counted, never alone enough to
    /// flip the state, but surfaced so an operator dashboard could alert.
    pub consecutive_fetch_failures: u32,
}

struct MutableState {
    status: RepoState,
    error_message: String,
    progress: ProgressSnapshot,
    repo_handle: Option<Arc<dyn GitReader>>,
    last_access: DateTime<Utc>,
    last_fetch: Option<DateTime<Utc>>,
    consecutive_fetch_failures: u32,
}

/// The central entity from spec §3. Immutable identity fields live directly
/// on the struct; everything that changes over the entry's lifetime lives
/// behind its own `tokio::sync::Mutex`, so a single `Arc<ManagedRepo>` can be
/// cloned out of the registry's lock and then locked independently.
pub struct ManagedRepo {
    pub id: String,
    pub original_url: String,
    pub canonical_url: String,
    pub disk_path: PathBuf,
    pub created_at: DateTime<Utc>,
    state: Mutex<MutableState>,
}

impl ManagedRepo {
    fn new(id: String, original_url: String, canonical_url: String, disk_path: PathBuf, now: DateTime<Utc>) -> Self {
        Self {
            id,
            original_url,
            canonical_url,
            disk_path,
            created_at: now,
            state: Mutex::new(MutableState {
                status: RepoState::Pending,
                error_message: String::new(),
                progress: ProgressSnapshot::default(),
                repo_handle: None,
                last_access: now,
                last_fetch: None,
                consecutive_fetch_failures: 0,
            }),
        }
    }
}

/// The registry lock (`entries`) guards only the id→entry map. Long-running
/// work — clone, fetch, disk I/O — always happens outside it; mutations to
/// an entry's fields are done under that entry's own lock, held only for
/// the duration of the field update.
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<ManagedRepo>>>,
    progress: Arc<ProgressHub>,
    clone_queue_tx: mpsc::Sender<String>,
    data_dir: PathBuf,
    max_repos: usize,
}

impl Registry {
    pub fn new(
        data_dir: PathBuf,
        max_repos: usize,
        progress: Arc<ProgressHub>,
        clone_queue_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            progress,
            clone_queue_tx,
            data_dir,
            max_repos,
        }
    }

    /// `Add(raw_url) -> id | error`, per spec §4.4.
    pub async fn add(&self, raw_url: &str) -> Result<String, ManagerError> {
        let raw_owned = raw_url.to_string();
        // `normalize` performs a DNS lookup for the SSRF gate, which can
        // block; run it off the async executor.
        let canonical = tokio::task::spawn_blocking(move || url_normalizer::normalize(&raw_owned))
            .await
            .map_err(|e| ManagerError::Io {
                message: format!("normalizer task panicked: {e}"),
            })??;
        let id = url_normalizer::compute_id(&canonical);

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&id).cloned() {
            let mut state = entry.state.lock().await;
            if state.status == RepoState::Error {
                state.status = RepoState::Pending;
                state.error_message.clear();
                drop(state);
                drop(entries);
                log::info!("gitvista: retrying {id} after previous error");
                self.enqueue(&id, &entry).await?;
                return Ok(id);
            }
            log::debug!("gitvista: add({id}) deduplicated against existing entry");
            return Ok(id);
        }

        if entries.len() >= self.max_repos {
            return Err(ManagerError::CapacityExhausted {
                max_repos: self.max_repos,
            });
        }

        let now = Utc::now();
        let entry = Arc::new(ManagedRepo::new(
            id.clone(),
            raw_url.to_string(),
            canonical,
            self.data_dir.join(&id),
            now,
        ));
        entries.insert(id.clone(), entry.clone());
        drop(entries);

        log::info!("gitvista: added repository {id} for {raw_url}");
        self.enqueue(&id, &entry).await?;
        Ok(id)
    }

    async fn enqueue(&self, id: &str, entry: &Arc<ManagedRepo>) -> Result<(), ManagerError> {
        match self.clone_queue_tx.try_send(id.to_string()) {
            Ok(()) => Ok(()),
            Err(_) => {
                {
                    let mut state = entry.state.lock().await;
                    state.status = RepoState::Error;
                    state.error_message = "clone queue full".to_string();
                }
                log::warn!("gitvista: clone queue full, {id} recorded as error");
                // No worker will ever pick this id up, so no terminal event
                // would otherwise be published; a subscriber that raced the
                // `Add` call and got this `id` back alongside `QueueFull`
                // must still see its stream close (spec §4.3).
                self.progress
                    .publish_terminal(id, "error", Some("clone queue full".to_string()))
                    .await;
                Err(ManagerError::QueueFull { id: id.to_string() })
            }
        }
    }

    /// `Get(id) -> handle | error`, per spec §4.4.
    pub async fn get(&self, id: &str) -> Result<Arc<dyn GitReader>, ManagerError> {
        let entry = self.get_entry(id).await;
        let Some(entry) = entry else {
            return Err(ManagerError::NotFound { id: id.to_string() });
        };
        let mut state = entry.state.lock().await;
        match state.status {
            RepoState::Ready => {
                state.last_access = Utc::now();
                Ok(state
                    .repo_handle
                    .clone()
                    .expect("Ready state implies repo_handle is set"))
            }
            RepoState::Pending | RepoState::Cloning => {
                Err(ManagerError::NotReady { id: id.to_string() })
            }
            RepoState::Error => Err(ManagerError::Failed {
                id: id.to_string(),
                message: state.error_message.clone(),
            }),
        }
    }

    /// `Status(id) -> (state, error, progress) | error`, per spec §4.4.
    pub async fn status(&self, id: &str) -> Result<RepoStatus, ManagerError> {
        let entry = self.get_entry(id).await;
        let Some(entry) = entry else {
            return Err(ManagerError::NotFound { id: id.to_string() });
        };
        let state = entry.state.lock().await;
        Ok(RepoStatus {
            state: state.status,
            error_message: state.error_message.clone(),
            progress: state.progress.clone(),
            consecutive_fetch_failures: state.consecutive_fetch_failures,
        })
    }

    /// `List() -> [RepoInfo]`, per spec §4.4. Ordering unspecified.
    pub async fn list(&self) -> Vec<RepoInfo> {
        let entries = self.entries.read().await;
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries.values() {
            let state = entry.state.lock().await;
            infos.push(RepoInfo {
                id: entry.id.clone(),
                original_url: entry.original_url.clone(),
                state: state.status,
                error_message: state.error_message.clone(),
                created_at: entry.created_at,
                last_access: state.last_access,
                last_fetch: state.last_fetch,
            });
        }
        infos
    }

    /// `Remove(id) -> ok | error`, per spec §4.4. Closes subscribers
    /// explicitly since a removed repo never reaches a terminal state on
    /// its own.
    pub async fn remove(&self, id: &str) -> Result<(), ManagerError> {
        let entry = {
            let mut entries = self.entries.write().await;
            entries.remove(id)
        };
        let Some(entry) = entry else {
            return Err(ManagerError::NotFound { id: id.to_string() });
        };
        self.progress.close(id).await;
        if let Err(e) = tokio::fs::remove_dir_all(&entry.disk_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("gitvista: failed to remove directory for {id}: {e}");
            }
        }
        log::info!("gitvista: removed repository {id}");
        Ok(())
    }

    /// `SubscribeProgress(id) -> (stream, unsubscribe)`, per spec §4.3. The
    /// unsubscribe closure just drops the caller's receiver clone; the
    /// channel itself is torn down by the hub on the next terminal event or
    /// explicit `Remove`, never by an individual subscriber leaving.
    pub async fn subscribe_progress(
        &self,
        id: &str,
    ) -> (tokio::sync::watch::Receiver<ProgressUpdate>, impl FnOnce()) {
        let rx = self.progress.subscribe(id).await;
        let guard = rx.clone();
        (rx, move || drop(guard))
    }

    pub async fn get_entry(&self, id: &str) -> Option<Arc<ManagedRepo>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    // -- Scheduler-facing state transitions. --

    pub(crate) async fn begin_clone(&self, id: &str) {
        if let Some(entry) = self.get_entry(id).await {
            let mut state = entry.state.lock().await;
            state.status = RepoState::Cloning;
            state.progress = ProgressSnapshot::default();
        }
    }

    pub(crate) async fn record_progress(&self, id: &str, event: &ProgressEvent) {
        if let Some(entry) = self.get_entry(id).await {
            let mut state = entry.state.lock().await;
            state.progress = ProgressSnapshot {
                phase: event.phase.clone(),
                percent: event.percent,
            };
        }
        self.progress.publish(id, event.clone()).await;
    }

    pub(crate) async fn complete_clone_success(&self, id: &str, handle: Arc<dyn GitReader>) {
        if let Some(entry) = self.get_entry(id).await {
            let mut state = entry.state.lock().await;
            state.status = RepoState::Ready;
            state.repo_handle = Some(handle);
            state.last_fetch = Some(Utc::now());
            state.progress = ProgressSnapshot {
                phase: "ready".to_string(),
                percent: 100,
            };
            state.error_message.clear();
        }
        self.progress.publish_terminal(id, "ready", None).await;
        log::info!("gitvista: {id} is ready");
    }

    pub(crate) async fn complete_clone_failure(&self, id: &str, message: String) {
        if let Some(entry) = self.get_entry(id).await {
            let mut state = entry.state.lock().await;
            state.status = RepoState::Error;
            state.error_message = message.clone();
            state.repo_handle = None;
        }
        self.progress.publish_terminal(id, "error", Some(message.clone())).await;
        log::error!("gitvista: clone failed for {id}: {message}");
    }

    pub(crate) async fn complete_fetch_success(&self, id: &str, handle: Arc<dyn GitReader>) {
        if let Some(entry) = self.get_entry(id).await {
            let mut state = entry.state.lock().await;
            state.repo_handle = Some(handle);
            state.last_fetch = Some(Utc::now());
            state.consecutive_fetch_failures = 0;
        }
    }

    pub(crate) async fn record_fetch_failure(&self, id: &str, message: &str) {
        if let Some(entry) = self.get_entry(id).await {
            let mut state = entry.state.lock().await;
            state.consecutive_fetch_failures += 1;
            log::warn!(
                "gitvista: fetch failed for {id} ({} consecutive): {message}",
                state.consecutive_fetch_failures
            );
        }
    }

    pub(crate) async fn snapshot_ready(&self) -> Vec<Arc<ManagedRepo>> {
        let entries = self.entries.read().await;
        let mut ready = Vec::new();
        for entry in entries.values() {
            let state = entry.state.lock().await;
            if state.status == RepoState::Ready {
                ready.push(entry.clone());
            }
        }
        ready
    }

    /// Collects ids eligible for eviction: not `Pending`/`Cloning`, and
    /// idle longer than `ttl`. Never races a clone, by construction.
    pub(crate) async fn collect_evictable(&self, ttl: Duration) -> Vec<Arc<ManagedRepo>> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut evictable = Vec::new();
        for entry in entries.values() {
            let state = entry.state.lock().await;
            if matches!(state.status, RepoState::Pending | RepoState::Cloning) {
                continue;
            }
            let idle = now.signed_duration_since(state.last_access);
            if idle.to_std().map(|d| d >= ttl).unwrap_or(false) {
                evictable.push(entry.clone());
            }
        }
        evictable
    }

    pub(crate) async fn evict(&self, id: &str) -> Option<Arc<ManagedRepo>> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(id);
        if removed.is_some() {
            log::info!("gitvista: evicting {id} after inactivity");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::git_reader::test_double::FakeGitReader;
    use tempfile::TempDir;

    fn make_registry(max_repos: usize) -> (Registry, TempDir, mpsc::Receiver<String>) {
        let tmp = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(max_repos.max(1));
        let registry = Registry::new(
            tmp.path().to_path_buf(),
            max_repos,
            Arc::new(ProgressHub::new()),
            tx,
        );
        (registry, tmp, rx)
    }

    #[tokio::test]
    async fn dedup_equivalence_across_url_forms() {
        let (registry, _tmp, mut rx) = make_registry(10);
        let id1 = registry.add("https://github.com/u/r.git").await.unwrap();
        let id2 = registry.add("https://GitHub.COM/u/r/").await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(registry.len().await, 1);

        // Only one clone job was enqueued.
        assert_eq!(rx.try_recv().unwrap(), id1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn admission_rejects_beyond_capacity() {
        let (registry, _tmp, _rx) = make_registry(2);
        let id1 = registry.add("https://github.com/u/one").await.unwrap();
        let id2 = registry.add("https://github.com/u/two").await.unwrap();
        assert_ne!(id1, id2);
        let result = registry.add("https://github.com/u/three").await;
        assert!(matches!(
            result,
            Err(ManagerError::CapacityExhausted { max_repos: 2 })
        ));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn ssrf_gate_rejects_and_creates_no_entry() {
        let (registry, _tmp, _rx) = make_registry(10);
        let result = registry.add("https://127.0.0.1/repo").await;
        assert!(matches!(result, Err(ManagerError::PrivateHost { .. })));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn option_like_input_rejected_with_no_entry() {
        let (registry, _tmp, _rx) = make_registry(10);
        let result = registry.add("--upload-pack=evil").await;
        assert!(matches!(result, Err(ManagerError::OptionLike { .. })));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn get_before_ready_is_not_ready() {
        let (registry, _tmp, _rx) = make_registry(10);
        let id = registry.add("https://github.com/u/r").await.unwrap();
        let result = registry.get(&id).await;
        assert!(matches!(result, Err(ManagerError::NotReady { .. })));
    }

    #[tokio::test]
    async fn get_missing_id_returns_not_found() {
        let (registry, _tmp, _rx) = make_registry(10);
        let result = registry.get("deadbeefdeadbeef").await;
        assert!(matches!(result, Err(ManagerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn retry_after_error_reenqueues_and_clears_message() {
        let (registry, _tmp, mut rx) = make_registry(10);
        let id = registry.add("https://github.com/u/r").await.unwrap();
        let _ = rx.try_recv().unwrap();

        registry
            .complete_clone_failure(&id, "boom".to_string())
            .await;
        let status = registry.status(&id).await.unwrap();
        assert_eq!(status.state, RepoState::Error);
        assert_eq!(status.error_message, "boom");

        let retried_id = registry.add("https://github.com/u/r").await.unwrap();
        assert_eq!(retried_id, id);
        let status = registry.status(&id).await.unwrap();
        assert_eq!(status.state, RepoState::Pending);
        assert_eq!(status.error_message, "");
        assert_eq!(rx.try_recv().unwrap(), id);
    }

    #[tokio::test]
    async fn eviction_skips_pending_and_cloning_but_removes_stale_ready() {
        let (registry, tmp, _rx) = make_registry(10);
        let id = registry.add("https://github.com/u/r").await.unwrap();

        let handle: Arc<dyn GitReader> = Arc::new(FakeGitReader::new(tmp.path().join(&id)));
        registry.begin_clone(&id).await;
        registry.complete_clone_success(&id, handle).await;

        {
            let entry = registry.get_entry(&id).await.unwrap();
            let mut state = entry.state.lock().await;
            state.last_access = Utc::now() - chrono::Duration::hours(1);
        }

        let evictable = registry.collect_evictable(Duration::from_millis(1)).await;
        assert_eq!(evictable.len(), 1);
        assert_eq!(evictable[0].id, id);

        let removed = registry.evict(&id).await;
        assert!(removed.is_some());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn pending_entry_with_stale_last_access_is_not_evictable() {
        let (registry, _tmp, _rx) = make_registry(10);
        let id = registry.add("https://github.com/u/r").await.unwrap();
        {
            let entry = registry.get_entry(&id).await.unwrap();
            let mut state = entry.state.lock().await;
            state.last_access = Utc::now() - chrono::Duration::hours(1);
        }
        let evictable = registry.collect_evictable(Duration::from_millis(1)).await;
        assert!(evictable.is_empty());
    }

    #[tokio::test]
    async fn queue_full_marks_entry_as_error() {
        let tmp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        // Fill the channel's one slot so the next try_send fails.
        tx.try_send("occupied".to_string()).unwrap();
        let registry = Registry::new(tmp.path().to_path_buf(), 10, Arc::new(ProgressHub::new()), tx);

        let result = registry.add("https://github.com/u/r").await;
        let Err(ManagerError::QueueFull { id }) = result else {
            panic!("expected QueueFull, got {result:?}");
        };
        assert_eq!(registry.len().await, 1);
        let status = registry.status(&id).await.unwrap();
        assert_eq!(status.state, RepoState::Error);
        assert_eq!(status.error_message, "clone queue full");
    }

    #[tokio::test]
    async fn queue_full_publishes_a_terminal_event_to_existing_subscribers() {
        let tmp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send("occupied".to_string()).unwrap();
        let registry = Registry::new(tmp.path().to_path_buf(), 10, Arc::new(ProgressHub::new()), tx);

        // Subscribe ahead of time, using the id `add` will deterministically
        // produce, the way a caller racing the clone queue would.
        let canonical = url_normalizer::normalize("https://github.com/u/r").unwrap();
        let id = url_normalizer::compute_id(&canonical);
        let (mut rx, _unsubscribe) = registry.subscribe_progress(&id).await;

        let result = registry.add("https://github.com/u/r").await;
        assert!(matches!(result, Err(ManagerError::QueueFull { .. })));

        rx.changed().await.unwrap();
        let update = rx.borrow().clone();
        assert!(update.done);
        assert_eq!(update.state.as_deref(), Some("error"));
        assert!(rx.changed().await.is_err());
    }
}
