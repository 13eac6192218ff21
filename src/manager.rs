//! `RepoManager`: the process-wide registry the surrounding HTTP/WebSocket
//! layer talks to (spec §1, §6). Constructs the registry, the progress hub,
//! and the scheduler's background activities, and exposes the narrow
//! `Add`/`Get`/`Status`/`List`/`Remove`/`SubscribeProgress` surface.
//!
//! Lifecycle is `new -> start -> close`, the same shape
//! `src/services/mod.rs::ServiceHandles` gives the rest of this codebase's
//! long-lived subsystems: no process-wide singleton, just a struct you
//! construct, run, and tear down.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::watch::Receiver as WatchReceiver;

use crate::config::ManagerConfig;
use crate::domains::git_reader::GitReader;
use crate::domains::progress_hub::{ProgressHub, ProgressUpdate};
use crate::domains::registry::{Registry, RepoInfo, RepoStatus};
use crate::domains::scheduler::{Scheduler, SchedulerConfig};
use crate::errors::ManagerError;

pub struct RepoManager {
    registry: Arc<Registry>,
    scheduler: Option<Scheduler>,
    data_dir: PathBuf,
}

impl RepoManager {
    /// Constructs the registry and starts the scheduler's background
    /// activities (clone worker pool, fetch loop, eviction loop).
    ///
    /// Creates `data_dir` with mode `0750` if absent. Per the resolved Open
    /// Question (SPEC_FULL.md §4.5), directories already present under
    /// `data_dir` from a prior run are left untouched: not garbage-collected,
    /// not auto-registered.
    pub async fn new(config: ManagerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        ensure_data_dir(&config.data_dir).await?;

        let progress = Arc::new(ProgressHub::new());
        let queue_capacity = config.max_repos;
        let (clone_queue_tx, clone_queue_rx) = mpsc::channel(queue_capacity);

        let registry = Arc::new(Registry::new(
            config.data_dir.clone(),
            config.max_repos,
            progress,
            clone_queue_tx,
        ));

        let scheduler = Scheduler::start(
            registry.clone(),
            clone_queue_rx,
            SchedulerConfig {
                max_concurrent_clones: config.max_concurrent_clones,
                fetch_interval: config.fetch_interval(),
                fetch_timeout: config.fetch_timeout(),
                clone_timeout: config.clone_timeout(),
                inactivity_ttl: config.inactivity_ttl(),
                eviction_interval: config.eviction_interval(),
            },
        );

        log::info!(
            "gitvista: manager started (data_dir={}, max_repos={}, max_concurrent_clones={})",
            config.data_dir.display(),
            config.max_repos,
            config.max_concurrent_clones
        );

        Ok(Self {
            registry,
            scheduler: Some(scheduler),
            data_dir: config.data_dir,
        })
    }

    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    pub async fn add(&self, raw_url: &str) -> Result<String, ManagerError> {
        self.registry.add(raw_url).await
    }

    pub async fn get(&self, id: &str) -> Result<Arc<dyn GitReader>, ManagerError> {
        self.registry.get(id).await
    }

    pub async fn status(&self, id: &str) -> Result<RepoStatus, ManagerError> {
        self.registry.status(id).await
    }

    pub async fn list(&self) -> Vec<RepoInfo> {
        self.registry.list().await
    }

    pub async fn remove(&self, id: &str) -> Result<(), ManagerError> {
        self.registry.remove(id).await
    }

    pub async fn subscribe_progress(&self, id: &str) -> (WatchReceiver<ProgressUpdate>, impl FnOnce()) {
        self.registry.subscribe_progress(id).await
    }

    /// Cancels the scheduler's root token and waits for every background
    /// activity to exit before returning.
    pub async fn close(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
        log::info!("gitvista: manager stopped");
    }
}

async fn ensure_data_dir(path: &std::path::Path) -> anyhow::Result<()> {
    if path.exists() {
        return Ok(());
    }
    tokio::fs::create_dir_all(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o750);
        tokio::fs::set_permissions(path, perms).await?;
    }
    Ok(())
}
