//! Background activities that drive the registry's state machine: the clone
//! worker pool, the periodic fetch loop, and the inactivity eviction loop.
//! Expressed as `tokio::task::JoinSet` tasks communicating over a bounded
//! `mpsc` (the clone queue) — the natural tokio idiom for a fixed pool
//! draining a queue plus independent interval-driven loops, the same shape
//! `domains/acp/manager.rs` uses for its reader/writer/stderr pump tasks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domains::clone_driver;
use crate::domains::git_reader;
use crate::domains::registry::Registry;

pub struct SchedulerConfig {
    pub max_concurrent_clones: usize,
    pub fetch_interval: Duration,
    pub fetch_timeout: Duration,
    pub clone_timeout: Duration,
    pub inactivity_ttl: Duration,
    pub eviction_interval: Duration,
}

/// Owns the three background activities and their `CancellationToken`.
/// `shutdown` cancels the token and joins every task; callers don't need to
/// know how many workers are running.
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Scheduler {
    pub fn start(
        registry: Arc<Registry>,
        clone_queue_rx: mpsc::Receiver<String>,
        config: SchedulerConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let clone_queue_rx = Arc::new(tokio::sync::Mutex::new(clone_queue_rx));
        for worker_id in 0..config.max_concurrent_clones {
            let registry = registry.clone();
            let cancel = cancel.clone();
            let rx = clone_queue_rx.clone();
            let clone_timeout = config.clone_timeout;
            tasks.spawn(async move {
                clone_worker_loop(worker_id, registry, rx, cancel, clone_timeout).await;
            });
        }

        {
            let registry = registry.clone();
            let cancel = cancel.clone();
            let interval = config.fetch_interval;
            let timeout = config.fetch_timeout;
            tasks.spawn(async move {
                fetch_loop(registry, cancel, interval, timeout).await;
            });
        }

        {
            let registry = registry.clone();
            let cancel = cancel.clone();
            let ttl = config.inactivity_ttl;
            let interval = config.eviction_interval;
            tasks.spawn(async move {
                eviction_loop(registry, cancel, ttl, interval).await;
            });
        }

        Self { cancel, tasks }
    }

    /// Cancels the manager's root token and waits for every background
    /// activity to exit. In-flight clones and fetches are cancelled via
    /// their subprocess's child-kill path as part of that exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn clone_worker_loop(
    worker_id: usize,
    registry: Arc<Registry>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
    clone_timeout: Duration,
) {
    loop {
        let id = {
            let mut rx = rx.lock().await;
            tokio::select! {
                item = rx.recv() => item,
                () = cancel.cancelled() => None,
            }
        };
        let Some(id) = id else {
            log::debug!("gitvista: clone worker {worker_id} shutting down");
            return;
        };
        run_one_clone(&registry, &id, &cancel, clone_timeout).await;
    }
}

async fn run_one_clone(registry: &Arc<Registry>, id: &str, cancel: &CancellationToken, clone_timeout: Duration) {
    let Some(entry) = registry.get_entry(id).await else {
        log::warn!("gitvista: clone worker picked up unknown id {id}");
        return;
    };

    registry.begin_clone(id).await;

    if entry.disk_path.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(&entry.disk_path).await {
            log::warn!("gitvista: failed to clear stale directory for {id}: {e}");
        }
    }

    // `clone_driver::clone`'s progress callback is synchronous; forward
    // each event over an unbounded channel to a task that can actually
    // await the registry/progress-hub locks, rather than blocking the
    // subprocess's stderr pump on them.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<clone_driver::ProgressEvent>();
    let forward_registry = registry.clone();
    let forward_id = id.to_string();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            forward_registry.record_progress(&forward_id, &event).await;
        }
    });

    let result = clone_driver::clone(
        cancel,
        &entry.canonical_url,
        &entry.disk_path,
        clone_timeout,
        move |event| {
            let _ = progress_tx.send(event);
        },
    )
    .await;
    let _ = forward_task.await;

    match result {
        Ok(()) => match git_reader::open(&entry.disk_path) {
            Ok(handle) => registry.complete_clone_success(id, handle).await,
            Err(e) => {
                let message = format!("clone succeeded but failed to open repository: {e}");
                if let Err(remove_err) = tokio::fs::remove_dir_all(&entry.disk_path).await {
                    log::warn!(
                        "gitvista: failed to clean up {id} after handle-open failure: {remove_err}"
                    );
                }
                registry.complete_clone_failure(id, message).await;
            }
        },
        Err(e) => {
            if entry.disk_path.exists() {
                if let Err(remove_err) = tokio::fs::remove_dir_all(&entry.disk_path).await {
                    log::warn!("gitvista: failed to clean up {id} after clone failure: {remove_err}");
                }
            }
            registry.complete_clone_failure(id, e.to_string()).await;
        }
    }
}

async fn fetch_loop(registry: Arc<Registry>, cancel: CancellationToken, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => {
                log::debug!("gitvista: fetch loop shutting down");
                return;
            }
        }

        let ready = registry.snapshot_ready().await;
        for entry in ready {
            if cancel.is_cancelled() {
                return;
            }
            match clone_driver::fetch(&cancel, &entry.disk_path, timeout).await {
                Ok(()) => match git_reader::open(&entry.disk_path) {
                    Ok(handle) => registry.complete_fetch_success(&entry.id, handle).await,
                    Err(e) => {
                        registry
                            .record_fetch_failure(&entry.id, &format!("failed to reopen after fetch: {e}"))
                            .await;
                    }
                },
                Err(e) => {
                    registry.record_fetch_failure(&entry.id, &e.to_string()).await;
                }
            }
        }
    }
}

async fn eviction_loop(registry: Arc<Registry>, cancel: CancellationToken, ttl: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => {
                log::debug!("gitvista: eviction loop shutting down");
                return;
            }
        }
        run_eviction_pass(&registry, ttl).await;
    }
}

async fn run_eviction_pass(registry: &Registry, ttl: Duration) {
    let evictable = registry.collect_evictable(ttl).await;
    for entry in evictable {
        if let Err(e) = tokio::fs::remove_dir_all(&entry.disk_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("gitvista: failed to remove directory during eviction of {}: {e}", entry.id);
            }
        }
        registry.evict(&entry.id).await;
    }
}
