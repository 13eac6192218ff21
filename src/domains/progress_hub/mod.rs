//! Per-repo pub/sub for clone progress, built on `tokio::sync::watch` —
//! already exactly the single-slot conflating channel with a closable
//! sender that spec §4.3 calls for. The registry-of-senders-keyed-by-id
//! shape mirrors `domains/services/mod.rs::RunningServicesRegistry`.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};

use crate::domains::clone_driver::ProgressEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub phase: String,
    pub percent: u8,
    pub done: bool,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    fn initial() -> Self {
        ProgressUpdate {
            phase: "queued".to_string(),
            percent: 0,
            done: false,
            state: None,
            error: None,
        }
    }

    fn from_event(event: ProgressEvent) -> Self {
        ProgressUpdate {
            phase: event.phase,
            percent: event.percent,
            done: false,
            state: None,
            error: None,
        }
    }

    fn terminal(state: &str, error: Option<String>) -> Self {
        ProgressUpdate {
            phase: state.to_string(),
            percent: if state == "ready" { 100 } else { 0 },
            done: true,
            state: Some(state.to_string()),
            error,
        }
    }
}

/// Registry of `watch::Sender<ProgressUpdate>` keyed by repo id, guarded the
/// same way the entry registry is guarded (one brief lock, never held
/// across I/O).
pub struct ProgressHub {
    channels: RwLock<HashMap<String, watch::Sender<ProgressUpdate>>>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    async fn sender_for(&self, id: &str) -> watch::Sender<ProgressUpdate> {
        if let Some(tx) = self.channels.read().await.get(id) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(ProgressUpdate::initial()).0)
            .clone()
    }

    /// Publish an intermediate progress event for `id`. Creates the channel
    /// on first use so a subscriber racing the first clone update still
    /// gets a sender to subscribe to.
    pub async fn publish(&self, id: &str, event: ProgressEvent) {
        let tx = self.sender_for(id).await;
        let _ = tx.send(ProgressUpdate::from_event(event));
    }

    /// Publish the terminal event and close the subscriber set for `id`.
    /// After this call, every existing and future subscription for `id`
    /// observes a closed channel.
    pub async fn publish_terminal(&self, id: &str, state: &str, error: Option<String>) {
        let tx = self.sender_for(id).await;
        let _ = tx.send(ProgressUpdate::terminal(state, error));
        self.close(id).await;
    }

    /// Subscribe to progress updates for `id`. The returned receiver starts
    /// observing from whatever is currently buffered (no historical
    /// replay), and is driven to completion by the next terminal event, or
    /// immediately closed if `id` has no active clone at all.
    pub async fn subscribe(&self, id: &str) -> watch::Receiver<ProgressUpdate> {
        self.sender_for(id).await.subscribe()
    }

    /// Drop the sender for `id`, closing every outstanding subscription.
    /// Called both after a terminal event and explicitly on `Remove`, since
    /// a removed repo will never produce a terminal event of its own.
    pub async fn close(&self, id: &str) {
        self.channels.write().await.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_published_progress() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe("abc").await;

        hub.publish(
            "abc",
            ProgressEvent {
                phase: "Receiving objects".to_string(),
                percent: 50,
            },
        )
        .await;

        rx.changed().await.unwrap();
        let update = rx.borrow().clone();
        assert_eq!(update.phase, "Receiving objects");
        assert_eq!(update.percent, 50);
        assert!(!update.done);
    }

    #[tokio::test]
    async fn terminal_event_closes_subscribers() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe("abc").await;

        hub.publish_terminal("abc", "ready", None).await;

        rx.changed().await.unwrap();
        let update = rx.borrow().clone();
        assert!(update.done);
        assert_eq!(update.state.as_deref(), Some("ready"));

        // Channel is closed: a further `changed()` call returns an error.
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn conflation_preserves_latest_and_terminal_overwrites_pending() {
        let hub = ProgressHub::new();
        let rx = hub.subscribe("abc").await;

        for percent in [10, 20, 30] {
            hub.publish(
                "abc",
                ProgressEvent {
                    phase: "Receiving objects".to_string(),
                    percent,
                },
            )
            .await;
        }
        hub.publish_terminal("abc", "error", Some("boom".to_string()))
            .await;

        let update = rx.borrow().clone();
        assert!(update.done);
        assert_eq!(update.state.as_deref(), Some("error"));
        assert_eq!(update.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn explicit_close_terminates_subscribers_without_terminal_event() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe("abc").await;
        hub.close("abc").await;
        assert!(rx.changed().await.is_err());
    }
}
