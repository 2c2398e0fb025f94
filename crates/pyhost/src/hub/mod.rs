//! Per-project publish/subscribe hub for process output and sync events.

mod types;

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

pub use types::{LogEvent, STDERR_TAG, SyncAction};

/// Default size of each subscriber's buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Identifier of one subscription within a project.
pub type SubscriberId = u64;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<LogEvent>,
}

struct HubInner {
    /// Project ID -> subscribers in registration order.
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Fan-out of log lines to live subscribers.
///
/// Emission never blocks: a subscriber whose buffer is full misses the event,
/// and events for a project without subscribers are discarded.
#[derive(Clone)]
pub struct LogHub {
    inner: Arc<HubInner>,
}

impl LogHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a subscriber for every subsequent event of `project_id`.
    pub fn subscribe(&self, project_id: &str) -> LogSubscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(project_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(project_id, subscriber = id, "log subscriber registered");
        LogSubscription {
            id,
            project_id: project_id.to_string(),
            rx,
        }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, project_id: &str, id: SubscriberId) -> bool {
        let mut removed = false;
        if let Some(mut subs) = self.inner.subscribers.get_mut(project_id) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed = subs.len() != before;
        }
        self.inner
            .subscribers
            .remove_if(project_id, |_, subs| subs.is_empty());
        if removed {
            debug!(project_id, subscriber = id, "log subscriber removed");
        }
        removed
    }

    /// Deliver `event` to every subscriber of `project_id`.
    pub fn emit(&self, project_id: &str, event: LogEvent) {
        let Some(mut subs) = self.inner.subscribers.get_mut(project_id) else {
            return;
        };
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(project_id, subscriber = sub.id, "subscriber buffer full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Emit a plain log line.
    pub fn log(&self, project_id: &str, message: impl Into<String>) {
        self.emit(project_id, LogEvent::log(message));
    }

    /// Number of live subscribers for a project.
    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.inner
            .subscribers
            .get(project_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// Receiving end of a subscription.
pub struct LogSubscription {
    pub id: SubscriberId,
    pub project_id: String,
    rx: mpsc::Receiver<LogEvent>,
}

impl LogSubscription {
    /// Wait for the next event. `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers_in_order() {
        let hub = LogHub::default();
        let mut a = hub.subscribe("p1");
        let mut b = hub.subscribe("p1");

        hub.log("p1", "one");
        hub.log("p1", "two");

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(LogEvent::log("one")));
            assert_eq!(sub.recv().await, Some(LogEvent::log("two")));
        }
    }

    #[tokio::test]
    async fn test_emit_is_scoped_to_project() {
        let hub = LogHub::default();
        let mut other = hub.subscribe("p2");
        hub.log("p1", "not for you");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_dropped() {
        let hub = LogHub::default();
        hub.log("nobody", "lost");
        let mut late = hub.subscribe("nobody");
        assert!(late.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = LogHub::default();
        let mut sub = hub.subscribe("p1");
        assert!(hub.unsubscribe("p1", sub.id));
        assert!(!hub.unsubscribe("p1", sub.id));
        assert_eq!(hub.subscriber_count("p1"), 0);

        hub.log("p1", "after");
        // Sender was dropped with the registration, so the channel is closed.
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_or_starve_others() {
        let hub = LogHub::new(1);
        let mut slow = hub.subscribe("p1");
        let mut fast = hub.subscribe("p1");

        hub.log("p1", "first");
        assert_eq!(fast.recv().await, Some(LogEvent::log("first")));
        hub.log("p1", "second");

        assert_eq!(fast.recv().await, Some(LogEvent::log("second")));
        assert_eq!(slow.recv().await, Some(LogEvent::log("first")));
        assert!(slow.try_recv().is_none());
        assert_eq!(hub.subscriber_count("p1"), 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_on_emit() {
        let hub = LogHub::default();
        let sub = hub.subscribe("p1");
        drop(sub);
        hub.log("p1", "x");
        assert_eq!(hub.subscriber_count("p1"), 0);
    }

    #[test]
    fn test_stderr_lines_are_tagged() {
        let event = LogEvent::stderr("Traceback");
        assert_eq!(event.message(), Some("[ERROR] Traceback"));
    }
}
