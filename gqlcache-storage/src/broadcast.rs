//! Changed-key notifications.
//!
//! Fan-out over a tokio broadcast channel. Publishing never blocks: a
//! subscriber whose buffer is full loses its oldest notifications and
//! observes `RecvError::Lagged` on its next receive.

use gqlcache_core::ChangedKeys;
use tokio::sync::broadcast;

/// Shared publisher of changed-key sets.
#[derive(Clone)]
pub struct ChangeBroadcaster {
    tx: broadcast::Sender<ChangedKeys>,
}

impl ChangeBroadcaster {
    /// Create a broadcaster buffering `capacity` notifications per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a changed-key set to every current subscriber.
    ///
    /// Empty sets are not published.
    pub fn publish(&self, changed: ChangedKeys) {
        if changed.is_empty() {
            return;
        }
        let keys = changed.len();
        match self.tx.send(changed) {
            Ok(receivers) => {
                tracing::debug!(keys, receivers, "Published changed keys");
            }
            Err(_) => {
                tracing::debug!(keys, "No subscribers for changed keys");
            }
        }
    }

    /// Receive every set published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangedKeys> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Wait for the next changed-key set, skipping past dropped notifications.
///
/// Returns `None` once the broadcaster is gone.
pub async fn next_changes(rx: &mut broadcast::Receiver<ChangedKeys>) -> Option<ChangedKeys> {
    loop {
        match rx.recv().await {
            Ok(changed) => return Some(changed),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Subscriber lagged, changed keys were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
