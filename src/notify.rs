use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Change;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed changes: one global feed plus lazily created
/// per-resource topics. Correctness never depends on anyone listening.
pub struct ChangeHub {
    all: broadcast::Sender<Change>,
    channels: DashMap<Ulid, broadcast::Sender<Change>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            channels: DashMap::new(),
        }
    }

    /// Subscribe to every committed change.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Change> {
        self.all.subscribe()
    }

    /// Subscribe to changes touching one resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a change. No-op if nobody is listening.
    pub fn send(&self, resource_id: Option<Ulid>, change: &Change) {
        if let Some(id) = resource_id
            && let Some(sender) = self.channels.get(&id) {
                let _ = sender.send(change.clone());
            }
        let _ = self.all.send(change.clone());
    }

    /// Remove a per-resource channel (e.g. when the resource is deleted).
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = ChangeHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let change = Change::ResourceCreated { id: rid };
        hub.send(Some(rid), &change);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, change);
    }

    #[tokio::test]
    async fn global_feed_sees_topicless_changes() {
        let hub = ChangeHub::new();
        let mut rx = hub.subscribe_all();

        let change = Change::SiteCreated { id: Ulid::new() };
        hub.send(None, &change);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, change);
    }

    #[tokio::test]
    async fn per_resource_channel_does_not_leak_siblings() {
        let hub = ChangeHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);

        hub.send(Some(b), &Change::ResourceUpdated { id: b });
        hub.send(Some(a), &Change::ResourceUpdated { id: a });

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received, Change::ResourceUpdated { id: a });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = ChangeHub::new();
        let rid = Ulid::new();
        // No subscriber anywhere, must not panic
        hub.send(Some(rid), &Change::ResourceDeleted { id: rid });
    }
}
