use std::hash::Hash;

use dashmap::DashMap;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub keyed per item (index events) or per invoice (sync records).
pub struct NotifyHub<K, E> {
    channels: DashMap<K, broadcast::Sender<E>>,
}

impl<K, E> Default for NotifyHub<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> NotifyHub<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a key. Creates the channel if needed.
    pub fn subscribe(&self, key: K) -> broadcast::Receiver<E> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, key: &K, event: &E) {
        if let Some(sender) = self.channels.get(key) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when an item is removed from the catalog).
    pub fn remove(&self, key: &K) {
        self.channels.remove(key);
    }
}
