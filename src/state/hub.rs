use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::session::SessionRecord;

/// Per-session broadcast channels used by the push subscriptions.
///
/// A channel is created on first subscription and dropped once the last
/// subscriber went away, either on release or when a publish notices it.
pub struct SessionHubs {
    channels: DashMap<Uuid, broadcast::Sender<SessionRecord>>,
    capacity: usize,
}

impl SessionHubs {
    /// Hubs whose channels buffer `capacity` records per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber for `id`; it receives every record published afterwards.
    pub fn subscribe(&self, id: Uuid) -> broadcast::Receiver<SessionRecord> {
        self.channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send `record` to the subscribers of its session, ignoring delivery errors.
    pub fn publish(&self, record: &SessionRecord) {
        let Some(sender) = self.channels.get(&record.id) else {
            return;
        };
        if sender.send(record.clone()).is_err() {
            drop(sender);
            self.channels
                .remove_if(&record.id, |_, sender| sender.receiver_count() == 0);
        }
    }

    /// Drop the channel of `id` if nobody listens to it any more.
    pub fn release(&self, id: &Uuid) {
        self.channels
            .remove_if(id, |_, sender| sender.receiver_count() == 0);
    }

    /// Close the channel of a deleted session; subscribers see the stream end.
    pub fn remove(&self, id: &Uuid) {
        self.channels.remove(id);
    }

    /// Number of channels currently held, listened to or not.
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of sessions with at least one live subscriber.
    pub fn watched(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.receiver_count() > 0)
            .count()
    }
}
