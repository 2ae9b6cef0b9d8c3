use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-provider booking events. Downstream dispatchers
/// (notification senders, calendar feeds) subscribe here; formatting and
/// delivery are theirs.
pub struct EventHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a provider's events. Creates the channel if needed.
    pub fn subscribe(&self, provider: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(provider)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, provider: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&provider) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a provider's channel.
    #[allow(dead_code)]
    pub fn remove(&self, provider: &Ulid) {
        self.channels.remove(provider);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
