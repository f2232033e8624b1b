use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per schedule.
///
/// Events are published after apply while the schedule lock is still held,
/// so each subscriber observes them in commit order.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to committed events for a schedule. Creates the channel if
    /// needed; subscribing to an id that does not exist yet is allowed.
    pub fn subscribe(&self, schedule_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(schedule_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, schedule_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&schedule_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (when the schedule is deleted).
    pub fn remove(&self, schedule_id: &Ulid) {
        self.channels.remove(schedule_id);
    }
}
