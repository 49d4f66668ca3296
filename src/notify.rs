use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Booking, Event, NannyId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-nanny broadcast of committed events.
pub struct NotifyHub {
    channels: DashMap<NannyId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a nanny's events. Creates the channel if needed.
    pub fn subscribe(&self, nanny_id: NannyId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(nanny_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, nanny_id: NannyId, event: &Event) {
        if let Some(sender) = self.channels.get(&nanny_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a channel once its last receiver is gone.
    pub fn prune(&self, nanny_id: NannyId) {
        self.channels
            .remove_if(&nanny_id, |_, sender| sender.receiver_count() == 0);
    }
}

/// A downstream collaborator told about every committed booking
/// (confirmation mail, calendar sync, and so on).
///
/// Runs after the booking is durable. A failure is logged and counted, the
/// booking stands.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn booking_assigned(&self, booking: &Booking) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError(pub String);

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dispatch failed: {}", self.0)
    }
}

impl std::error::Error for DispatchError {}
