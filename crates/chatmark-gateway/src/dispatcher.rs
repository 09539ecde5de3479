use tokio::sync::broadcast;

use chatmark_types::events::StoreEvent;

/// Fans store-change events out to every connected UI, so panels refresh
/// without polling. Mutating components broadcast; gateway connections
/// subscribe and relay.
#[derive(Clone)]
pub struct Dispatcher {
    broadcast_tx: broadcast::Sender<StoreEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self { broadcast_tx }
    }

    /// Subscribe to store events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Dropped silently when no
    /// client is listening.
    pub fn broadcast(&self, event: StoreEvent) {
        let _ = self.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
