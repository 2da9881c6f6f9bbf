use tokio::sync::broadcast;

/// In-process broadcast bus used for lock notifications and session event streams.
///
/// Dropping a receiver returned by [`EventBus::subscribe`] unsubscribes it.
pub struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Construct a new bus backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring the no-subscriber case.
    pub fn publish(&self, event: T) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
