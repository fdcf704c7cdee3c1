//! Store change hub
//!
//! Repositories stay oblivious to realtime concerns; the services and the
//! audit recorder publish here after a successful write, and the feed task
//! turns events into client-facing messages.

use tokio::sync::broadcast;

/// A committed store change other components may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A new audit entry was appended
    ActivityInserted { entry_id: i64 },
    /// A profile row changed (role, ban, tier, census, district)
    ProfileChanged { user_id: String },
}

/// Hub for fanning out store events to interested tasks
pub struct ChangeHub {
    sender: broadcast::Sender<StoreEvent>,
}

impl ChangeHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: StoreEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
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
    async fn subscribers_see_published_events() {
        let hub = ChangeHub::new();
        let mut rx = hub.subscribe();

        hub.publish(StoreEvent::ActivityInserted { entry_id: 7 });
        hub.publish(StoreEvent::ProfileChanged { user_id: "user-j".to_string() });

        assert_eq!(rx.recv().await.expect("event"), StoreEvent::ActivityInserted { entry_id: 7 });
        assert_eq!(
            rx.recv().await.expect("event"),
            StoreEvent::ProfileChanged { user_id: "user-j".to_string() }
        );
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let hub = ChangeHub::new();
        hub.publish(StoreEvent::ActivityInserted { entry_id: 1 });
    }
}
