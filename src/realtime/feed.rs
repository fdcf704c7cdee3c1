//! Live activity feed
//!
//! Mirrors the newest audit entries and the community counters for
//! dashboard clients. The feed task reacts to store events: an appended
//! audit entry is re-read joined with its actor and pushed to the front of
//! the bounded buffer; a profile change recomputes the counters. Clients
//! that fall behind miss messages; there is no replay.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::hub::{ChangeHub, StoreEvent};
use super::recent::RecentBuffer;
use crate::db::{ActivityLogRepository, ActivityView, CommunityMetrics, ProfileRepository};
use crate::types::Result;

/// Message sent from server to feed clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Initial state dump after connection
    Snapshot {
        timestamp: String,
        entries: Vec<ActivityView>,
        metrics: CommunityMetrics,
    },
    /// One freshly appended audit entry
    Activity {
        timestamp: String,
        entry: ActivityView,
    },
    /// Community counters after a profile change
    Metrics {
        timestamp: String,
        metrics: CommunityMetrics,
    },
    /// Error message
    Error {
        message: String,
    },
}

/// Holds the recent-entries buffer and fans feed messages out to clients
pub struct ActivityFeed {
    activity: Arc<ActivityLogRepository>,
    profiles: Arc<ProfileRepository>,
    recent: RwLock<RecentBuffer<ActivityView>>,
    sender: broadcast::Sender<FeedMessage>,
}

impl ActivityFeed {
    pub fn new(
        activity: Arc<ActivityLogRepository>,
        profiles: Arc<ProfileRepository>,
        capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            activity,
            profiles,
            recent: RwLock::new(RecentBuffer::new(capacity)),
            sender,
        }
    }

    /// Fill the buffer from the store. Run once at startup so the first
    /// snapshot is not empty.
    pub async fn prime(&self) -> Result<()> {
        let capacity = self.recent.read().await.capacity();
        let entries = self.activity.list_with_actor(capacity as u32).await?;
        let mut recent = self.recent.write().await;
        for entry in entries.into_iter().rev() {
            recent.prepend(entry);
        }
        Ok(())
    }

    /// Subscribe to feed messages
    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.sender.subscribe()
    }

    /// Current state for a newly connected client
    pub async fn snapshot(&self) -> Result<FeedMessage> {
        let entries = self.recent.read().await.snapshot();
        let metrics = self.profiles.community_metrics().await?;
        Ok(FeedMessage::Snapshot {
            timestamp: now_iso(),
            entries,
            metrics,
        })
    }

    /// React to one store event
    pub async fn handle_event(&self, event: StoreEvent) {
        match event {
            StoreEvent::ActivityInserted { entry_id } => match self.activity.get_with_actor(entry_id).await {
                Ok(Some(entry)) => {
                    self.recent.write().await.prepend(entry.clone());
                    self.broadcast(FeedMessage::Activity {
                        timestamp: now_iso(),
                        entry,
                    });
                }
                Ok(None) => debug!("Activity entry {} vanished before feed pickup", entry_id),
                Err(e) => warn!("Failed to load activity entry {}: {}", entry_id, e),
            },
            StoreEvent::ProfileChanged { user_id } => match self.profiles.community_metrics().await {
                Ok(metrics) => {
                    debug!("Recomputed community metrics after change to {}", user_id);
                    self.broadcast(FeedMessage::Metrics {
                        timestamp: now_iso(),
                        metrics,
                    });
                }
                Err(e) => warn!("Failed to recompute community metrics: {}", e),
            },
        }
    }

    /// Broadcast a message to all connected clients
    fn broadcast(&self, msg: FeedMessage) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(msg);
    }
}

/// Run the feed's event loop until the hub closes
pub fn spawn_feed_task(feed: Arc<ActivityFeed>, hub: Arc<ChangeHub>) -> JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => feed.handle_event(event).await,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Feed task lagged, skipped {} store events", skipped);
                    continue;
                }
            }
        }
    })
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::timeout;

    use super::*;
    use crate::db::{DbManager, NewActivity};

    struct Fixture {
        _temp_dir: TempDir,
        activity: Arc<ActivityLogRepository>,
        profiles: Arc<ProfileRepository>,
        feed: Arc<ActivityFeed>,
    }

    async fn fixture(capacity: usize) -> Fixture {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(
            DbManager::new(temp_dir.path().join("test.db"), 4).expect("manager created"),
        );
        db.run_migrations().expect("migrations run");

        let activity = Arc::new(ActivityLogRepository::new(Arc::clone(&db)));
        let profiles = Arc::new(ProfileRepository::new(db));
        profiles.ensure_profile("admin-a", Some("ana@example.org")).await.expect("profile");

        let feed = Arc::new(ActivityFeed::new(
            Arc::clone(&activity),
            Arc::clone(&profiles),
            capacity,
        ));
        Fixture { _temp_dir: temp_dir, activity, profiles, feed }
    }

    async fn append_entry(activity: &ActivityLogRepository, action: &str) -> i64 {
        let detail = json!({});
        activity
            .append(NewActivity {
                actor_id: Some("admin-a"),
                action,
                target_id: None,
                detail: &detail,
                ip_address: "unknown",
            })
            .await
            .expect("appended")
    }

    #[tokio::test]
    async fn inserted_entry_reaches_the_feed_front() {
        let fx = fixture(15).await;
        let mut rx = fx.feed.subscribe();

        let id = append_entry(&fx.activity, "USER_BAN").await;
        fx.feed.handle_event(StoreEvent::ActivityInserted { entry_id: id }).await;

        let msg = rx.recv().await.expect("message");
        let FeedMessage::Activity { entry, .. } = msg else {
            panic!("expected activity message");
        };
        assert_eq!(entry.id, id);
        assert_eq!(entry.actor_name.as_deref(), Some("ana"));

        let snapshot = fx.feed.snapshot().await.expect("snapshot");
        let FeedMessage::Snapshot { entries, .. } = snapshot else {
            panic!("expected snapshot");
        };
        assert_eq!(entries[0].id, id);
    }

    #[tokio::test]
    async fn buffer_never_exceeds_capacity() {
        let fx = fixture(15).await;

        let mut last_id = 0;
        for _ in 0..20 {
            last_id = append_entry(&fx.activity, "NUCLEUS_UPDATE").await;
            fx.feed.handle_event(StoreEvent::ActivityInserted { entry_id: last_id }).await;
        }

        let FeedMessage::Snapshot { entries, .. } = fx.feed.snapshot().await.expect("snapshot")
        else {
            panic!("expected snapshot");
        };
        assert_eq!(entries.len(), 15);
        assert_eq!(entries[0].id, last_id);
    }

    #[tokio::test]
    async fn profile_change_recomputes_metrics() {
        let fx = fixture(15).await;
        let mut rx = fx.feed.subscribe();

        fx.profiles.ensure_profile("user-j", None).await.expect("profile");
        fx.feed
            .handle_event(StoreEvent::ProfileChanged { user_id: "user-j".to_string() })
            .await;

        let msg = rx.recv().await.expect("message");
        let FeedMessage::Metrics { metrics, .. } = msg else {
            panic!("expected metrics message");
        };
        assert_eq!(metrics.total_profiles, 2);
        assert_eq!(metrics.total_admins, 0);
    }

    #[tokio::test]
    async fn prime_loads_existing_entries_newest_first() {
        let fx = fixture(15).await;

        let first = append_entry(&fx.activity, "NUCLEUS_CREATE").await;
        let second = append_entry(&fx.activity, "ROLE_CHANGE").await;
        fx.feed.prime().await.expect("primed");

        let FeedMessage::Snapshot { entries, .. } = fx.feed.snapshot().await.expect("snapshot")
        else {
            panic!("expected snapshot");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second);
        assert_eq!(entries[1].id, first);
    }

    #[tokio::test]
    async fn feed_task_relays_hub_events() {
        let fx = fixture(15).await;
        let hub = Arc::new(ChangeHub::new());
        let task = spawn_feed_task(Arc::clone(&fx.feed), Arc::clone(&hub));
        let mut rx = fx.feed.subscribe();

        let id = append_entry(&fx.activity, "NUCLEUS_DELETE").await;
        hub.publish(StoreEvent::ActivityInserted { entry_id: id });

        let msg = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("feed message within one cycle")
            .expect("channel open");
        let FeedMessage::Activity { entry, .. } = msg else {
            panic!("expected activity message");
        };
        assert_eq!(entry.id, id);

        task.abort();
    }

    #[test]
    fn feed_messages_serialize_with_type_tags() {
        let msg = FeedMessage::Metrics {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            metrics: CommunityMetrics { total_profiles: 4, total_admins: 1 },
        };
        let json = serde_json::to_value(&msg).expect("serialized");
        assert_eq!(json["type"], "metrics");
        assert_eq!(json["metrics"]["totalProfiles"], 4);

        let err = FeedMessage::Error { message: "bad".to_string() };
        let json = serde_json::to_value(&err).expect("serialized");
        assert_eq!(json["type"], "error");
    }
}
