//! Realtime fanout
//!
//! Store events flow from writers through the [`ChangeHub`] into the
//! [`ActivityFeed`], which maintains the bounded recent-entries buffer and
//! broadcasts feed messages to dashboard clients.

pub mod feed;
pub mod hub;
pub mod recent;

pub use feed::{spawn_feed_task, ActivityFeed, FeedMessage};
pub use hub::{ChangeHub, StoreEvent};
pub use recent::RecentBuffer;
