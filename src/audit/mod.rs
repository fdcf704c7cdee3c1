//! Audit trail recording
//!
//! Every privileged mutation appends one entry after its write commits.
//! Appends are best-effort: a failed append is logged and dropped, and the
//! mutation that already succeeded stays successful.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::Caller;
use crate::db::{ActivityLogRepository, NewActivity};
use crate::realtime::{ChangeHub, StoreEvent};

/// Audited mutation kinds. The stored form is the SCREAMING_SNAKE string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    RoleChange,
    UserBan,
    NucleusCreate,
    NucleusUpdate,
    NucleusDelete,
    NucleusMemberRemove,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleChange => "ROLE_CHANGE",
            Self::UserBan => "USER_BAN",
            Self::NucleusCreate => "NUCLEUS_CREATE",
            Self::NucleusUpdate => "NUCLEUS_UPDATE",
            Self::NucleusDelete => "NUCLEUS_DELETE",
            Self::NucleusMemberRemove => "NUCLEUS_MEMBER_REMOVE",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Appends audit entries and announces them to the change hub
pub struct AuditRecorder {
    activity: Arc<ActivityLogRepository>,
    hub: Arc<ChangeHub>,
}

impl AuditRecorder {
    pub fn new(activity: Arc<ActivityLogRepository>, hub: Arc<ChangeHub>) -> Self {
        Self { activity, hub }
    }

    /// Append one entry for a completed mutation. Without a caller the entry
    /// is skipped entirely.
    pub async fn record(
        &self,
        caller: Option<&Caller>,
        kind: ActionKind,
        target_id: Option<&str>,
        detail: Value,
    ) {
        let Some(caller) = caller else {
            debug!("Skipping {} audit entry: no caller", kind);
            return;
        };
        let appended = self
            .activity
            .append(NewActivity {
                actor_id: Some(&caller.user_id),
                action: kind.as_str(),
                target_id,
                detail: &detail,
                ip_address: &caller.ip,
            })
            .await;
        match appended {
            Ok(entry_id) => {
                self.hub.publish(StoreEvent::ActivityInserted { entry_id });
            }
            Err(e) => warn!("Failed to append {} audit entry: {}", kind, e),
        }
    }
}
