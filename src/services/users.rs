//! User administration service
//!
//! Role changes and bans. Every operation re-reads the caller's role from
//! the store before touching anything; holding a token never grants more
//! than the profile row says right now.
//!
//! ## Mutation shape
//!
//! 1. Re-check the caller's stored role
//! 2. Validate input
//! 3. Read the target's before-state
//! 4. Apply the single-row write
//! 5. Append the audit entry (best-effort)
//! 6. Announce the change for realtime fanout

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::audit::{ActionKind, AuditRecorder};
use crate::auth::{require_admin_role, Caller, Role};
use crate::db::{Profile, ProfileRepository};
use crate::realtime::{ChangeHub, StoreEvent};
use crate::types::{AtrioError, Result};

pub struct UserAdminService {
    profiles: Arc<ProfileRepository>,
    audit: Arc<AuditRecorder>,
    hub: Arc<ChangeHub>,
}

impl UserAdminService {
    pub fn new(
        profiles: Arc<ProfileRepository>,
        audit: Arc<AuditRecorder>,
        hub: Arc<ChangeHub>,
    ) -> Self {
        Self { profiles, audit, hub }
    }

    /// Assign a platform role to a user. Caller must be a platform admin.
    pub async fn update_user_role(
        &self,
        caller: &Caller,
        target_id: &str,
        new_role: &str,
    ) -> Result<Profile> {
        require_admin_role(&self.profiles, &caller.user_id).await?;

        let role = Role::parse_assignable(new_role)
            .ok_or_else(|| AtrioError::Validation(format!("invalid role: {new_role}")))?;

        let before = self
            .profiles
            .get(target_id)
            .await?
            .ok_or_else(|| AtrioError::NotFound(format!("profile {target_id}")))?;

        self.profiles.update_role(target_id, role).await?;

        self.audit
            .record(
                Some(caller),
                ActionKind::RoleChange,
                Some(target_id),
                json!({
                    "old_role": before.role,
                    "new_role": role,
                    "target_username": before.username(),
                }),
            )
            .await;
        self.hub.publish(StoreEvent::ProfileChanged { user_id: target_id.to_string() });

        info!("Updated role of {} from {} to {}", before.username(), before.role, role);

        let mut after = before;
        after.role = role;
        Ok(after)
    }

    /// Ban a user. Caller must be a platform admin.
    pub async fn ban_user(&self, caller: &Caller, target_id: &str) -> Result<Profile> {
        require_admin_role(&self.profiles, &caller.user_id).await?;

        let before = self
            .profiles
            .get(target_id)
            .await?
            .ok_or_else(|| AtrioError::NotFound(format!("profile {target_id}")))?;

        self.profiles.update_role(target_id, Role::Banned).await?;

        self.audit
            .record(
                Some(caller),
                ActionKind::UserBan,
                Some(target_id),
                json!({ "target_username": before.username() }),
            )
            .await;
        self.hub.publish(StoreEvent::ProfileChanged { user_id: target_id.to_string() });

        info!("Banned user {}", before.username());

        let mut after = before;
        after.role = Role::Banned;
        Ok(after)
    }
}
