//! Nucleus lifecycle service
//!
//! Creation is a single capability parameterized by the acting role. The
//! policy table decides who may call it, whether the founder auto-joins,
//! and whether the action lands in the audit trail. When the founder joins,
//! their membership row is written in the same store transaction as the
//! nucleus itself.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::audit::{ActionKind, AuditRecorder};
use crate::auth::{current_role, require_admin_role, Caller, NucleusRole};
use crate::db::{
    MembershipRepository, NewNucleus, Nucleus, NucleusChanges, NucleusRepository,
    ProfileRepository,
};
use crate::types::{AtrioError, Result};

/// How the caller approaches nucleus creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActingRole {
    /// Platform admin acting on behalf of the organization
    PlatformAdmin,
    /// Citizen founding their own chapter
    Member,
}

/// Per-acting-role creation behavior
#[derive(Debug, Clone, Copy)]
struct CreationPolicy {
    requires_platform_admin: bool,
    founder_auto_join: bool,
    audited: bool,
}

impl ActingRole {
    fn policy(self) -> CreationPolicy {
        match self {
            // Org-driven creation: the admin curates the directory but does
            // not become a chapter member themselves.
            ActingRole::PlatformAdmin => CreationPolicy {
                requires_platform_admin: true,
                founder_auto_join: false,
                audited: true,
            },
            // Self-service founding: the creator runs their own chapter.
            ActingRole::Member => CreationPolicy {
                requires_platform_admin: false,
                founder_auto_join: true,
                audited: false,
            },
        }
    }
}

pub struct NucleusService {
    profiles: Arc<ProfileRepository>,
    nuclei: Arc<NucleusRepository>,
    members: Arc<MembershipRepository>,
    audit: Arc<AuditRecorder>,
}

impl NucleusService {
    pub fn new(
        profiles: Arc<ProfileRepository>,
        nuclei: Arc<NucleusRepository>,
        members: Arc<MembershipRepository>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self { profiles, nuclei, members, audit }
    }

    /// Create a nucleus under the given acting role's policy
    pub async fn create(
        &self,
        caller: &Caller,
        acting: ActingRole,
        fields: NewNucleus,
    ) -> Result<Nucleus> {
        let policy = acting.policy();
        if policy.requires_platform_admin {
            require_admin_role(&self.profiles, &caller.user_id).await?;
        } else {
            current_role(&self.profiles, &caller.user_id).await?;
        }

        if fields.name.trim().is_empty() {
            return Err(AtrioError::Validation("nucleus name is required".to_string()));
        }

        let founder = policy
            .founder_auto_join
            .then_some((caller.user_id.as_str(), NucleusRole::Admin));
        let nucleus = self
            .nuclei
            .create(fields, Some(&caller.user_id), founder)
            .await?;

        if policy.audited {
            self.audit
                .record(
                    Some(caller),
                    ActionKind::NucleusCreate,
                    Some(&nucleus.id),
                    json!({ "name": nucleus.name, "city": nucleus.city }),
                )
                .await;
        }

        info!("Created nucleus {} ({})", nucleus.name, nucleus.id);
        Ok(nucleus)
    }

    /// Patch a nucleus. Caller must be a platform admin; the audit payload
    /// echoes exactly the provided fields.
    pub async fn update(
        &self,
        caller: &Caller,
        nucleus_id: &str,
        changes: NucleusChanges,
    ) -> Result<Nucleus> {
        require_admin_role(&self.profiles, &caller.user_id).await?;

        if changes.is_empty() {
            return Err(AtrioError::Validation("no fields to update".to_string()));
        }
        if let Some(ref name) = changes.name {
            if name.trim().is_empty() {
                return Err(AtrioError::Validation("nucleus name is required".to_string()));
            }
        }

        let detail = changes.changed_fields();
        self.nuclei.update(nucleus_id, changes).await?;

        self.audit
            .record(Some(caller), ActionKind::NucleusUpdate, Some(nucleus_id), detail)
            .await;

        self.nuclei
            .get(nucleus_id)
            .await?
            .ok_or_else(|| AtrioError::NotFound(format!("nucleus {nucleus_id}")))
    }

    /// Delete a nucleus. Caller must be a platform admin.
    pub async fn delete(&self, caller: &Caller, nucleus_id: &str) -> Result<()> {
        require_admin_role(&self.profiles, &caller.user_id).await?;

        self.nuclei.delete(nucleus_id).await?;

        // Only the entity id is recorded for deletions
        self.audit
            .record(Some(caller), ActionKind::NucleusDelete, Some(nucleus_id), json!({}))
            .await;

        info!("Deleted nucleus {}", nucleus_id);
        Ok(())
    }

    /// Join a nucleus as a plain member. Returns false when the caller was
    /// already a member. Not audited.
    pub async fn join(&self, caller: &Caller, nucleus_id: &str) -> Result<bool> {
        current_role(&self.profiles, &caller.user_id).await?;

        if self.nuclei.get(nucleus_id).await?.is_none() {
            return Err(AtrioError::NotFound(format!("nucleus {nucleus_id}")));
        }

        self.members
            .join(nucleus_id, &caller.user_id, NucleusRole::Member)
            .await
    }

    /// Leave a nucleus. Returns false when no membership existed. Not
    /// audited.
    pub async fn leave(&self, caller: &Caller, nucleus_id: &str) -> Result<bool> {
        current_role(&self.profiles, &caller.user_id).await?;
        self.members.remove(nucleus_id, &caller.user_id).await
    }

    /// Remove another member from a nucleus. Allowed for platform admins
    /// and for nucleus-scoped moderators and admins, except that a nucleus
    /// moderator cannot remove the nucleus admin.
    pub async fn remove_member(
        &self,
        caller: &Caller,
        nucleus_id: &str,
        target_id: &str,
    ) -> Result<()> {
        let platform_role = current_role(&self.profiles, &caller.user_id).await?;

        let caller_scope = self.members.get_role(nucleus_id, &caller.user_id).await?;
        if !platform_role.is_admin() {
            match caller_scope {
                Some(scope) if scope.can_moderate() => {}
                _ => {
                    return Err(AtrioError::Forbidden(
                        "nucleus moderator role required".to_string(),
                    ))
                }
            }
        }

        let nucleus = self
            .nuclei
            .get(nucleus_id)
            .await?
            .ok_or_else(|| AtrioError::NotFound(format!("nucleus {nucleus_id}")))?;

        let target_role = self
            .members
            .get_role(nucleus_id, target_id)
            .await?
            .ok_or_else(|| {
                AtrioError::NotFound(format!("no membership for {target_id} in {nucleus_id}"))
            })?;
        if target_role == NucleusRole::Admin
            && !platform_role.is_admin()
            && caller_scope != Some(NucleusRole::Admin)
        {
            return Err(AtrioError::Forbidden(
                "only the nucleus admin or a platform admin can remove the nucleus admin"
                    .to_string(),
            ));
        }

        self.members.remove(nucleus_id, target_id).await?;

        let target_name = self
            .profiles
            .get(target_id)
            .await?
            .map(|p| p.username().to_string())
            .unwrap_or_else(|| target_id.to_string());
        self.audit
            .record(
                Some(caller),
                ActionKind::NucleusMemberRemove,
                Some(target_id),
                json!({
                    "target_username": target_name,
                    "nucleus_name": nucleus.name,
                }),
            )
            .await;

        info!("Removed {} from nucleus {}", target_name, nucleus.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::auth::Role;
    use crate::db::{ActivityLogRepository, DbManager};
    use crate::realtime::ChangeHub;

    struct Fixture {
        _temp_dir: TempDir,
        profiles: Arc<ProfileRepository>,
        nuclei: Arc<NucleusRepository>,
        members: Arc<MembershipRepository>,
        activity: Arc<ActivityLogRepository>,
        service: NucleusService,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(
            DbManager::new(temp_dir.path().join("test.db"), 4).expect("manager created"),
        );
        db.run_migrations().expect("migrations run");

        let profiles = Arc::new(ProfileRepository::new(Arc::clone(&db)));
        let nuclei = Arc::new(NucleusRepository::new(Arc::clone(&db)));
        let members = Arc::new(MembershipRepository::new(Arc::clone(&db)));
        let activity = Arc::new(ActivityLogRepository::new(db));
        let hub = Arc::new(ChangeHub::new());
        let audit = Arc::new(AuditRecorder::new(Arc::clone(&activity), hub));
        let service = NucleusService::new(
            Arc::clone(&profiles),
            Arc::clone(&nuclei),
            Arc::clone(&members),
            audit,
        );

        profiles.ensure_profile("admin-a", Some("ana@example.org")).await.expect("profile");
        profiles.update_role("admin-a", Role::Admin).await.expect("promoted");
        profiles.ensure_profile("user-v", Some("vera@example.org")).await.expect("profile");
        profiles.ensure_profile("user-w", Some("wil@example.org")).await.expect("profile");

        Fixture { _temp_dir: temp_dir, profiles, nuclei, members, activity, service }
    }

    fn caller(user_id: &str) -> Caller {
        Caller {
            user_id: user_id.to_string(),
            email: None,
            ip: "203.0.113.9".to_string(),
        }
    }

    fn madrid_norte() -> NewNucleus {
        NewNucleus {
            name: "Madrid Norte".to_string(),
            description: "Vecinas del norte".to_string(),
            city: "Alcobendas".to_string(),
            region: "Madrid".to_string(),
            lat: 40.0,
            lng: -3.0,
        }
    }

    #[tokio::test]
    async fn self_service_creator_becomes_nucleus_admin_without_audit() {
        let fx = fixture().await;

        let nucleus = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, madrid_norte())
            .await
            .expect("created");

        assert_eq!(nucleus.created_by.as_deref(), Some("user-v"));
        assert_eq!(nucleus.member_count, 1);
        assert_eq!(
            fx.members.get_role(&nucleus.id, "user-v").await.expect("read"),
            Some(NucleusRole::Admin)
        );
        assert!(fx.activity.list_with_actor(10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn admin_creation_is_audited_and_does_not_join() {
        let fx = fixture().await;

        let nucleus = fx
            .service
            .create(&caller("admin-a"), ActingRole::PlatformAdmin, madrid_norte())
            .await
            .expect("created");

        assert_eq!(nucleus.member_count, 0);
        let entries = fx.activity.list_with_actor(10).await.expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "NUCLEUS_CREATE");
        assert_eq!(entries[0].detail["name"], "Madrid Norte");
        assert_eq!(entries[0].detail["city"], "Alcobendas");
    }

    #[tokio::test]
    async fn admin_path_rejects_non_admin_callers() {
        let fx = fixture().await;

        let err = fx
            .service
            .create(&caller("user-v"), ActingRole::PlatformAdmin, madrid_norte())
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::Forbidden(_)));
        assert!(fx.nuclei.list(true).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let fx = fixture().await;

        let mut fields = madrid_norte();
        fields.name = "   ".to_string();
        let err = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, fields)
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::Validation(_)));
    }

    #[tokio::test]
    async fn update_echoes_exactly_the_changed_fields() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("admin-a"), ActingRole::PlatformAdmin, madrid_norte())
            .await
            .expect("created");

        let changes = NucleusChanges {
            city: Some("Tres Cantos".to_string()),
            active: Some(false),
            ..NucleusChanges::default()
        };
        let updated = fx
            .service
            .update(&caller("admin-a"), &nucleus.id, changes)
            .await
            .expect("updated");
        assert_eq!(updated.city, "Tres Cantos");
        assert!(!updated.active);

        let entries = fx.activity.list_with_actor(10).await.expect("list");
        assert_eq!(entries[0].action, "NUCLEUS_UPDATE");
        assert_eq!(entries[0].detail["city"], "Tres Cantos");
        assert_eq!(entries[0].detail["active"], false);
        assert!(entries[0].detail.get("name").is_none());
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("admin-a"), ActingRole::PlatformAdmin, madrid_norte())
            .await
            .expect("created");

        let err = fx
            .service
            .update(&caller("admin-a"), &nucleus.id, NucleusChanges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_records_only_the_entity_id() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("admin-a"), ActingRole::PlatformAdmin, madrid_norte())
            .await
            .expect("created");

        fx.service.delete(&caller("admin-a"), &nucleus.id).await.expect("deleted");

        assert!(fx.nuclei.get(&nucleus.id).await.expect("get").is_none());
        let entries = fx.activity.list_with_actor(10).await.expect("list");
        assert_eq!(entries[0].action, "NUCLEUS_DELETE");
        assert_eq!(entries[0].target_id.as_deref(), Some(nucleus.id.as_str()));
        assert_eq!(entries[0].detail, serde_json::json!({}));
    }

    #[tokio::test]
    async fn join_and_leave_stay_out_of_the_audit_trail() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("admin-a"), ActingRole::PlatformAdmin, madrid_norte())
            .await
            .expect("created");
        let before = fx.activity.list_with_actor(10).await.expect("list").len();

        assert!(fx.service.join(&caller("user-v"), &nucleus.id).await.expect("joined"));
        assert!(!fx.service.join(&caller("user-v"), &nucleus.id).await.expect("repeat"));
        assert!(fx.service.leave(&caller("user-v"), &nucleus.id).await.expect("left"));

        assert_eq!(fx.activity.list_with_actor(10).await.expect("list").len(), before);
    }

    #[tokio::test]
    async fn join_missing_nucleus_is_not_found() {
        let fx = fixture().await;
        let err = fx.service.join(&caller("user-v"), "missing").await.unwrap_err();
        assert!(matches!(err, AtrioError::NotFound(_)));
    }

    #[tokio::test]
    async fn nucleus_admin_removes_a_member_with_audit() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, madrid_norte())
            .await
            .expect("created");
        fx.service.join(&caller("user-w"), &nucleus.id).await.expect("joined");

        fx.service
            .remove_member(&caller("user-v"), &nucleus.id, "user-w")
            .await
            .expect("removed");

        assert_eq!(fx.members.get_role(&nucleus.id, "user-w").await.expect("read"), None);
        let entries = fx.activity.list_with_actor(10).await.expect("list");
        assert_eq!(entries[0].action, "NUCLEUS_MEMBER_REMOVE");
        assert_eq!(entries[0].detail["target_username"], "wil");
        assert_eq!(entries[0].detail["nucleus_name"], "Madrid Norte");
    }

    #[tokio::test]
    async fn moderator_cannot_remove_the_nucleus_admin() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, madrid_norte())
            .await
            .expect("created");
        fx.members
            .join(&nucleus.id, "user-w", NucleusRole::Moderator)
            .await
            .expect("joined");

        let err = fx
            .service
            .remove_member(&caller("user-w"), &nucleus.id, "user-v")
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::Forbidden(_)));
        assert_eq!(
            fx.members.get_role(&nucleus.id, "user-v").await.expect("read"),
            Some(NucleusRole::Admin)
        );
    }

    #[tokio::test]
    async fn plain_member_cannot_remove_anyone() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, madrid_norte())
            .await
            .expect("created");
        fx.service.join(&caller("user-w"), &nucleus.id).await.expect("joined");

        let err = fx
            .service
            .remove_member(&caller("user-w"), &nucleus.id, "user-v")
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::Forbidden(_)));
    }

    #[tokio::test]
    async fn platform_admin_can_remove_the_nucleus_admin() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, madrid_norte())
            .await
            .expect("created");

        fx.service
            .remove_member(&caller("admin-a"), &nucleus.id, "user-v")
            .await
            .expect("removed");
        assert_eq!(fx.members.get_role(&nucleus.id, "user-v").await.expect("read"), None);
    }

    #[tokio::test]
    async fn removing_a_non_member_is_not_found() {
        let fx = fixture().await;
        let nucleus = fx
            .service
            .create(&caller("user-v"), ActingRole::Member, madrid_norte())
            .await
            .expect("created");

        let err = fx
            .service
            .remove_member(&caller("user-v"), &nucleus.id, "user-w")
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::NotFound(_)));
    }
}
