//! Profile repository
//!
//! Profiles are created by first-login upsert and never hard-deleted; ban is
//! a role value. The role column is the single source of privilege and is
//! re-read on every guarded call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::task;

use super::{is_constraint_violation, manager::DbManager, now_rfc3339, parse_timestamp};
use crate::auth::Role;
use crate::types::{AtrioError, Result};

const PROFILE_COLUMNS: &str = "id, display_name, handle, email, role, census_registered_at, \
     district_region, district_locality, district_postal_code, payment_tier, \
     payment_customer_id, created_at, updated_at";

/// One row of the profiles table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub census_registered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district_locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district_postal_code: Option<String>,
    pub payment_tier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Name used in audit payloads: handle first, display name otherwise
    pub fn username(&self) -> &str {
        self.handle.as_deref().unwrap_or(&self.display_name)
    }
}

/// The two dashboard aggregates, always recomputed from the table
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityMetrics {
    pub total_profiles: i64,
    pub total_admins: i64,
}

pub struct ProfileRepository {
    db: Arc<DbManager>,
}

impl ProfileRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// First-login upsert: create a citizen row if none exists, then return
    /// the current row.
    pub async fn ensure_profile(&self, user_id: &str, email: Option<&str>) -> Result<Profile> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        let email = email.map(|e| e.to_string());
        task::spawn_blocking(move || -> Result<Profile> {
            let conn = db.get_connection()?;
            let display_name = email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .unwrap_or_default()
                .to_string();
            let now = now_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO profiles (id, display_name, email, role, payment_tier, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 'citizen', 'none', ?4, ?4)",
                params![user_id, display_name, email, now],
            )?;
            let profile = conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![user_id],
                map_profile_row,
            )?;
            Ok(profile)
        })
        .await?
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<Profile>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Profile>> {
            let conn = db.get_connection()?;
            let profile = conn
                .query_row(
                    &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                    params![user_id],
                    map_profile_row,
                )
                .optional()?;
            Ok(profile)
        })
        .await?
    }

    /// Fresh role read for the authorization guard. No caching anywhere on
    /// this path.
    pub async fn get_role(&self, user_id: &str) -> Result<Option<Role>> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Role>> {
            let conn = db.get_connection()?;
            let role = conn
                .query_row(
                    "SELECT role FROM profiles WHERE id = ?1",
                    params![user_id],
                    |row| {
                        let raw: String = row.get(0)?;
                        parse_role(0, raw)
                    },
                )
                .optional()?;
            Ok(role)
        })
        .await?
    }

    pub async fn update_role(&self, user_id: &str, role: Role) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let changed = conn.execute(
                "UPDATE profiles SET role = ?1, updated_at = ?2 WHERE id = ?3",
                params![role.as_str(), now_rfc3339(), user_id],
            )?;
            if changed == 0 {
                return Err(AtrioError::NotFound(format!("profile {user_id}")));
            }
            Ok(())
        })
        .await?
    }

    pub async fn update_district(
        &self,
        user_id: &str,
        region: Option<String>,
        locality: Option<String>,
        postal_code: Option<String>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let changed = conn.execute(
                "UPDATE profiles SET district_region = ?1, district_locality = ?2, \
                 district_postal_code = ?3, updated_at = ?4 WHERE id = ?5",
                params![region, locality, postal_code, now_rfc3339(), user_id],
            )?;
            if changed == 0 {
                return Err(AtrioError::NotFound(format!("profile {user_id}")));
            }
            Ok(())
        })
        .await?
    }

    pub async fn set_census_registered(&self, user_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let now = now_rfc3339();
            let changed = conn.execute(
                "UPDATE profiles SET census_registered_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, user_id],
            )?;
            if changed == 0 {
                return Err(AtrioError::NotFound(format!("profile {user_id}")));
            }
            Ok(())
        })
        .await?
    }

    /// Self-service edit of display name and handle. Unset fields keep their
    /// current value.
    pub async fn update_profile_fields(
        &self,
        user_id: &str,
        display_name: Option<String>,
        handle: Option<String>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let result = conn.execute(
                "UPDATE profiles SET display_name = COALESCE(?1, display_name), \
                 handle = COALESCE(?2, handle), updated_at = ?3 WHERE id = ?4",
                params![display_name, handle, now_rfc3339(), user_id],
            );
            match result {
                Ok(0) => Err(AtrioError::NotFound(format!("profile {user_id}"))),
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(AtrioError::Validation("handle already in use".to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    pub async fn update_payment_tier(&self, user_id: &str, tier: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        let tier = tier.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let changed = conn.execute(
                "UPDATE profiles SET payment_tier = ?1, updated_at = ?2 WHERE id = ?3",
                params![tier, now_rfc3339(), user_id],
            )?;
            if changed == 0 {
                return Err(AtrioError::NotFound(format!("profile {user_id}")));
            }
            Ok(())
        })
        .await?
    }

    pub async fn set_payment_customer(&self, user_id: &str, customer_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        let customer_id = customer_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE profiles SET payment_customer_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![customer_id, now_rfc3339(), user_id],
            )?;
            Ok(())
        })
        .await?
    }

    /// Update tier for the profile holding this customer id. Returns the
    /// affected user id, or `None` when no profile carries the customer id.
    pub async fn update_tier_by_customer(
        &self,
        customer_id: &str,
        tier: &str,
    ) -> Result<Option<String>> {
        let db = Arc::clone(&self.db);
        let customer_id = customer_id.to_string();
        let tier = tier.to_string();
        task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = db.get_connection()?;
            let user_id: Option<String> = conn
                .query_row(
                    "SELECT id FROM profiles WHERE payment_customer_id = ?1",
                    params![customer_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(ref id) = user_id {
                conn.execute(
                    "UPDATE profiles SET payment_tier = ?1, updated_at = ?2 WHERE id = ?3",
                    params![tier, now_rfc3339(), id],
                )?;
            }
            Ok(user_id)
        })
        .await?
    }

    /// Citizens table, newest first
    pub async fn list(&self, limit: u32) -> Result<Vec<Profile>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<Profile>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![i64::from(limit)], map_profile_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await?
    }

    /// The two dashboard aggregates. Always two fresh count queries; the feed
    /// never trusts a change payload for these.
    pub async fn community_metrics(&self) -> Result<CommunityMetrics> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<CommunityMetrics> {
            let conn = db.get_connection()?;
            let total_profiles: i64 =
                conn.query_row("SELECT COUNT(*) FROM profiles", params![], |row| row.get(0))?;
            let total_admins: i64 = conn.query_row(
                "SELECT COUNT(*) FROM profiles WHERE role = 'admin'",
                params![],
                |row| row.get(0),
            )?;
            Ok(CommunityMetrics { total_profiles, total_admins })
        })
        .await?
    }
}

fn parse_role(idx: usize, value: String) -> rusqlite::Result<Role> {
    Role::parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown role: {value}").into(),
        )
    })
}

fn map_profile_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let role_raw: String = row.get(4)?;
    let census_raw: Option<String> = row.get(5)?;
    let created_raw: String = row.get(11)?;
    let updated_raw: String = row.get(12)?;
    Ok(Profile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        handle: row.get(2)?,
        email: row.get(3)?,
        role: parse_role(4, role_raw)?,
        census_registered_at: census_raw.map(|c| parse_timestamp(5, c)).transpose()?,
        district_region: row.get(6)?,
        district_locality: row.get(7)?,
        district_postal_code: row.get(8)?,
        payment_tier: row.get(9)?,
        payment_customer_id: row.get(10)?,
        created_at: parse_timestamp(11, created_raw)?,
        updated_at: parse_timestamp(12, updated_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn test_repo() -> (TempDir, ProfileRepository) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(
            DbManager::new(temp_dir.path().join("test.db"), 4).expect("manager created"),
        );
        db.run_migrations().expect("migrations run");
        (temp_dir, ProfileRepository::new(db))
    }

    #[tokio::test]
    async fn ensure_profile_creates_citizen_once() {
        let (_guard, repo) = test_repo().await;

        let first = repo
            .ensure_profile("user-1", Some("ana@example.org"))
            .await
            .expect("profile created");
        assert_eq!(first.role, Role::Citizen);
        assert_eq!(first.display_name, "ana");
        assert_eq!(first.payment_tier, "none");

        let again = repo
            .ensure_profile("user-1", Some("other@example.org"))
            .await
            .expect("upsert is idempotent");
        assert_eq!(again.email.as_deref(), Some("ana@example.org"));
    }

    #[tokio::test]
    async fn role_updates_persist() {
        let (_guard, repo) = test_repo().await;
        repo.ensure_profile("user-1", None).await.expect("created");

        repo.update_role("user-1", Role::Moderator).await.expect("role updated");
        assert_eq!(repo.get_role("user-1").await.expect("read"), Some(Role::Moderator));
    }

    #[tokio::test]
    async fn update_role_on_missing_profile_is_not_found() {
        let (_guard, repo) = test_repo().await;
        let err = repo.update_role("ghost", Role::Banned).await.unwrap_err();
        assert!(matches!(err, AtrioError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_handle_rejected_as_validation() {
        let (_guard, repo) = test_repo().await;
        repo.ensure_profile("user-1", None).await.expect("created");
        repo.ensure_profile("user-2", None).await.expect("created");

        repo.update_profile_fields("user-1", None, Some("juan123".to_string()))
            .await
            .expect("first handle set");
        let err = repo
            .update_profile_fields("user-2", None, Some("juan123".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AtrioError::Validation(_)));
    }

    #[tokio::test]
    async fn census_registration_sets_timestamp() {
        let (_guard, repo) = test_repo().await;
        repo.ensure_profile("user-1", None).await.expect("created");
        assert!(repo.get("user-1").await.unwrap().unwrap().census_registered_at.is_none());

        repo.set_census_registered("user-1").await.expect("registered");
        assert!(repo.get("user-1").await.unwrap().unwrap().census_registered_at.is_some());
    }

    #[tokio::test]
    async fn metrics_count_admins() {
        let (_guard, repo) = test_repo().await;
        repo.ensure_profile("user-1", None).await.expect("created");
        repo.ensure_profile("user-2", None).await.expect("created");
        repo.update_role("user-2", Role::Admin).await.expect("promoted");

        let metrics = repo.community_metrics().await.expect("metrics");
        assert_eq!(metrics.total_profiles, 2);
        assert_eq!(metrics.total_admins, 1);
    }

    #[tokio::test]
    async fn tier_sync_by_customer_id() {
        let (_guard, repo) = test_repo().await;
        repo.ensure_profile("user-1", None).await.expect("created");
        repo.set_payment_customer("user-1", "cus_123").await.expect("linked");

        let hit = repo.update_tier_by_customer("cus_123", "activista").await.expect("updated");
        assert_eq!(hit.as_deref(), Some("user-1"));
        assert_eq!(repo.get("user-1").await.unwrap().unwrap().payment_tier, "activista");

        let miss = repo.update_tier_by_customer("cus_unknown", "activista").await.expect("ok");
        assert!(miss.is_none());
    }
}
