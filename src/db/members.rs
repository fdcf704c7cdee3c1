//! Nucleus membership repository
//!
//! One row per (user, nucleus) pair, enforced by a unique index. Join and
//! remove report whether they changed anything so callers can tell a repeat
//! request from a real transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tokio::task;

use super::{is_constraint_violation, manager::DbManager, now_rfc3339, parse_timestamp};
use crate::auth::NucleusRole;
use crate::types::{AtrioError, Result};

/// One roster line, joined with the member's profile
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub role: NucleusRole,
    pub joined_at: DateTime<Utc>,
}

pub struct MembershipRepository {
    db: Arc<DbManager>,
}

impl MembershipRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Add a membership row. Returns false when the user was already a
    /// member; the existing row (and its role) is left untouched.
    pub async fn join(&self, nucleus_id: &str, user_id: &str, role: NucleusRole) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            // ON CONFLICT rather than OR IGNORE: a missing nucleus or profile
            // must still surface as a foreign key error.
            let result = conn.execute(
                "INSERT INTO nucleus_members (nucleus_id, user_id, role, joined_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(user_id, nucleus_id) DO NOTHING",
                params![nucleus_id, user_id, role.as_str(), now_rfc3339()],
            );
            match result {
                Ok(changed) => Ok(changed > 0),
                // The row referenced a nucleus or profile that no longer
                // exists; callers treat that as a missing nucleus.
                Err(e) if is_constraint_violation(&e) => {
                    Err(AtrioError::NotFound(format!("nucleus {nucleus_id}")))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    /// Drop a membership row. Shared by voluntary leave and removal by a
    /// chapter moderator. Returns false when no row existed.
    pub async fn remove(&self, nucleus_id: &str, user_id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<bool> {
            let conn = db.get_connection()?;
            let changed = conn.execute(
                "DELETE FROM nucleus_members WHERE nucleus_id = ?1 AND user_id = ?2",
                params![nucleus_id, user_id],
            )?;
            Ok(changed > 0)
        })
        .await?
    }

    pub async fn get_role(&self, nucleus_id: &str, user_id: &str) -> Result<Option<NucleusRole>> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        let user_id = user_id.to_string();
        task::spawn_blocking(move || -> Result<Option<NucleusRole>> {
            let conn = db.get_connection()?;
            let raw: Option<String> = conn
                .query_row(
                    "SELECT role FROM nucleus_members WHERE nucleus_id = ?1 AND user_id = ?2",
                    params![nucleus_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(value) => Ok(Some(parse_member_role(&value)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    pub async fn count(&self, nucleus_id: &str) -> Result<i64> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        task::spawn_blocking(move || -> Result<i64> {
            let conn = db.get_connection()?;
            let count = conn.query_row(
                "SELECT COUNT(*) FROM nucleus_members WHERE nucleus_id = ?1",
                params![nucleus_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await?
    }

    /// Full roster, oldest members first
    pub async fn roster(&self, nucleus_id: &str) -> Result<Vec<RosterEntry>> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        task::spawn_blocking(move || -> Result<Vec<RosterEntry>> {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(
                "SELECT m.user_id, p.display_name, p.handle, m.role, m.joined_at \
                 FROM nucleus_members m \
                 LEFT JOIN profiles p ON p.id = m.user_id \
                 WHERE m.nucleus_id = ?1 \
                 ORDER BY m.joined_at, m.id",
            )?;
            let rows = stmt.query_map(params![nucleus_id], map_roster_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await?
    }
}

fn parse_member_role(value: &str) -> rusqlite::Result<NucleusRole> {
    NucleusRole::parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown nucleus role: {value}").into(),
        )
    })
}

fn map_roster_row(row: &Row<'_>) -> rusqlite::Result<RosterEntry> {
    let role_raw: String = row.get(3)?;
    let joined_raw: String = row.get(4)?;
    Ok(RosterEntry {
        user_id: row.get(0)?,
        display_name: row.get(1)?,
        handle: row.get(2)?,
        role: parse_member_role(&role_raw)?,
        joined_at: parse_timestamp(4, joined_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::{NewNucleus, NucleusRepository, ProfileRepository};

    async fn seeded() -> (TempDir, MembershipRepository, String) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(
            DbManager::new(temp_dir.path().join("test.db"), 4).expect("manager created"),
        );
        db.run_migrations().expect("migrations run");

        let profiles = ProfileRepository::new(Arc::clone(&db));
        profiles.ensure_profile("user-v", None).await.expect("profile");
        profiles.ensure_profile("user-w", None).await.expect("profile");

        let nuclei = NucleusRepository::new(Arc::clone(&db));
        let nucleus = nuclei
            .create(
                NewNucleus {
                    name: "Sevilla Centro".to_string(),
                    description: String::new(),
                    city: "Sevilla".to_string(),
                    region: "Andalucía".to_string(),
                    lat: 62.0,
                    lng: 48.0,
                },
                None,
                None,
            )
            .await
            .expect("nucleus created");

        (temp_dir, MembershipRepository::new(db), nucleus.id)
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let (_guard, members, nucleus_id) = seeded().await;

        assert!(members.join(&nucleus_id, "user-v", NucleusRole::Member).await.expect("join"));
        assert!(!members.join(&nucleus_id, "user-v", NucleusRole::Member).await.expect("repeat"));
        assert_eq!(members.count(&nucleus_id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn repeat_join_keeps_existing_role() {
        let (_guard, members, nucleus_id) = seeded().await;

        members.join(&nucleus_id, "user-v", NucleusRole::Admin).await.expect("join");
        members.join(&nucleus_id, "user-v", NucleusRole::Member).await.expect("repeat");

        assert_eq!(
            members.get_role(&nucleus_id, "user-v").await.expect("read"),
            Some(NucleusRole::Admin)
        );
    }

    #[tokio::test]
    async fn concurrent_joins_leave_one_row() {
        let (_guard, members, nucleus_id) = seeded().await;
        let members = Arc::new(members);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let members = Arc::clone(&members);
            let nucleus_id = nucleus_id.clone();
            handles.push(tokio::spawn(async move {
                members.join(&nucleus_id, "user-v", NucleusRole::Member).await
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.expect("task").expect("join") {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(members.count(&nucleus_id).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn join_then_leave_leaves_no_row() {
        let (_guard, members, nucleus_id) = seeded().await;

        members.join(&nucleus_id, "user-v", NucleusRole::Member).await.expect("join");
        assert!(members.remove(&nucleus_id, "user-v").await.expect("leave"));
        assert!(!members.remove(&nucleus_id, "user-v").await.expect("repeat"));
        assert_eq!(members.count(&nucleus_id).await.expect("count"), 0);
        assert_eq!(members.get_role(&nucleus_id, "user-v").await.expect("read"), None);
    }

    #[tokio::test]
    async fn join_unknown_nucleus_is_not_found() {
        let (_guard, members, _nucleus_id) = seeded().await;
        let err = members.join("missing", "user-v", NucleusRole::Member).await.unwrap_err();
        assert!(matches!(err, AtrioError::NotFound(_)));
    }

    #[tokio::test]
    async fn roster_joins_profiles_in_join_order() {
        let (_guard, members, nucleus_id) = seeded().await;

        members.join(&nucleus_id, "user-v", NucleusRole::Admin).await.expect("join");
        members.join(&nucleus_id, "user-w", NucleusRole::Member).await.expect("join");

        let roster = members.roster(&nucleus_id).await.expect("roster");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].user_id, "user-v");
        assert_eq!(roster[0].role, NucleusRole::Admin);
        assert_eq!(roster[1].user_id, "user-w");
    }
}
