//! Activity log repository
//!
//! The table is append-only. There is deliberately no update or delete here;
//! the audit trail is only ever read back joined with the actor's profile.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use tokio::task;

use super::{manager::DbManager, now_rfc3339, parse_timestamp};
use crate::types::Result;

const SELECT_ACTIVITY_SQL: &str = "SELECT a.id, a.actor_id, p.display_name, a.action, a.target_id, a.detail, \
     a.ip_address, a.created_at \
     FROM activity_logs a \
     LEFT JOIN profiles p ON p.id = a.actor_id";

/// One audit entry as shown to admins, actor name resolved
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityView {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub detail: Value,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for one appended entry
#[derive(Debug)]
pub struct NewActivity<'a> {
    pub actor_id: Option<&'a str>,
    pub action: &'a str,
    pub target_id: Option<&'a str>,
    pub detail: &'a Value,
    pub ip_address: &'a str,
}

pub struct ActivityLogRepository {
    db: Arc<DbManager>,
}

impl ActivityLogRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Append one entry, returning its row id
    pub async fn append(&self, entry: NewActivity<'_>) -> Result<i64> {
        let db = Arc::clone(&self.db);
        let actor_id = entry.actor_id.map(|s| s.to_string());
        let action = entry.action.to_string();
        let target_id = entry.target_id.map(|s| s.to_string());
        let detail = entry.detail.to_string();
        let ip_address = entry.ip_address.to_string();
        task::spawn_blocking(move || -> Result<i64> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT INTO activity_logs (actor_id, action, target_id, detail, ip_address, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![actor_id, action, target_id, detail, ip_address, now_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await?
    }

    /// Fetch one entry joined with its actor's display name
    pub async fn get_with_actor(&self, entry_id: i64) -> Result<Option<ActivityView>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Option<ActivityView>> {
            let conn = db.get_connection()?;
            let entry = conn
                .query_row(
                    &format!("{SELECT_ACTIVITY_SQL} WHERE a.id = ?1"),
                    params![entry_id],
                    map_activity_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await?
    }

    /// Most recent entries first
    pub async fn list_with_actor(&self, limit: u32) -> Result<Vec<ActivityView>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<ActivityView>> {
            let conn = db.get_connection()?;
            let mut stmt =
                conn.prepare(&format!("{SELECT_ACTIVITY_SQL} ORDER BY a.id DESC LIMIT ?1"))?;
            let rows = stmt.query_map(params![limit], map_activity_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await?
    }
}

fn map_activity_row(row: &Row<'_>) -> rusqlite::Result<ActivityView> {
    let detail_raw: String = row.get(5)?;
    let detail = serde_json::from_str(&detail_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_raw: String = row.get(7)?;
    Ok(ActivityView {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        actor_name: row.get(2)?,
        action: row.get(3)?,
        target_id: row.get(4)?,
        detail,
        ip_address: row.get(6)?,
        created_at: parse_timestamp(7, created_raw)?,
    })
}
