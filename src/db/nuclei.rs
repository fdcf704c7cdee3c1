//! Nucleus repository
//!
//! Member counts are computed with a sub-select on every read; no count
//! column exists. Founder auto-join runs in the same transaction as the
//! nucleus insert, so a half-created chapter can never be observed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::task;
use uuid::Uuid;

use super::{manager::DbManager, now_rfc3339, parse_timestamp};
use crate::auth::NucleusRole;
use crate::types::{AtrioError, Result};

const SELECT_NUCLEUS_SQL: &str = "SELECT n.id, n.name, n.description, n.city, n.region, n.lat, n.lng, \
     n.created_by, n.active, n.created_at, n.updated_at, \
     (SELECT COUNT(*) FROM nucleus_members m WHERE m.nucleus_id = n.id) AS member_count \
     FROM nuclei n";

/// One chapter with its read-time member count
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nucleus {
    pub id: String,
    pub name: String,
    pub description: String,
    pub city: String,
    pub region: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub active: bool,
    pub member_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for nucleus creation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNucleus {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
}

/// Partial update; unset fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NucleusChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub active: Option<bool>,
}

impl NucleusChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.city.is_none()
            && self.region.is_none()
            && self.lat.is_none()
            && self.lng.is_none()
            && self.active.is_none()
    }

    /// JSON object of the provided fields, for the audit detail payload
    pub fn changed_fields(&self) -> serde_json::Value {
        let mut fields = serde_json::Map::new();
        if let Some(ref v) = self.name {
            fields.insert("name".into(), v.clone().into());
        }
        if let Some(ref v) = self.description {
            fields.insert("description".into(), v.clone().into());
        }
        if let Some(ref v) = self.city {
            fields.insert("city".into(), v.clone().into());
        }
        if let Some(ref v) = self.region {
            fields.insert("region".into(), v.clone().into());
        }
        if let Some(v) = self.lat {
            fields.insert("lat".into(), v.into());
        }
        if let Some(v) = self.lng {
            fields.insert("lng".into(), v.into());
        }
        if let Some(v) = self.active {
            fields.insert("active".into(), v.into());
        }
        serde_json::Value::Object(fields)
    }
}

pub struct NucleusRepository {
    db: Arc<DbManager>,
}

impl NucleusRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Insert a nucleus and, when a founder is given, their membership row in
    /// one transaction.
    pub async fn create(
        &self,
        fields: NewNucleus,
        created_by: Option<&str>,
        founder: Option<(&str, NucleusRole)>,
    ) -> Result<Nucleus> {
        let db = Arc::clone(&self.db);
        let created_by = created_by.map(|s| s.to_string());
        let founder = founder.map(|(id, role)| (id.to_string(), role));
        task::spawn_blocking(move || -> Result<Nucleus> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction()?;
            let id = Uuid::new_v4().to_string();
            let now = now_rfc3339();

            tx.execute(
                "INSERT INTO nuclei (id, name, description, city, region, lat, lng, created_by, active, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9)",
                params![
                    id,
                    fields.name,
                    fields.description,
                    fields.city,
                    fields.region,
                    fields.lat,
                    fields.lng,
                    created_by,
                    now
                ],
            )?;

            let mut member_count = 0i64;
            if let Some((founder_id, role)) = founder {
                tx.execute(
                    "INSERT INTO nucleus_members (nucleus_id, user_id, role, joined_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, founder_id, role.as_str(), now],
                )?;
                member_count = 1;
            }

            tx.commit()?;

            let created = parse_timestamp(0, now.clone())?;
            Ok(Nucleus {
                id,
                name: fields.name,
                description: fields.description,
                city: fields.city,
                region: fields.region,
                lat: fields.lat,
                lng: fields.lng,
                created_by,
                active: true,
                member_count,
                created_at: created,
                updated_at: created,
            })
        })
        .await?
    }

    pub async fn get(&self, nucleus_id: &str) -> Result<Option<Nucleus>> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Nucleus>> {
            let conn = db.get_connection()?;
            let nucleus = conn
                .query_row(
                    &format!("{SELECT_NUCLEUS_SQL} WHERE n.id = ?1"),
                    params![nucleus_id],
                    map_nucleus_row,
                )
                .optional()?;
            Ok(nucleus)
        })
        .await?
    }

    /// Chapter directory. Active-only unless asked otherwise.
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Nucleus>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<Nucleus>> {
            let conn = db.get_connection()?;
            let sql = if include_inactive {
                format!("{SELECT_NUCLEUS_SQL} ORDER BY n.name")
            } else {
                format!("{SELECT_NUCLEUS_SQL} WHERE n.active = 1 ORDER BY n.name")
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![], map_nucleus_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await?
    }

    pub async fn update(&self, nucleus_id: &str, changes: NucleusChanges) -> Result<()> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let active = changes.active.map(i64::from);
            let changed = conn.execute(
                "UPDATE nuclei SET \
                 name = COALESCE(?1, name), \
                 description = COALESCE(?2, description), \
                 city = COALESCE(?3, city), \
                 region = COALESCE(?4, region), \
                 lat = COALESCE(?5, lat), \
                 lng = COALESCE(?6, lng), \
                 active = COALESCE(?7, active), \
                 updated_at = ?8 \
                 WHERE id = ?9",
                params![
                    changes.name,
                    changes.description,
                    changes.city,
                    changes.region,
                    changes.lat,
                    changes.lng,
                    active,
                    now_rfc3339(),
                    nucleus_id
                ],
            )?;
            if changed == 0 {
                return Err(AtrioError::NotFound(format!("nucleus {nucleus_id}")));
            }
            Ok(())
        })
        .await?
    }

    /// Hard delete. Membership rows cascade.
    pub async fn delete(&self, nucleus_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let nucleus_id = nucleus_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            let changed = conn.execute("DELETE FROM nuclei WHERE id = ?1", params![nucleus_id])?;
            if changed == 0 {
                return Err(AtrioError::NotFound(format!("nucleus {nucleus_id}")));
            }
            Ok(())
        })
        .await?
    }
}

fn map_nucleus_row(row: &Row<'_>) -> rusqlite::Result<Nucleus> {
    let created_raw: String = row.get(9)?;
    let updated_raw: String = row.get(10)?;
    Ok(Nucleus {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        city: row.get(3)?,
        region: row.get(4)?,
        lat: row.get(5)?,
        lng: row.get(6)?,
        created_by: row.get(7)?,
        active: row.get::<_, i64>(8)? != 0,
        created_at: parse_timestamp(9, created_raw)?,
        updated_at: parse_timestamp(10, updated_raw)?,
        member_count: row.get(11)?,
    })
}
