//! Self-service profile operations
//!
//! Census registration, district linkage, and profile edits. These touch
//! only the caller's own row; none of them land in the audit trail, but
//! each announces the profile change so dashboard counters refresh.

use std::sync::Arc;

use tracing::info;

use crate::auth::Caller;
use crate::db::{Profile, ProfileRepository};
use crate::realtime::{ChangeHub, StoreEvent};
use crate::types::{AtrioError, Result};

/// District linkage fields, all optional
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictFields {
    pub region: Option<String>,
    pub locality: Option<String>,
    pub postal_code: Option<String>,
}

/// Editable profile fields; unset fields keep their current value
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEdit {
    pub display_name: Option<String>,
    pub handle: Option<String>,
}

pub struct ProfileService {
    profiles: Arc<ProfileRepository>,
    hub: Arc<ChangeHub>,
}

impl ProfileService {
    pub fn new(profiles: Arc<ProfileRepository>, hub: Arc<ChangeHub>) -> Self {
        Self { profiles, hub }
    }

    /// Record the caller in the census. Re-registration refreshes the
    /// timestamp.
    pub async fn register_in_census(&self, caller: &Caller) -> Result<Profile> {
        self.profiles.set_census_registered(&caller.user_id).await?;
        self.announce(&caller.user_id);
        info!("Census registration for {}", caller.user_id);
        self.fetch(&caller.user_id).await
    }

    /// Link the caller to a district. An unset field clears the stored value.
    pub async fn update_district(&self, caller: &Caller, fields: DistrictFields) -> Result<Profile> {
        self.profiles
            .update_district(&caller.user_id, fields.region, fields.locality, fields.postal_code)
            .await?;
        self.announce(&caller.user_id);
        self.fetch(&caller.user_id).await
    }

    /// Edit display name and handle
    pub async fn update_profile(&self, caller: &Caller, edit: ProfileEdit) -> Result<Profile> {
        if let Some(ref name) = edit.display_name {
            if name.trim().is_empty() {
                return Err(AtrioError::Validation("display name cannot be empty".to_string()));
            }
        }
        if let Some(ref handle) = edit.handle {
            if !is_valid_handle(handle) {
                return Err(AtrioError::Validation(
                    "handle must be 3-30 characters: lowercase letters, digits, underscore"
                        .to_string(),
                ));
            }
        }

        self.profiles
            .update_profile_fields(&caller.user_id, edit.display_name, edit.handle)
            .await?;
        self.announce(&caller.user_id);
        self.fetch(&caller.user_id).await
    }

    fn announce(&self, user_id: &str) {
        self.hub.publish(StoreEvent::ProfileChanged { user_id: user_id.to_string() });
    }

    async fn fetch(&self, user_id: &str) -> Result<Profile> {
        self.profiles
            .get(user_id)
            .await?
            .ok_or_else(|| AtrioError::NotFound(format!("profile {user_id}")))
    }
}

fn is_valid_handle(handle: &str) -> bool {
    let len = handle.chars().count();
    (3..=30).contains(&len)
        && handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
