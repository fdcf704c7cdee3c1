//! Platform and nucleus-scoped roles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform-level role stored on a profile row
///
/// `User` is a legacy value still present on old rows. It reads back fine and
/// is treated as citizen-equivalent for privilege checks, but it is never
/// assignable through role updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Citizen,
    Admin,
    Moderator,
    Banned,
    User,
}

impl Role {
    /// Roles an admin may assign through `update_user_role`
    pub const ASSIGNABLE: [Role; 4] = [Role::Citizen, Role::Admin, Role::Moderator, Role::Banned];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Citizen => "citizen",
            Role::Admin => "admin",
            Role::Moderator => "moderator",
            Role::Banned => "banned",
            Role::User => "user",
        }
    }

    /// Parse any stored role value, including the legacy one
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "citizen" => Some(Role::Citizen),
            "admin" => Some(Role::Admin),
            "moderator" => Some(Role::Moderator),
            "banned" => Some(Role::Banned),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    /// Parse a role value for assignment; the legacy `user` is rejected
    pub fn parse_assignable(value: &str) -> Option<Role> {
        Role::parse(value).filter(|r| Role::ASSIGNABLE.contains(r))
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role scoped to a single nucleus membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NucleusRole {
    Member,
    Moderator,
    Admin,
}

impl NucleusRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NucleusRole::Member => "member",
            NucleusRole::Moderator => "moderator",
            NucleusRole::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<NucleusRole> {
        match value {
            "member" => Some(NucleusRole::Member),
            "moderator" => Some(NucleusRole::Moderator),
            "admin" => Some(NucleusRole::Admin),
            _ => None,
        }
    }

    /// Whether this role can moderate the nucleus roster
    pub fn can_moderate(&self) -> bool {
        matches!(self, NucleusRole::Moderator | NucleusRole::Admin)
    }
}

impl fmt::Display for NucleusRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
