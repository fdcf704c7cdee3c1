//! SQLite-backed storage layer
//!
//! One repository per table, each running its blocking rusqlite work on the
//! Tokio blocking pool through the shared [`DbManager`].

pub mod activity;
pub mod manager;
pub mod members;
pub mod nuclei;
pub mod profiles;

pub use activity::{ActivityLogRepository, ActivityView, NewActivity};
pub use manager::{DbConnection, DbManager};
pub use members::{MembershipRepository, RosterEntry};
pub use nuclei::{NewNucleus, Nucleus, NucleusChanges, NucleusRepository};
pub use profiles::{CommunityMetrics, Profile, ProfileRepository};

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as the stored RFC 3339 text form
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp column back into a `DateTime<Utc>`
pub(crate) fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Whether an error is a SQLite constraint violation (unique, foreign key)
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_round_trip() {
        let text = now_rfc3339();
        let parsed = parse_timestamp(0, text.clone()).expect("parses");
        assert_eq!(parsed.to_rfc3339_opts(SecondsFormat::Millis, true), text);
    }

    #[test]
    fn bad_timestamp_is_conversion_failure() {
        assert!(parse_timestamp(0, "not-a-time".to_string()).is_err());
    }
}
