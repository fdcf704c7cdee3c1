//! Services layer for Atrio
//!
//! Business logic between the HTTP surface and the repositories.
//!
//! ## Services
//!
//! - **UserAdminService**: platform role changes and bans
//! - **NucleusService**: chapter lifecycle, membership, roster moderation
//! - **ProfileService**: census registration, district linkage, profile edits
//!
//! Every guarded mutation follows the same shape: re-check the caller's
//! stored role, validate input, read any before-state the audit payload
//! needs, apply the single-row write, then record and announce.

pub mod nuclei;
pub mod profile;
pub mod users;

pub use nuclei::{ActingRole, NucleusService};
pub use profile::{DistrictFields, ProfileEdit, ProfileService};
pub use users::UserAdminService;
