//! Authentication and authorization for Atrio
//!
//! Provides:
//! - JWT token validation (identity only; roles live in the profile store)
//! - Platform and nucleus role types
//! - Caller resolution and store-backed role checks

pub mod guard;
pub mod jwt;
pub mod roles;

pub use guard::{client_ip, current_role, require_admin_role, Caller};
pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenValidationResult};
pub use roles::{NucleusRole, Role};
