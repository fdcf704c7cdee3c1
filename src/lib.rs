//! Atrio - community portal backend
//!
//! Atrio is the API behind a civic participation portal: local chapters
//! ("nuclei"), their rosters, role-gated administration, and an append-only
//! audit trail. Every admin mutation re-reads the caller's stored role,
//! writes a single row, records an audit entry, and announces the change to
//! a realtime dashboard feed.
//!
//! ## Services
//!
//! - **Profiles**: identity-provider accounts mirrored as portal rows
//! - **Nuclei**: chapter directory with rosters and scoped moderation
//! - **Audit**: append-only activity trail joined with actor names
//! - **Feed**: WebSocket fanout of recent activity and community metrics
//! - **Payments**: hosted checkout plus signature-gated webhook tier sync

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod payments;
pub mod realtime;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AtrioError, Result};
