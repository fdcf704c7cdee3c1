//! Configuration for Atrio
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

use crate::auth::jwt::DEV_SECRET;

/// Atrio - community portal backend
///
/// Role-gated mutations, append-only audit trail, and a realtime activity
/// feed for the admin dashboard.
#[derive(Parser, Debug, Clone)]
#[command(name = "atrio")]
#[command(about = "Community portal backend for the nuclei network")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Path to the SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "atrio.db")]
    pub database_path: PathBuf,

    /// Database connection pool size
    #[arg(long, env = "DB_POOL_SIZE", default_value = "8")]
    pub db_pool_size: u32,

    /// Enable development mode (insecure JWT fallback, relaxed config checks)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWT secret shared with the identity provider (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Token lifetime in seconds for dev-minted tokens
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Capacity of the realtime recent-activity list
    #[arg(long, env = "FEED_CAPACITY", default_value = "15")]
    pub feed_capacity: usize,

    /// Payments provider configuration
    #[command(flatten)]
    pub payments: PaymentsArgs,

    /// Identity provider admin API configuration
    #[command(flatten)]
    pub identity: IdentityArgs,
}

/// Payments provider connection configuration
#[derive(Parser, Debug, Clone)]
pub struct PaymentsArgs {
    /// Payments provider API base URL
    #[arg(long, env = "PAYMENTS_API_URL", default_value = "https://api.stripe.com")]
    pub payments_api_url: String,

    /// Secret API key for checkout session creation (optional; payments
    /// endpoints return 503 when unset)
    #[arg(long, env = "PAYMENTS_SECRET_KEY")]
    pub payments_secret_key: Option<String>,

    /// Webhook signing secret for signature verification
    #[arg(long, env = "PAYMENTS_WEBHOOK_SECRET")]
    pub payments_webhook_secret: Option<String>,

    /// Redirect target after a completed checkout
    #[arg(long, env = "CHECKOUT_SUCCESS_URL", default_value = "http://localhost:3000/afiliacion/gracias")]
    pub checkout_success_url: String,

    /// Redirect target after an abandoned checkout
    #[arg(long, env = "CHECKOUT_CANCEL_URL", default_value = "http://localhost:3000/afiliacion")]
    pub checkout_cancel_url: String,
}

/// Identity provider admin API configuration
///
/// Used only by the payments webhook for email fallback lookup.
#[derive(Parser, Debug, Clone)]
pub struct IdentityArgs {
    /// Identity provider admin API base URL
    #[arg(long, env = "IDENTITY_API_URL")]
    pub identity_api_url: Option<String>,

    /// Service key for the identity provider admin API
    #[arg(long, env = "IDENTITY_ADMIN_KEY")]
    pub identity_admin_key: Option<String>,
}

impl Args {
    /// Get effective JWT secret (uses an insecure default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        if self.dev_mode {
            Some(
                self.jwt_secret
                    .clone()
                    .unwrap_or_else(|| DEV_SECRET.to_string()),
            )
        } else {
            self.jwt_secret.clone()
        }
    }

    /// Whether the payments adapter has enough configuration to run
    pub fn payments_enabled(&self) -> bool {
        self.payments.payments_secret_key.is_some()
            && self.payments.payments_webhook_secret.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.db_pool_size == 0 {
            return Err("DB_POOL_SIZE must be at least 1".to_string());
        }

        if self.feed_capacity == 0 {
            return Err("FEED_CAPACITY must be at least 1".to_string());
        }

        if self.payments.payments_secret_key.is_some()
            && self.payments.payments_webhook_secret.is_none()
        {
            return Err(
                "PAYMENTS_WEBHOOK_SECRET is required when PAYMENTS_SECRET_KEY is set".to_string(),
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["atrio", "--jwt-secret", "s3cret"])
    }

    #[test]
    fn defaults_are_valid() {
        let args = base_args();
        assert!(args.validate().is_ok());
        assert_eq!(args.feed_capacity, 15);
        assert_eq!(args.db_pool_size, 8);
    }

    #[test]
    fn production_requires_jwt_secret() {
        let args = Args::parse_from(["atrio"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn dev_mode_falls_back_to_insecure_secret() {
        let args = Args::parse_from(["atrio", "--dev-mode"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.jwt_secret().as_deref(), Some("dev-only-insecure-secret"));
    }

    #[test]
    fn payments_secret_requires_webhook_secret() {
        let args = Args::parse_from([
            "atrio",
            "--jwt-secret",
            "s3cret",
            "--payments-secret-key",
            "sk_test_123",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn zero_feed_capacity_rejected() {
        let args = Args::parse_from(["atrio", "--jwt-secret", "s3cret", "--feed-capacity", "0"]);
        assert!(args.validate().is_err());
    }
}
