//! Payments boundary
//!
//! A state-sync adapter against the payments provider: hosted checkout
//! session creation and webhook-driven tier sync. Webhook bodies are
//! authenticated with an HMAC signature header before any parsing. Tier
//! changes update the profile row and announce it for realtime fanout;
//! nothing here touches the audit trail.
//!
//! ## Webhook signature
//!
//! `Webhook-Signature: t=<unix>,v1=<hex>` where `v1` is HMAC-SHA256 over
//! `"{t}.{body}"` with the signing secret. Timestamps older or newer than
//! five minutes are rejected to blunt replay.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::auth::Caller;
use crate::config::PaymentsArgs;
use crate::db::ProfileRepository;
use crate::realtime::{ChangeHub, StoreEvent};
use crate::types::{AtrioError, Result};

/// Maximum accepted skew between the signature timestamp and now
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;

/// Tier stored when a subscription ends
pub const TIER_NONE: &str = "none";

// ============================================================================
// Signature Verification
// ============================================================================

/// Verify a `t=<unix>,v1=<hex>` signature header against the raw body.
/// Several `v1` entries may be present (key rotation); one match suffices.
pub fn verify_signature(secret: &str, header: &str, body: &[u8], now_unix: u64) -> Result<()> {
    let mut timestamp: Option<u64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => timestamp = value.parse().ok(),
            (Some("v1"), Some(value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AtrioError::Validation("signature header missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(AtrioError::Validation("signature header missing v1 entry".to_string()));
    }
    if now_unix.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS {
        return Err(AtrioError::Validation("signature timestamp outside tolerance".to_string()));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AtrioError::Payments("invalid webhook signing secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    for candidate in &candidates {
        if mac.clone().verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }
    Err(AtrioError::Validation("signature mismatch".to_string()))
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Webhook Event Types
// ============================================================================

/// Envelope of one provider webhook delivery
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

/// Response body of a created checkout session
#[derive(Debug, Deserialize)]
struct CheckoutSession {
    url: Option<String>,
}

// ============================================================================
// Customer Directory
// ============================================================================

/// Resolves a platform user id from an email address when a webhook arrives
/// for a customer id we have not stored yet
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<String>>;
}

/// Directory used when no identity admin API is configured; lookups miss.
pub struct NullDirectory;

#[async_trait]
impl CustomerDirectory for NullDirectory {
    async fn find_user_by_email(&self, _email: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Email lookup against the identity provider's admin user-listing API
pub struct IdentityAdminDirectory {
    client: reqwest::Client,
    api_url: String,
    admin_key: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryUser {
    id: String,
    email: Option<String>,
}

impl IdentityAdminDirectory {
    pub fn new(api_url: String, admin_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, api_url, admin_key }
    }
}

#[async_trait]
impl CustomerDirectory for IdentityAdminDirectory {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<String>> {
        let url = format!("{}/admin/users", self.api_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.admin_key)
            .query(&[("email", email)])
            .send()
            .await
            .map_err(|e| AtrioError::Payments(format!("identity lookup request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(AtrioError::Payments(format!(
                "identity lookup returned {}",
                response.status()
            )));
        }
        let users: Vec<DirectoryUser> = response
            .json()
            .await
            .map_err(|e| AtrioError::Payments(format!("identity lookup bad response: {e}")))?;
        Ok(users
            .into_iter()
            .find(|u| u.email.as_deref() == Some(email))
            .map(|u| u.id))
    }
}

// ============================================================================
// Payments Service
// ============================================================================

pub struct PaymentsService {
    config: PaymentsArgs,
    client: reqwest::Client,
    profiles: Arc<ProfileRepository>,
    directory: Arc<dyn CustomerDirectory>,
    hub: Arc<ChangeHub>,
}

impl PaymentsService {
    pub fn new(
        config: PaymentsArgs,
        profiles: Arc<ProfileRepository>,
        directory: Arc<dyn CustomerDirectory>,
        hub: Arc<ChangeHub>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client, profiles, directory, hub }
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.config.payments_webhook_secret.as_deref()
    }

    /// Create a hosted checkout session for the caller and return its URL
    pub async fn create_checkout(&self, caller: &Caller, tier: &str) -> Result<String> {
        if tier.trim().is_empty() {
            return Err(AtrioError::Validation("tier is required".to_string()));
        }
        let secret = self.config.payments_secret_key.as_deref().ok_or_else(|| {
            AtrioError::Payments("payments secret key not configured".to_string())
        })?;

        let mut params: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("success_url", &self.config.checkout_success_url),
            ("cancel_url", &self.config.checkout_cancel_url),
            ("client_reference_id", &caller.user_id),
            ("metadata[tier]", tier),
            ("metadata[user_id]", &caller.user_id),
        ];
        if let Some(ref email) = caller.email {
            params.push(("customer_email", email));
        }

        let url = format!(
            "{}/v1/checkout/sessions",
            self.config.payments_api_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(secret)
            .form(&params)
            .send()
            .await
            .map_err(|e| AtrioError::Payments(format!("checkout request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Checkout session creation failed ({}): {}", status, body);
            return Err(AtrioError::Payments(format!("provider rejected checkout ({status})")));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| AtrioError::Payments(format!("checkout bad response: {e}")))?;
        session
            .url
            .ok_or_else(|| AtrioError::Payments("checkout session missing url".to_string()))
    }

    /// Apply one verified webhook event. Unknown event types are
    /// acknowledged and ignored.
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<()> {
        match event.kind.as_str() {
            "checkout.session.completed" => self.apply_checkout_completed(&event.data.object).await,
            "customer.subscription.deleted" => {
                self.apply_subscription_deleted(&event.data.object).await
            }
            other => {
                debug!("Ignoring webhook event type {}", other);
                Ok(())
            }
        }
    }

    async fn apply_checkout_completed(&self, object: &Value) -> Result<()> {
        let customer_id = object.get("customer").and_then(Value::as_str);
        let tier = object
            .pointer("/metadata/tier")
            .and_then(Value::as_str)
            .unwrap_or("active");

        if let Some(customer_id) = customer_id {
            if let Some(user_id) = self.profiles.update_tier_by_customer(customer_id, tier).await? {
                info!("Synced tier {} for known customer {}", tier, customer_id);
                self.announce(&user_id);
                return Ok(());
            }
        }

        // Customer id unknown: fall back to the email on the session
        let email = object
            .pointer("/customer_details/email")
            .and_then(Value::as_str)
            .or_else(|| object.get("customer_email").and_then(Value::as_str));
        let Some(email) = email else {
            warn!("Checkout completed without matchable customer or email");
            return Ok(());
        };
        let Some(user_id) = self.directory.find_user_by_email(email).await? else {
            warn!("Checkout completed for unknown email {}", email);
            return Ok(());
        };

        if let Some(customer_id) = customer_id {
            self.profiles.set_payment_customer(&user_id, customer_id).await?;
        }
        self.profiles.update_payment_tier(&user_id, tier).await?;
        info!("Synced tier {} for {} via email lookup", tier, user_id);
        self.announce(&user_id);
        Ok(())
    }

    async fn apply_subscription_deleted(&self, object: &Value) -> Result<()> {
        let Some(customer_id) = object.get("customer").and_then(Value::as_str) else {
            warn!("Subscription deleted without customer id");
            return Ok(());
        };
        match self.profiles.update_tier_by_customer(customer_id, TIER_NONE).await? {
            Some(user_id) => {
                info!("Reset tier for {} after subscription end", user_id);
                self.announce(&user_id);
            }
            None => warn!("Subscription deleted for unknown customer {}", customer_id),
        }
        Ok(())
    }

    fn announce(&self, user_id: &str) {
        self.hub.publish(StoreEvent::ProfileChanged { user_id: user_id.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::DbManager;

    const SECRET: &str = "whsec_testing";

    fn sign(secret: &str, timestamp: u64, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("mac");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(SECRET, 1_700_000_000, body);
        assert!(verify_signature(SECRET, &header, body, 1_700_000_000).is_ok());
    }

    #[test]
    fn skewed_timestamp_is_rejected() {
        let body = b"{}";
        let header = sign(SECRET, 1_700_000_000, body);
        let err = verify_signature(SECRET, &header, body, 1_700_000_500).unwrap_err();
        assert!(matches!(err, AtrioError::Validation(_)));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(SECRET, 1_700_000_000, b"{\"tier\":\"basic\"}");
        let err =
            verify_signature(SECRET, &header, b"{\"tier\":\"gold\"}", 1_700_000_000).unwrap_err();
        assert!(matches!(err, AtrioError::Validation(_)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = b"{}";
        let header = sign("whsec_other", 1_700_000_000, body);
        assert!(verify_signature(SECRET, &header, body, 1_700_000_000).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        for header in ["", "t=abc,v1=00", "v1=00", "t=1700000000", "t=1700000000,v1=zz"] {
            assert!(
                verify_signature(SECRET, header, b"{}", 1_700_000_000).is_err(),
                "accepted header {header:?}"
            );
        }
    }

    #[test]
    fn one_matching_rotated_signature_suffices() {
        let body = b"{}";
        let good = sign(SECRET, 1_700_000_000, body);
        let v1 = good.split("v1=").nth(1).expect("v1 part");
        let header = format!("t=1700000000,v1={},v1={}", "ab".repeat(32), v1);
        assert!(verify_signature(SECRET, &header, body, 1_700_000_000).is_ok());
    }

    struct StaticDirectory {
        email: &'static str,
        user_id: &'static str,
    }

    #[async_trait]
    impl CustomerDirectory for StaticDirectory {
        async fn find_user_by_email(&self, email: &str) -> Result<Option<String>> {
            Ok((email == self.email).then(|| self.user_id.to_string()))
        }
    }

    fn payments_args() -> PaymentsArgs {
        PaymentsArgs {
            payments_api_url: "https://api.example.test".to_string(),
            payments_secret_key: Some("sk_test".to_string()),
            payments_webhook_secret: Some(SECRET.to_string()),
            checkout_success_url: "http://localhost:3000/afiliacion/gracias".to_string(),
            checkout_cancel_url: "http://localhost:3000/afiliacion".to_string(),
        }
    }

    async fn service_with_directory(
        directory: Arc<dyn CustomerDirectory>,
    ) -> (TempDir, Arc<ProfileRepository>, PaymentsService) {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db = Arc::new(
            DbManager::new(temp_dir.path().join("test.db"), 4).expect("manager created"),
        );
        db.run_migrations().expect("migrations run");
        let profiles = Arc::new(ProfileRepository::new(db));
        let hub = Arc::new(ChangeHub::new());
        let service =
            PaymentsService::new(payments_args(), Arc::clone(&profiles), directory, hub);
        (temp_dir, profiles, service)
    }

    fn completed_event(object: Value) -> WebhookEvent {
        WebhookEvent {
            kind: "checkout.session.completed".to_string(),
            data: WebhookData { object },
        }
    }

    #[tokio::test]
    async fn known_customer_id_syncs_tier_directly() {
        let (_guard, profiles, service) =
            service_with_directory(Arc::new(NullDirectory)).await;
        profiles.ensure_profile("user-j", Some("juan123@example.org")).await.expect("profile");
        profiles.set_payment_customer("user-j", "cus_123").await.expect("customer stored");

        service
            .handle_event(completed_event(serde_json::json!({
                "customer": "cus_123",
                "metadata": {"tier": "militante"}
            })))
            .await
            .expect("handled");

        let profile = profiles.get("user-j").await.expect("get").expect("exists");
        assert_eq!(profile.payment_tier, "militante");
    }

    #[tokio::test]
    async fn unknown_customer_falls_back_to_email_lookup() {
        let directory = Arc::new(StaticDirectory {
            email: "juan123@example.org",
            user_id: "user-j",
        });
        let (_guard, profiles, service) = service_with_directory(directory).await;
        profiles.ensure_profile("user-j", Some("juan123@example.org")).await.expect("profile");

        service
            .handle_event(completed_event(serde_json::json!({
                "customer": "cus_new",
                "customer_details": {"email": "juan123@example.org"},
                "metadata": {"tier": "simpatizante"}
            })))
            .await
            .expect("handled");

        let profile = profiles.get("user-j").await.expect("get").expect("exists");
        assert_eq!(profile.payment_tier, "simpatizante");
        assert_eq!(profile.payment_customer_id.as_deref(), Some("cus_new"));
    }

    #[tokio::test]
    async fn unmatched_email_is_acknowledged_without_changes() {
        let (_guard, profiles, service) =
            service_with_directory(Arc::new(NullDirectory)).await;
        profiles.ensure_profile("user-j", Some("juan123@example.org")).await.expect("profile");

        service
            .handle_event(completed_event(serde_json::json!({
                "customer": "cus_ghost",
                "customer_details": {"email": "nadie@example.org"},
                "metadata": {"tier": "militante"}
            })))
            .await
            .expect("handled");

        let profile = profiles.get("user-j").await.expect("get").expect("exists");
        assert_eq!(profile.payment_tier, "none");
    }

    #[tokio::test]
    async fn subscription_deletion_resets_the_tier() {
        let (_guard, profiles, service) =
            service_with_directory(Arc::new(NullDirectory)).await;
        profiles.ensure_profile("user-j", None).await.expect("profile");
        profiles.set_payment_customer("user-j", "cus_123").await.expect("customer stored");
        profiles.update_payment_tier("user-j", "militante").await.expect("tier set");

        service
            .handle_event(WebhookEvent {
                kind: "customer.subscription.deleted".to_string(),
                data: WebhookData { object: serde_json::json!({"customer": "cus_123"}) },
            })
            .await
            .expect("handled");

        let profile = profiles.get("user-j").await.expect("get").expect("exists");
        assert_eq!(profile.payment_tier, "none");
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let (_guard, _profiles, service) =
            service_with_directory(Arc::new(NullDirectory)).await;

        service
            .handle_event(WebhookEvent {
                kind: "invoice.paid".to_string(),
                data: WebhookData { object: serde_json::json!({}) },
            })
            .await
            .expect("acknowledged");
    }

    #[tokio::test]
    async fn blank_tier_is_rejected_before_any_request() {
        let (_guard, _profiles, service) =
            service_with_directory(Arc::new(NullDirectory)).await;
        let caller = Caller {
            user_id: "user-j".to_string(),
            email: None,
            ip: "unknown".to_string(),
        };

        let err = service.create_checkout(&caller, "  ").await.unwrap_err();
        assert!(matches!(err, AtrioError::Validation(_)));
    }
}
