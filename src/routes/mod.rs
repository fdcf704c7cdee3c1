//! HTTP route handlers
//!
//! Hand-rolled dispatch per path prefix. Handlers resolve the caller from
//! the bearer token, parse JSON bodies, and hand off to the services; all
//! role decisions happen in the services against the profile store.

pub mod activity;
pub mod admin_users;
pub mod dashboard_ws;
pub mod health;
pub mod nuclei;
pub mod payments;
pub mod profile;

pub use activity::handle_activity_request;
pub use admin_users::handle_admin_users_request;
pub use dashboard_ws::handle_dashboard_ws;
pub use health::{health_check, readiness_check, version_info};
pub use nuclei::{handle_admin_nuclei_request, handle_api_nuclei_request};
pub use payments::handle_payments_request;
pub use profile::handle_profile_request;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::auth::{extract_token_from_header, Caller};
use crate::server::AppState;
use crate::types::AtrioError;

pub type FullBody = Full<Bytes>;

// =============================================================================
// Response Types
// =============================================================================

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

// =============================================================================
// Response Helpers
// =============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub fn error_response(status: StatusCode, error: &str, code: Option<&str>) -> Response<FullBody> {
    json_response(
        status,
        &ErrorResponse {
            error: error.to_string(),
            code: code.map(|c| c.to_string()),
        },
    )
}

pub fn success_response(message: &str) -> Response<FullBody> {
    json_response(
        StatusCode::OK,
        &SuccessResponse { success: true, message: message.to_string() },
    )
}

/// Map a service error onto the HTTP surface
pub fn err_to_response(err: &AtrioError) -> Response<FullBody> {
    error_response(err.status_code(), &err.to_string(), Some(err.code()))
}

// =============================================================================
// Auth Helpers
// =============================================================================

fn get_auth_header(req: &Request<Incoming>) -> Option<&str> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Resolve the caller from the request's bearer token.
///
/// The token authenticates identity only; every role decision is made in
/// the services against the caller's stored profile row. A first-time
/// caller gets a citizen profile row upserted here, so later store reads
/// always resolve.
pub async fn authenticate(
    req: &Request<Incoming>,
    state: &AppState,
) -> Result<Caller, Response<FullBody>> {
    let auth_header = get_auth_header(req);
    let token = match extract_token_from_header(auth_header) {
        Some(t) => t,
        None => {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "No token provided",
                Some("NO_TOKEN"),
            ))
        }
    };

    let result = state.jwt.verify_token(token);
    if !result.valid {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            result.error.as_deref().unwrap_or("Invalid token"),
            Some("INVALID_TOKEN"),
        ));
    }
    let claims = match result.claims {
        Some(claims) => claims,
        None => {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid token",
                Some("INVALID_TOKEN"),
            ))
        }
    };

    let caller = Caller::from_claims(&claims, req.headers());
    if let Err(e) = state
        .profiles
        .ensure_profile(&caller.user_id, caller.email.as_deref())
        .await
    {
        warn!("Error ensuring profile for {}: {}", caller.user_id, e);
        return Err(err_to_response(&e));
    }
    Ok(caller)
}

// =============================================================================
// Body Helpers
// =============================================================================

/// Collect a request body into bytes
pub async fn read_body(req: Request<Incoming>) -> Result<Bytes, Response<FullBody>> {
    match req.into_body().collect().await {
        Ok(b) => Ok(b.to_bytes()),
        Err(_) => Err(error_response(StatusCode::BAD_REQUEST, "Invalid body", None)),
    }
}

/// Collect and parse a JSON request body
pub async fn read_json<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> Result<T, Response<FullBody>> {
    let bytes = read_body(req).await?;
    serde_json::from_slice(&bytes)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid JSON", None))
}
