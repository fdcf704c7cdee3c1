//! Payments endpoints
//!
//! ## Endpoints
//!
//! - `POST /api/payments/checkout` - Create a hosted checkout session
//! - `POST /api/payments/webhook` - Provider webhook (signature-gated)
//!
//! The webhook path never sees a bearer token. Its caller is authenticated
//! by verifying the HMAC signature header against the raw body bytes, so
//! the body must be collected before any JSON parsing.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{
    authenticate, err_to_response, error_response, json_response, read_body, read_json,
    success_response, FullBody,
};
use crate::payments::{unix_now, verify_signature, PaymentsService, WebhookEvent};
use crate::server::AppState;

/// Signature header set by the payments provider
pub const SIGNATURE_HEADER: &str = "webhook-signature";

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Route `/api/payments` requests
pub async fn handle_payments_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    match (req.method().clone(), path) {
        (Method::POST, "/api/payments/checkout") => handle_checkout(req, state).await,
        (Method::POST, "/api/payments/webhook") => handle_webhook(req, state).await,
        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

fn payments_or_unavailable(
    state: &AppState,
) -> Result<Arc<PaymentsService>, Response<FullBody>> {
    match &state.payments {
        Some(p) => Ok(Arc::clone(p)),
        None => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Payments not configured",
            Some("PAYMENTS_DISABLED"),
        )),
    }
}

/// POST /api/payments/checkout
async fn handle_checkout(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let payments = match payments_or_unavailable(&state) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let body: CheckoutRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match payments.create_checkout(&caller, &body.tier).await {
        Ok(url) => json_response(StatusCode::OK, &CheckoutResponse { url }),
        Err(e) => err_to_response(&e),
    }
}

/// POST /api/payments/webhook
async fn handle_webhook(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let payments = match payments_or_unavailable(&state) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let secret = match payments.webhook_secret() {
        Some(s) => s.to_string(),
        None => {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Webhook secret not configured",
                Some("PAYMENTS_DISABLED"),
            )
        }
    };

    // Header must be captured before the body consumes the request
    let signature = match req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    {
        Some(s) => s,
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Missing signature header",
                Some("BAD_SIGNATURE"),
            )
        }
    };

    let body = match read_body(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    if let Err(e) = verify_signature(&secret, &signature, &body, unix_now()) {
        warn!("Webhook signature rejected: {}", e);
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid signature",
            Some("BAD_SIGNATURE"),
        );
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON", None),
    };

    match payments.handle_event(event).await {
        Ok(()) => success_response("Webhook processed"),
        Err(e) => err_to_response(&e),
    }
}
