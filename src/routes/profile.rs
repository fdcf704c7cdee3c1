//! Self-service profile endpoints
//!
//! ## Endpoints
//!
//! - `GET /api/profile/me` - Fetch (or lazily create) the caller's profile
//! - `PUT /api/profile` - Edit display name and handle
//! - `PUT /api/profile/district` - Link to a district
//! - `POST /api/census/register` - Mark the caller census-registered
//!
//! A profile row is created on first contact, so identity-provider accounts
//! that have never used the portal still resolve here.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

use super::{authenticate, err_to_response, error_response, json_response, read_json, FullBody};
use crate::server::AppState;
use crate::services::{DistrictFields, ProfileEdit};

/// Route `/api/profile` and `/api/census` requests
pub async fn handle_profile_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    match (req.method().clone(), path) {
        (Method::GET, "/api/profile/me") => handle_me(req, state).await,
        (Method::PUT, "/api/profile") => handle_edit(req, state).await,
        (Method::PUT, "/api/profile/district") => handle_district(req, state).await,
        (Method::POST, "/api/census/register") => handle_census(req, state).await,
        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

/// GET /api/profile/me
async fn handle_me(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state
        .profiles
        .ensure_profile(&caller.user_id, caller.email.as_deref())
        .await
    {
        Ok(profile) => json_response(StatusCode::OK, &profile),
        Err(e) => {
            warn!("Error loading profile for {}: {}", caller.user_id, e);
            err_to_response(&e)
        }
    }
}

/// PUT /api/profile
async fn handle_edit(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let edit: ProfileEdit = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match state.profile_service.update_profile(&caller, edit).await {
        Ok(profile) => json_response(StatusCode::OK, &profile),
        Err(e) => err_to_response(&e),
    }
}

/// PUT /api/profile/district
async fn handle_district(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let fields: DistrictFields = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match state.profile_service.update_district(&caller, fields).await {
        Ok(profile) => json_response(StatusCode::OK, &profile),
        Err(e) => err_to_response(&e),
    }
}

/// POST /api/census/register
async fn handle_census(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state.profile_service.register_in_census(&caller).await {
        Ok(profile) => json_response(StatusCode::OK, &profile),
        Err(e) => err_to_response(&e),
    }
}
