//! Admin API endpoints for user management
//!
//! ## Endpoints
//!
//! - `GET /admin/users` - List profiles (newest first)
//! - `PUT /admin/users/{id}/role` - Assign a platform role
//! - `POST /admin/users/{id}/ban` - Ban a user
//!
//! The token only identifies the caller. The admin check runs against the
//! stored profile row on every call, so a demoted admin loses access on
//! their next request even while their token is still live.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::{authenticate, err_to_response, error_response, json_response, read_json, FullBody};
use crate::auth::require_admin_role;
use crate::db::Profile;
use crate::server::AppState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Query parameters for listing users
#[derive(Debug)]
struct ListUsersQuery {
    limit: u32,
}

impl ListUsersQuery {
    fn from_query_string(query: Option<&str>) -> Self {
        let mut params = Self { limit: 50 };

        if let Some(q) = query {
            for pair in q.split('&') {
                if let Some((key, value)) = pair.split_once('=') {
                    if key == "limit" {
                        params.limit = value.parse().unwrap_or(50);
                    }
                }
            }
        }

        params.limit = params.limit.clamp(1, 100);
        params
    }
}

/// Users list response
#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<Profile>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

// =============================================================================
// Request Dispatcher
// =============================================================================

/// Route admin user management requests
pub async fn handle_admin_users_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let method = req.method().clone();

    // Extract subpath after /admin/users
    let subpath = path.strip_prefix("/admin/users").unwrap_or("");

    match (method, subpath) {
        // GET /admin/users - List users
        (Method::GET, "") | (Method::GET, "/") => handle_list_users(req, state).await,

        // PUT /admin/users/{id}/role - Assign platform role
        (Method::PUT, p) if p.ends_with("/role") => {
            let id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/role"))
                .unwrap_or("")
                .to_string();
            handle_update_role(req, state, &id).await
        }

        // POST /admin/users/{id}/ban - Ban user
        (Method::POST, p) if p.ends_with("/ban") => {
            let id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/ban"))
                .unwrap_or("")
                .to_string();
            handle_ban_user(req, state, &id).await
        }

        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

// =============================================================================
// Endpoint Handlers
// =============================================================================

/// GET /admin/users - List profiles
async fn handle_list_users(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(e) = require_admin_role(&state.profiles, &caller.user_id).await {
        return err_to_response(&e);
    }

    let params = ListUsersQuery::from_query_string(req.uri().query());

    match state.profiles.list(params.limit).await {
        Ok(users) => {
            let total = users.len();
            json_response(StatusCode::OK, &UsersResponse { users, total })
        }
        Err(e) => {
            warn!("Error listing users: {}", e);
            err_to_response(&e)
        }
    }
}

/// PUT /admin/users/{id}/role - Assign a platform role
async fn handle_update_role(
    req: Request<Incoming>,
    state: Arc<AppState>,
    user_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let body: UpdateRoleRequest = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match state
        .user_admin
        .update_user_role(&caller, user_id, &body.role)
        .await
    {
        Ok(profile) => json_response(StatusCode::OK, &profile),
        Err(e) => err_to_response(&e),
    }
}

/// POST /admin/users/{id}/ban - Ban a user
async fn handle_ban_user(
    req: Request<Incoming>,
    state: Arc<AppState>,
    user_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state.user_admin.ban_user(&caller, user_id).await {
        Ok(profile) => json_response(StatusCode::OK, &profile),
        Err(e) => err_to_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        let q = ListUsersQuery::from_query_string(None);
        assert_eq!(q.limit, 50);

        let q = ListUsersQuery::from_query_string(Some("limit=10"));
        assert_eq!(q.limit, 10);

        let q = ListUsersQuery::from_query_string(Some("limit=9999"));
        assert_eq!(q.limit, 100);

        let q = ListUsersQuery::from_query_string(Some("limit=abc"));
        assert_eq!(q.limit, 50);

        let q = ListUsersQuery::from_query_string(Some("limit=0"));
        assert_eq!(q.limit, 1);
    }

    #[test]
    fn role_request_parses_plain_body() {
        let body: UpdateRoleRequest = serde_json::from_str(r#"{"role":"moderator"}"#).unwrap();
        assert_eq!(body.role, "moderator");
    }
}
