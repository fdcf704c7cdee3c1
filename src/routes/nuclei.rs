//! Nucleus directory and membership endpoints
//!
//! ## Endpoints
//!
//! - `POST /admin/nuclei` - Create a nucleus without joining it (platform admins)
//! - `POST /api/nuclei` - Found a nucleus and become its admin
//! - `GET /api/nuclei` - List active nuclei; `?include_inactive=true` is admin-only
//! - `GET /api/nuclei/{id}` - Fetch one nucleus (public)
//! - `PUT /api/nuclei/{id}` - Patch a nucleus (platform admins)
//! - `DELETE /api/nuclei/{id}` - Delete a nucleus and its roster (platform admins)
//! - `POST /api/nuclei/{id}/join` - Join as a member
//! - `POST /api/nuclei/{id}/leave` - Leave
//! - `GET /api/nuclei/{id}/members` - Roster with profile names
//! - `DELETE /api/nuclei/{id}/members/{userId}` - Remove a member
//!
//! Both creation entry points run through the same service capability; the
//! route only picks the acting role.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::{
    authenticate, err_to_response, error_response, json_response, read_json, success_response,
    FullBody,
};
use crate::auth::require_admin_role;
use crate::db::{Nucleus, NewNucleus, NucleusChanges, RosterEntry};
use crate::server::AppState;
use crate::services::ActingRole;

// =============================================================================
// Response Types
// =============================================================================

/// Nuclei list response
#[derive(Debug, Serialize)]
pub struct NucleiResponse {
    pub nuclei: Vec<Nucleus>,
    pub total: usize,
}

/// Roster response
#[derive(Debug, Serialize)]
pub struct RosterResponse {
    pub members: Vec<RosterEntry>,
    pub total: usize,
}

/// Join/leave outcome
#[derive(Debug, Serialize)]
pub struct MembershipResponse {
    pub success: bool,
    /// False when the caller already was (or was not) on the roster
    pub changed: bool,
}

// =============================================================================
// Request Dispatchers
// =============================================================================

/// Route `/admin/nuclei` requests
pub async fn handle_admin_nuclei_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let method = req.method().clone();
    let subpath = path.strip_prefix("/admin/nuclei").unwrap_or("");

    match (method, subpath) {
        // POST /admin/nuclei - Create without joining
        (Method::POST, "") | (Method::POST, "/") => {
            handle_create(req, state, ActingRole::PlatformAdmin).await
        }

        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

/// Route `/api/nuclei` requests
pub async fn handle_api_nuclei_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    let method = req.method().clone();
    let subpath = path.strip_prefix("/api/nuclei").unwrap_or("");

    match (method, subpath) {
        // POST /api/nuclei - Found a nucleus
        (Method::POST, "") | (Method::POST, "/") => {
            handle_create(req, state, ActingRole::Member).await
        }

        // GET /api/nuclei - Directory
        (Method::GET, "") | (Method::GET, "/") => handle_list(req, state).await,

        // POST /api/nuclei/{id}/join
        (Method::POST, p) if p.ends_with("/join") => {
            let id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/join"))
                .unwrap_or("")
                .to_string();
            handle_join(req, state, &id).await
        }

        // POST /api/nuclei/{id}/leave
        (Method::POST, p) if p.ends_with("/leave") => {
            let id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/leave"))
                .unwrap_or("")
                .to_string();
            handle_leave(req, state, &id).await
        }

        // GET /api/nuclei/{id}/members - Roster
        (Method::GET, p) if p.ends_with("/members") => {
            let id = p
                .strip_prefix('/')
                .and_then(|s| s.strip_suffix("/members"))
                .unwrap_or("")
                .to_string();
            handle_roster(state, &id).await
        }

        // DELETE /api/nuclei/{id}/members/{userId} - Remove a member
        // Must match before the bare-id DELETE below
        (Method::DELETE, p) if p.contains("/members/") => {
            let rest = p.trim_start_matches('/');
            let (id, target) = match rest.split_once("/members/") {
                Some((id, target)) if !id.is_empty() && !target.is_empty() => {
                    (id.to_string(), target.to_string())
                }
                _ => return error_response(StatusCode::NOT_FOUND, "Not found", None),
            };
            handle_remove_member(req, state, &id, &target).await
        }

        // PUT /api/nuclei/{id} - Patch
        (Method::PUT, p) => {
            let id = p.trim_start_matches('/').to_string();
            if id.is_empty() || id.contains('/') {
                return error_response(StatusCode::NOT_FOUND, "Not found", None);
            }
            handle_update(req, state, &id).await
        }

        // DELETE /api/nuclei/{id}
        (Method::DELETE, p) => {
            let id = p.trim_start_matches('/').to_string();
            if id.is_empty() || id.contains('/') {
                return error_response(StatusCode::NOT_FOUND, "Not found", None);
            }
            handle_delete(req, state, &id).await
        }

        // GET /api/nuclei/{id} - Single nucleus (public)
        (Method::GET, p) => {
            let id = p.trim_start_matches('/').to_string();
            if id.is_empty() || id.contains('/') {
                return error_response(StatusCode::NOT_FOUND, "Not found", None);
            }
            handle_get(state, &id).await
        }

        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

/// Parse the `include_inactive` flag from a query string
fn include_inactive_from_query(query: Option<&str>) -> bool {
    query
        .map(|q| {
            q.split('&').any(|pair| {
                matches!(
                    pair.split_once('='),
                    Some(("include_inactive", "true")) | Some(("include_inactive", "1"))
                )
            })
        })
        .unwrap_or(false)
}

// =============================================================================
// Endpoint Handlers
// =============================================================================

/// POST /admin/nuclei and POST /api/nuclei - shared creation path
async fn handle_create(
    req: Request<Incoming>,
    state: Arc<AppState>,
    acting: ActingRole,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let fields: NewNucleus = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match state.nucleus_service.create(&caller, acting, fields).await {
        Ok(nucleus) => json_response(StatusCode::CREATED, &nucleus),
        Err(e) => err_to_response(&e),
    }
}

/// GET /api/nuclei - Directory; inactive rows are admin-only
async fn handle_list(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let include_inactive = include_inactive_from_query(req.uri().query());

    if include_inactive {
        let caller = match authenticate(&req, &state).await {
            Ok(c) => c,
            Err(resp) => return resp,
        };
        if let Err(e) = require_admin_role(&state.profiles, &caller.user_id).await {
            return err_to_response(&e);
        }
    }

    match state.nuclei.list(include_inactive).await {
        Ok(nuclei) => {
            let total = nuclei.len();
            json_response(StatusCode::OK, &NucleiResponse { nuclei, total })
        }
        Err(e) => {
            warn!("Error listing nuclei: {}", e);
            err_to_response(&e)
        }
    }
}

/// GET /api/nuclei/{id} - Single nucleus, no token required
async fn handle_get(state: Arc<AppState>, nucleus_id: &str) -> Response<FullBody> {
    match state.nuclei.get(nucleus_id).await {
        Ok(Some(nucleus)) => json_response(StatusCode::OK, &nucleus),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Nucleus not found", None),
        Err(e) => {
            warn!("Error fetching nucleus {}: {}", nucleus_id, e);
            err_to_response(&e)
        }
    }
}

/// PUT /api/nuclei/{id} - Patch fields
async fn handle_update(
    req: Request<Incoming>,
    state: Arc<AppState>,
    nucleus_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let changes: NucleusChanges = match read_json(req).await {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match state
        .nucleus_service
        .update(&caller, nucleus_id, changes)
        .await
    {
        Ok(nucleus) => json_response(StatusCode::OK, &nucleus),
        Err(e) => err_to_response(&e),
    }
}

/// DELETE /api/nuclei/{id}
async fn handle_delete(
    req: Request<Incoming>,
    state: Arc<AppState>,
    nucleus_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state.nucleus_service.delete(&caller, nucleus_id).await {
        Ok(()) => success_response("Nucleus deleted"),
        Err(e) => err_to_response(&e),
    }
}

/// POST /api/nuclei/{id}/join
async fn handle_join(
    req: Request<Incoming>,
    state: Arc<AppState>,
    nucleus_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state.nucleus_service.join(&caller, nucleus_id).await {
        Ok(changed) => json_response(
            StatusCode::OK,
            &MembershipResponse {
                success: true,
                changed,
            },
        ),
        Err(e) => err_to_response(&e),
    }
}

/// POST /api/nuclei/{id}/leave
async fn handle_leave(
    req: Request<Incoming>,
    state: Arc<AppState>,
    nucleus_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state.nucleus_service.leave(&caller, nucleus_id).await {
        Ok(changed) => json_response(
            StatusCode::OK,
            &MembershipResponse {
                success: true,
                changed,
            },
        ),
        Err(e) => err_to_response(&e),
    }
}

/// GET /api/nuclei/{id}/members - Roster with profile names, public
async fn handle_roster(state: Arc<AppState>, nucleus_id: &str) -> Response<FullBody> {
    // 404 for unknown nuclei rather than an empty roster
    match state.nuclei.get(nucleus_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Nucleus not found", None),
        Err(e) => return err_to_response(&e),
    }

    match state.members.roster(nucleus_id).await {
        Ok(members) => {
            let total = members.len();
            json_response(StatusCode::OK, &RosterResponse { members, total })
        }
        Err(e) => {
            warn!("Error loading roster for {}: {}", nucleus_id, e);
            err_to_response(&e)
        }
    }
}

/// DELETE /api/nuclei/{id}/members/{userId}
async fn handle_remove_member(
    req: Request<Incoming>,
    state: Arc<AppState>,
    nucleus_id: &str,
    target_id: &str,
) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match state
        .nucleus_service
        .remove_member(&caller, nucleus_id, target_id)
        .await
    {
        Ok(()) => success_response("Member removed"),
        Err(e) => err_to_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_inactive_parses_flag_values() {
        assert!(include_inactive_from_query(Some("include_inactive=true")));
        assert!(include_inactive_from_query(Some("include_inactive=1")));
        assert!(include_inactive_from_query(Some(
            "limit=5&include_inactive=true"
        )));
        assert!(!include_inactive_from_query(Some("include_inactive=false")));
        assert!(!include_inactive_from_query(Some("include_inactive")));
        assert!(!include_inactive_from_query(None));
    }
}
