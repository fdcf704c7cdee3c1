//! Admin activity trail and metrics endpoints
//!
//! ## Endpoints
//!
//! - `GET /admin/activity` - Recent audit entries joined with actor names
//! - `GET /admin/metrics` - Aggregate community counters
//!
//! These back the dashboard's initial page load; live updates flow over the
//! websocket instead.

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::{authenticate, err_to_response, error_response, json_response, FullBody};
use crate::auth::require_admin_role;
use crate::db::ActivityView;
use crate::server::AppState;

/// Activity list response
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub entries: Vec<ActivityView>,
    pub total: usize,
}

fn limit_from_query(query: Option<&str>) -> u32 {
    let mut limit = 20;
    if let Some(q) = query {
        for pair in q.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key == "limit" {
                    limit = value.parse().unwrap_or(20);
                }
            }
        }
    }
    limit.clamp(1, 50)
}

/// Route `/admin/activity` and `/admin/metrics` requests
pub async fn handle_activity_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<FullBody> {
    match (req.method().clone(), path) {
        (Method::GET, "/admin/activity") => handle_list_activity(req, state).await,
        (Method::GET, "/admin/metrics") => handle_metrics(req, state).await,
        _ => error_response(StatusCode::NOT_FOUND, "Not found", None),
    }
}

/// GET /admin/activity - Newest entries first
async fn handle_list_activity(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(e) = require_admin_role(&state.profiles, &caller.user_id).await {
        return err_to_response(&e);
    }

    let limit = limit_from_query(req.uri().query());

    match state.activity.list_with_actor(limit).await {
        Ok(entries) => {
            let total = entries.len();
            json_response(StatusCode::OK, &ActivityResponse { entries, total })
        }
        Err(e) => {
            warn!("Error listing activity: {}", e);
            err_to_response(&e)
        }
    }
}

/// GET /admin/metrics - Aggregate counters
async fn handle_metrics(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let caller = match authenticate(&req, &state).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    if let Err(e) = require_admin_role(&state.profiles, &caller.user_id).await {
        return err_to_response(&e);
    }

    match state.profiles.community_metrics().await {
        Ok(metrics) => json_response(StatusCode::OK, &metrics),
        Err(e) => {
            warn!("Error computing metrics: {}", e);
            err_to_response(&e)
        }
    }
}
