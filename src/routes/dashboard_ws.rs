//! Real-time WebSocket feed for the admin activity dashboard
//!
//! ## Protocol
//!
//! Connect: `ws://localhost:8080/admin/ws`
//!
//! Messages (server → client):
//! - `snapshot` - Recent activity entries plus current metrics, sent once
//!   after connect
//! - `activity` - A new audit entry, already joined with the actor's name
//! - `metrics` - Aggregate counters recomputed after a profile change
//! - `error` - Feed-side failure notice
//!
//! Messages (client → server):
//! - `subscribe` / `unsubscribe` - Topic selection (acknowledged only)
//! - `ping` - Keep-alive ping
//!
//! ## Example Messages
//!
//! ```json
//! // Server sends a new activity entry
//! {
//!   "type": "activity",
//!   "timestamp": "2024-01-15T10:30:00Z",
//!   "entry": {
//!     "id": 42,
//!     "actorId": "user-1",
//!     "actorName": "ana",
//!     "action": "USER_BAN",
//!     "targetId": "user-7",
//!     "detail": {"target_username": "juan123"},
//!     "ipAddress": "10.0.0.9",
//!     "createdAt": "2024-01-15T10:29:59.120Z"
//!   }
//! }
//!
//! // Server sends recomputed metrics
//! {
//!   "type": "metrics",
//!   "timestamp": "2024-01-15T10:30:00Z",
//!   "metrics": {"totalProfiles": 120, "totalAdmins": 3}
//! }
//! ```
//!
//! Browsers cannot set headers on WebSocket connects, so the bearer token
//! may arrive either in the `Authorization` header or as a `token` query
//! parameter. The admin check runs against the stored profile row before
//! the upgrade completes.

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::{err_to_response, error_response, FullBody};
use crate::auth::{extract_token_from_header, require_admin_role, Caller};
use crate::realtime::{ActivityFeed, FeedMessage};
use crate::server::AppState;

type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Message received from client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to updates
    Subscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    /// Unsubscribe from updates
    Unsubscribe {
        #[serde(default)]
        topics: Vec<String>,
    },
    /// Keep-alive ping
    Ping,
}

/// Pull the bearer token from the header or the `token` query parameter
fn token_from_request(req: &Request<Incoming>) -> Option<String> {
    let header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Some(token) = extract_token_from_header(header) {
        return Some(token.to_string());
    }

    let query = req.uri().query()?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "token" && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Handle WebSocket upgrade for the dashboard feed
pub async fn handle_dashboard_ws(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    // Admin gate runs before the upgrade, against the stored role
    let token = match token_from_request(&req) {
        Some(t) => t,
        None => {
            return error_response(StatusCode::UNAUTHORIZED, "No token provided", Some("NO_TOKEN"))
        }
    };

    let result = state.jwt.verify_token(&token);
    let claims = match result.claims {
        Some(c) if result.valid => c,
        _ => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                result.error.as_deref().unwrap_or("Invalid token"),
                Some("INVALID_TOKEN"),
            )
        }
    };
    let caller = Caller::from_claims(&claims, req.headers());

    if let Err(e) = state
        .profiles
        .ensure_profile(&caller.user_id, caller.email.as_deref())
        .await
    {
        warn!("Error ensuring profile for {}: {}", caller.user_id, e);
        return err_to_response(&e);
    }
    if let Err(e) = require_admin_role(&state.profiles, &caller.user_id).await {
        return err_to_response(&e);
    }

    // Check if this is a WebSocket upgrade request
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return error_response(StatusCode::BAD_REQUEST, "WebSocket upgrade required", None);
    }

    // Perform the upgrade
    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok((resp, ws)) => (resp, ws),
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "WebSocket upgrade failed",
                None,
            );
        }
    };

    // Spawn task to handle the WebSocket connection
    let feed = Arc::clone(&state.feed);
    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                let ws: HyperWebSocket = ws;
                if let Err(e) = handle_feed_connection(ws, feed).await {
                    warn!("Dashboard WebSocket error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    // Return the upgrade response
    // Convert the response body type
    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

/// Handle an individual dashboard WebSocket connection
async fn handle_feed_connection(
    ws: HyperWebSocket,
    feed: Arc<ActivityFeed>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut sender, mut receiver) = ws.split();

    info!("Dashboard feed client connected");

    // Send initial state: recent entries plus current metrics
    let initial_msg = match feed.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Error building feed snapshot: {}", e);
            FeedMessage::Error {
                message: "Snapshot unavailable".to_string(),
            }
        }
    };
    let json = serde_json::to_string(&initial_msg)?;
    sender.send(WsMessage::Text(json)).await?;

    // Subscribe to broadcasts
    let mut rx = feed.subscribe();

    // Handle messages
    loop {
        tokio::select! {
            // Broadcast message from the feed
            msg = rx.recv() => {
                match msg {
                    Ok(feed_msg) => {
                        let json = serde_json::to_string(&feed_msg)?;
                        if sender.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }

            // Message from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        debug!("Received from feed client: {}", text);
                        // Parse and handle client message
                        if let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) {
                            match client_msg {
                                ClientMessage::Ping => {
                                    let pong = serde_json::json!({"type": "pong", "timestamp": now_iso()});
                                    let _ = sender.send(WsMessage::Text(pong.to_string())).await;
                                }
                                ClientMessage::Subscribe { topics } => {
                                    debug!("Client subscribing to topics: {:?}", topics);
                                    // Topics not implemented yet, but acknowledged
                                }
                                ClientMessage::Unsubscribe { topics } => {
                                    debug!("Client unsubscribing from topics: {:?}", topics);
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("Dashboard feed client disconnected");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
        }
    }

    info!("Dashboard feed connection closed");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
