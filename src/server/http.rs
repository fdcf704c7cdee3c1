//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Upgrades are enabled
//! on every connection so the dashboard WebSocket shares the same port.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::audit::AuditRecorder;
use crate::auth::JwtValidator;
use crate::config::Args;
use crate::db::{
    ActivityLogRepository, DbManager, MembershipRepository, NucleusRepository, ProfileRepository,
};
use crate::payments::{
    CustomerDirectory, IdentityAdminDirectory, NullDirectory, PaymentsService,
};
use crate::realtime::{spawn_feed_task, ActivityFeed, ChangeHub};
use crate::routes;
use crate::services::{NucleusService, ProfileService, UserAdminService};
use crate::types::{AtrioError, Result};

type FullBody = Full<Bytes>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub db: Arc<DbManager>,
    /// Profile rows, one per identity-provider account seen so far
    pub profiles: Arc<ProfileRepository>,
    /// Nucleus directory
    pub nuclei: Arc<NucleusRepository>,
    /// Nucleus rosters
    pub members: Arc<MembershipRepository>,
    /// Append-only audit trail
    pub activity: Arc<ActivityLogRepository>,
    /// Store-event fanout between services and the feed task
    pub hub: Arc<ChangeHub>,
    /// Recent-activity list plus metrics pushed to dashboard clients
    pub feed: Arc<ActivityFeed>,
    /// Role and ban administration
    pub user_admin: Arc<UserAdminService>,
    /// Nucleus lifecycle and membership moderation
    pub nucleus_service: Arc<NucleusService>,
    /// Self-service profile edits
    pub profile_service: Arc<ProfileService>,
    /// Checkout and webhook adapter; None when unconfigured
    pub payments: Option<Arc<PaymentsService>>,
    /// Token validator built once at startup
    pub jwt: JwtValidator,
    pub started_at: Instant,
}

impl AppState {
    /// Wire repositories, services and the realtime feed over one store
    pub fn new(args: Args, db: Arc<DbManager>) -> Result<Self> {
        let secret = args
            .jwt_secret()
            .ok_or_else(|| AtrioError::Config("JWT secret is not configured".to_string()))?;
        let jwt = JwtValidator::new(&secret, args.jwt_expiry_seconds);

        let profiles = Arc::new(ProfileRepository::new(Arc::clone(&db)));
        let nuclei = Arc::new(NucleusRepository::new(Arc::clone(&db)));
        let members = Arc::new(MembershipRepository::new(Arc::clone(&db)));
        let activity = Arc::new(ActivityLogRepository::new(Arc::clone(&db)));

        let hub = Arc::new(ChangeHub::new());
        let feed = Arc::new(ActivityFeed::new(
            Arc::clone(&activity),
            Arc::clone(&profiles),
            args.feed_capacity,
        ));
        let audit = Arc::new(AuditRecorder::new(Arc::clone(&activity), Arc::clone(&hub)));

        let user_admin = Arc::new(UserAdminService::new(
            Arc::clone(&profiles),
            Arc::clone(&audit),
            Arc::clone(&hub),
        ));
        let nucleus_service = Arc::new(NucleusService::new(
            Arc::clone(&profiles),
            Arc::clone(&nuclei),
            Arc::clone(&members),
            Arc::clone(&audit),
        ));
        let profile_service = Arc::new(ProfileService::new(
            Arc::clone(&profiles),
            Arc::clone(&hub),
        ));

        let payments = if args.payments_enabled() {
            let directory: Arc<dyn CustomerDirectory> = match (
                args.identity.identity_api_url.clone(),
                args.identity.identity_admin_key.clone(),
            ) {
                (Some(url), Some(key)) => Arc::new(IdentityAdminDirectory::new(url, key)),
                _ => Arc::new(NullDirectory),
            };
            Some(Arc::new(PaymentsService::new(
                args.payments.clone(),
                Arc::clone(&profiles),
                directory,
                Arc::clone(&hub),
            )))
        } else {
            None
        };

        Ok(Self {
            args,
            db,
            profiles,
            nuclei,
            members,
            activity,
            hub,
            feed,
            user_admin,
            nucleus_service,
            profile_service,
            payments,
            jwt,
            started_at: Instant::now(),
        })
    }
}

/// Run the HTTP server until the process is stopped
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Atrio listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - insecure JWT fallback in use");
    }

    // Prime the recent-activity list, then relay store events into the feed
    if let Err(e) = state.feed.prime().await {
        warn!("Error priming activity feed: {}", e);
    }
    spawn_feed_task(Arc::clone(&state.feed), Arc::clone(&state.hub));
    info!(
        "Dashboard feed enabled at /admin/ws (last {} entries)",
        state.args.feed_capacity
    );

    if state.payments.is_some() {
        info!("Payments endpoints enabled at /api/payments/*");
    } else {
        info!("Payments endpoints disabled (no provider configuration)");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Readiness probe - returns 200 only if the database answers
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        // ====================================================================
        // Admin surface - platform admins only, checked against the store
        // ====================================================================

        // Real-time WebSocket feed for the dashboard
        (Method::GET, "/admin/ws") => {
            routes::handle_dashboard_ws(Arc::clone(&state), req).await
        }

        // Audit trail and aggregate metrics
        (Method::GET, "/admin/activity") | (Method::GET, "/admin/metrics") => {
            routes::handle_activity_request(req, Arc::clone(&state), &path).await
        }

        // User management
        (_, p) if p.starts_with("/admin/users") => {
            routes::handle_admin_users_request(req, Arc::clone(&state), p).await
        }

        // Nucleus directory management
        (_, p) if p.starts_with("/admin/nuclei") => {
            routes::handle_admin_nuclei_request(req, Arc::clone(&state), p).await
        }

        // ====================================================================
        // Member surface
        // ====================================================================

        // Nucleus directory, membership
        (_, p) if p.starts_with("/api/nuclei") => {
            routes::handle_api_nuclei_request(req, Arc::clone(&state), p).await
        }

        // Self-service profile and census
        (_, p) if p.starts_with("/api/profile") || p.starts_with("/api/census") => {
            routes::handle_profile_request(req, Arc::clone(&state), p).await
        }

        // Checkout and provider webhook
        (_, p) if p.starts_with("/api/payments") => {
            routes::handle_payments_request(req, Arc::clone(&state), p).await
        }

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<FullBody> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
