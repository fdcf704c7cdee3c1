//! Atrio - community portal backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atrio::{config::Args, db::DbManager, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("atrio={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Atrio - Community Portal Backend");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Database: {}", args.database_path.display());
    info!("Feed capacity: {}", args.feed_capacity);
    info!(
        "Payments: {}",
        if args.payments_enabled() { "enabled" } else { "disabled" }
    );
    info!("======================================");

    // Open the store and bring the schema up to date
    let db = match DbManager::new(&args.database_path, args.db_pool_size) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Database open failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = db.run_migrations() {
        error!("Database migration failed: {}", e);
        std::process::exit(1);
    }
    info!("Database ready at {}", db.path().display());

    // Create application state
    let state = match server::AppState::new(args, db) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    // Run the server
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
