// src/main.rs
use axum::{extract::Extension, middleware, Router};
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod auth;
mod common;
mod devices;
mod health;
mod logging_middleware;
mod notifications;
mod push;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use auth::{IdentityConfig, IdentityVerifier, JwtIdentityVerifier, UnconfiguredVerifier};
use common::dev_mode::{apply_cli_override, log_dev_mode_status, DevModeConfig};
use common::monitoring::{init_sentry, MonitoringConfig};
use common::{safe_email_log, AppState};
use notifications::reconcile::{delivery_channel, DEFAULT_CHANNEL_CAPACITY};
use notifications::{spawn_reconciliation_worker, DeliveryReconciler, FanoutConfig};
use push::PushConfig;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Held for the whole process so pending events are flushed on exit
    let _sentry = init_sentry(&MonitoringConfig::from_env());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_tracing::layer())
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://notify_api.db".to_string());

    // Parse admin emails from comma-separated env var
    let admin_emails: HashSet<String> = env::var("ADMIN_EMAILS")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    info!(
        admins = ?admin_emails.iter().map(|e| safe_email_log(e)).collect::<Vec<_>>(),
        "Loaded admin emails"
    );

    let webhook_secret = env::var("DELIVERY_WEBHOOK_SECRET")
        .ok()
        .filter(|s| !s.trim().is_empty());
    if webhook_secret.is_none() {
        warn!("DELIVERY_WEBHOOK_SECRET not set - provider delivery webhook is disabled");
    }

    // ========================================================================
    // DEV MODE CONFIGURATION
    // ========================================================================

    let dev_mode = apply_cli_override(DevModeConfig::from_env());
    log_dev_mode_status(&dev_mode);

    // ========================================================================
    // DATABASE SETUP
    // ========================================================================

    if let Some(path_part) = database_url.strip_prefix("sqlite://") {
        let path_without_params = path_part.split('?').next().unwrap_or("");
        if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
            let db_path = PathBuf::from(path_without_params);
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }

    let connect_options = SqliteConnectOptions::from_str(&database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options)
        .await?;

    common::migrations::run_migrations(&pool).await?;

    // ========================================================================
    // SERVICE INITIALIZATION
    // ========================================================================

    let identity_config = IdentityConfig::from_env();
    let identity: Arc<dyn IdentityVerifier> = match &identity_config.jwt_secret {
        Some(secret) => {
            info!("JwtIdentityVerifier initialized");
            Arc::new(JwtIdentityVerifier::new(
                secret,
                identity_config.issuer.as_deref(),
                identity_config.audience.as_deref(),
            ))
        }
        None => {
            warn!("AUTH_JWT_SECRET not set - bearer verification will reject every request");
            Arc::new(UnconfiguredVerifier)
        }
    };

    let push_config = PushConfig::from_env();
    let dispatcher = push::build_dispatcher(&push_config, pool.clone());
    info!(provider = dispatcher.provider_name(), "PushDispatcher initialized");

    let fanout = FanoutConfig::from_env();
    info!(page_size = fanout.page_size, "Fan-out configured");

    let (delivery_events, delivery_rx) = delivery_channel(DEFAULT_CHANNEL_CAPACITY);
    spawn_reconciliation_worker(DeliveryReconciler::new(pool.clone()), delivery_rx);

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let app_state = AppState {
        db: pool,
        admin_emails,
        dev_mode,
        identity,
        dispatcher,
        fanout,
        delivery_events,
        webhook_secret,
    };

    let shared = Arc::new(RwLock::new(app_state));

    // ========================================================================
    // ROUTER COMPOSITION
    // ========================================================================

    let app = Router::new()
        .merge(health::health_routes())
        // ====================================================================
        // AUTHENTICATION ROUTES
        // ====================================================================
        .merge(auth::auth_routes())
        // ====================================================================
        // DEVICE REGISTRY ROUTES
        // ====================================================================
        .merge(devices::devices_routes())
        // ====================================================================
        // NOTIFICATION ROUTES (Store, Fan-out, Delivery reconciliation)
        // ====================================================================
        .merge(notifications::notifications_routes())
        // ====================================================================
        // MIDDLEWARE AND LAYERS
        // ====================================================================
        // Add request/response body logging in debug mode
        .layer(middleware::from_fn(logging_middleware::log_request_response))
        .layer(Extension(shared))
        .layer({
            let cors_origins = env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());

            let origins: Vec<axum::http::HeaderValue> = cors_origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::PATCH,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                    axum::http::HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(TraceLayer::new_for_http());

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
