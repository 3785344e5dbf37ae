//! Axum web server for the auction.
//!
//! Serves the REST API plus one WebSocket endpoint per audience
//! (team, admin, display). CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-admin-password"),
        ]);

    Router::new()
        // Team API
        .route("/api/team/join", post(routes::team_join))
        .route("/api/team/bid", post(routes::team_bid))
        // Admin API
        .route("/api/admin/login", post(routes::admin_login))
        .route("/api/admin/round/start", post(routes::admin_round_start))
        .route("/api/admin/round/close", post(routes::admin_round_close))
        .route("/api/admin/round/reset", post(routes::admin_round_reset))
        .route("/api/admin/team/wallet", post(routes::admin_team_wallet))
        .route("/api/admin/team/lock", post(routes::admin_team_lock))
        .route("/api/admin/team/cancel-bid", post(routes::admin_team_cancel_bid))
        .route("/api/admin/team/remove", post(routes::admin_team_remove))
        .route("/api/admin/wallets/reset", post(routes::admin_wallets_reset))
        .route("/api/admin/teams", get(routes::admin_teams))
        .route("/api/admin/export", get(routes::admin_export))
        // Public projections
        .route("/api/display", get(routes::display))
        .route("/health", get(routes::health))
        // Live push
        .route("/ws/team", get(routes::ws_team))
        .route("/ws/admin", get(routes::ws_admin))
        .route("/ws/display", get(routes::ws_display))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the task is cancelled.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Auction server starting on http://localhost:{port}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    axum::serve(listener, app)
        .await
        .context("Auction server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
