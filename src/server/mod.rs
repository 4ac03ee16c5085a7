pub mod api;

use crate::services::{CompareCache, MarketCache, ReconcileQueue, SharedHealthStats};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub market: Arc<MarketCache>,
    pub compare: Arc<CompareCache>,
    pub queue: Arc<ReconcileQueue>,
    pub health_stats: SharedHealthStats,
    pub started_at: Instant,
}

/// Start the axum server
pub async fn serve(app_state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    // The BI tool polls from browser dashboards; keep CORS permissive.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);

    tracing::info!("Registering routes:");
    tracing::info!("  GET /api/coins?limit=50");
    tracing::info!("  GET /api/compare?coin1=bitcoin&coin2=ethereum&format=rows");
    tracing::info!("  GET /api/coin/{{id}}/history");
    tracing::info!("  GET /health");

    let app = Router::new()
        .route("/api/coins", get(api::get_coins_handler))
        .route("/api/compare", get(api::compare_handler))
        .route("/api/coin/{id}/history", get(api::coin_history_handler))
        .route("/health", get(api::health_handler))
        .layer(cors)
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
