// =============================================================================
// Chart data API — read-only JSON over the chart store
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::ChartStore;

/// Build the chart API router. CORS is permissive: the chart front-end is
/// served from wherever the operator likes.
pub fn router(store: Arc<ChartStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chart/health", get(health))
        .route("/api/chart/candles", get(candles))
        .route("/api/chart/orders", get(orders))
        .route("/api/chart/indicators", get(indicators))
        .layer(cors)
        .with_state(store)
}

/// Bind and serve until the process exits.
pub async fn serve(store: Arc<ChartStore>, addr: &str) -> anyhow::Result<()> {
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "chart API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn candles(State(store): State<Arc<ChartStore>>) -> impl IntoResponse {
    Json(store.candles())
}

async fn orders(State(store): State<Arc<ChartStore>>) -> impl IntoResponse {
    Json(store.orders())
}

async fn indicators(State(store): State<Arc<ChartStore>>) -> impl IntoResponse {
    Json(store.indicators())
}
