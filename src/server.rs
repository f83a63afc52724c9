use crate::model::SightingRecord;
use crate::store::SqliteStore;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
}

pub fn router(store: Arc<SqliteStore>) -> Router {
    Router::new()
        .route("/sightings", get(list_sightings))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

pub async fn serve(bind: SocketAddr, store: Arc<SqliteStore>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "serving sightings");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}

async fn list_sightings(
    State(state): State<AppState>,
) -> Result<Json<Vec<SightingRecord>>, ApiError> {
    let store = state.store.clone();
    let records = tokio::task::spawn_blocking(move || store.query_all())
        .await
        .map_err(|err| ApiError(err.to_string()))?
        .map_err(|err| ApiError(err.to_string()))?;
    Ok(Json(records))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0 })),
        )
            .into_response()
    }
}
