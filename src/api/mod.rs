pub mod extractors;
pub mod files;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use extractors::AppState;

pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new()
        .route("/status", get(status_handler))
        .nest("/files", files::create_router().await?);

    Ok(router)
}

/// Full application: banner, health check and the `/api` tree, with permissive
/// CORS so browser clients on any origin can call it.
pub async fn create_app(app_state: AppState) -> Result<Router> {
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .nest("/api", create_router().await?)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    Ok(app)
}

async fn status_handler() -> &'static str {
    "API is running"
}

async fn root_handler() -> &'static str {
    "Filevault: personal file management over signed CDN URLs"
}

async fn health_handler(State(app_state): State<AppState>) -> (StatusCode, &'static str) {
    match app_state.database.health_check().await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Database connection failed"),
    }
}
