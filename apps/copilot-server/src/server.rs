//! HTTP Server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use copilot_api::{create_router, state::AppState as ApiState};

use crate::cli::Args;

pub struct Server {
    args: Args,
    state: Arc<ApiState>,
}

impl Server {
    pub fn new(args: Args, state: Arc<ApiState>) -> Self {
        Self { args, state }
    }

    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.args.port));

        let app = self.build_http_router();

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?;

        axum::serve(listener, app.into_make_service())
            .await
            .context("HTTP server error")?;

        Ok(())
    }

    fn build_http_router(&self) -> Router {
        let api_router = create_router(self.state.clone());

        Router::new()
            .route("/", get(root))
            .route("/health", get(health_check))
            .nest("/api", api_router)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "Climate Document Intelligence Platform",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "Climate Document Intelligence Platform");
    }

    #[tokio::test]
    async fn test_health_check_handler() {
        let status = health_check().await;
        assert_eq!(status, StatusCode::OK);
    }
}
