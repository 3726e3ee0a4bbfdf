//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::monitor::Monitor;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<Monitor>,
}

/// HTTP front of the monitoring core.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, monitor: Arc<Monitor>) -> Self {
        Self {
            state: AppState { config, monitor },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/sites", get(handlers::handle_get_sites))
            .route("/api/sites", post(handlers::handle_create_site))
            .route("/api/sites/{id}/check", post(handlers::handle_check_site))
            .route("/api/sites/{id}/uptime", get(handlers::handle_uptime))
            .route("/api/sites/{id}/timeline", get(handlers::handle_timeline))
            .route("/api/status", get(handlers::handle_status))
            .route("/api/report", get(handlers::handle_report))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails or `shutdown` resolves.
    pub async fn start(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
