use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::service::ChatService;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/models", get(handlers::models))
        .route("/api/v1/chat", post(handlers::chat))
        .route("/api/v1/chat/:id/history", get(handlers::history))
        .route(
            "/api/v1/chat/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/v1/chat/:id/clear", post(handlers::clear_session))
        .route("/api/v1/chat/:id/context", get(handlers::context_info))
        .route("/api/v1/chat/:id/compress", post(handlers::compress))
        .route(
            "/api/v1/chat/:id/summary",
            get(handlers::get_summary).delete(handlers::delete_summary),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the server. Returns a handle for graceful shutdown.
pub async fn start(
    config: ServerConfig,
    service: Arc<ChatService>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState { service };
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "stratum server started");

    let shutdown = CancellationToken::new();
    let shutdown_for_axum = shutdown.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_for_axum.cancelled().await;
            })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server: server_task,
    })
}

/// Handle returned by [`start`]; call `shutdown()` then `drain()`.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting new connections; in-flight requests complete.
    pub fn shutdown(&self) {
        tracing::info!("server shutdown initiated");
        self.shutdown.cancel();
    }

    /// Wait for the server task to finish after `shutdown()`.
    pub async fn drain(self) {
        let _ = self.server.await;
        tracing::debug!("server task drained");
    }
}
