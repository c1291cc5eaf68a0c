//! HTTP server module
//!
//! JSON API plus the live WebSocket feeds consumed by the viewer.

pub mod api;
pub mod live;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::HttpConfig;
use crate::error::{PosecastError, WebError};
use crate::AppState;

/// Web server for the API and live feeds
pub struct WebServer {
    app_state: Arc<AppState>,
    config: HttpConfig,
}

impl WebServer {
    /// Create a new web server
    pub fn new(app_state: Arc<AppState>, config: &HttpConfig) -> Self {
        Self {
            app_state,
            config: config.clone(),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        routes::create_router(Arc::clone(&self.app_state), &self.config)
    }

    /// Serve until the application shutdown signal fires
    pub async fn run(self) -> Result<(), PosecastError> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|e| WebError::Bind(format!("{}: {}", self.config.listen, e)))?;

        tracing::info!("HTTP server listening on http://{}", self.config.listen);

        let mut shutdown = self.app_state.subscribe_shutdown();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|e| WebError::Startup(e.to_string()))?;

        Ok(())
    }
}
