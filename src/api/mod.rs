//! HTTP API server for the courier gateway

pub mod health;
pub mod reply;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::channel::{Channel, WhatsAppChannel};
use crate::media::MediaStore;
use crate::Result;

/// Shared state for API handlers
pub struct ApiState {
    /// The process-wide messaging session used by every send
    pub session: Arc<dyn Channel>,

    /// Media relay for outbound URL resolution
    pub media: MediaStore,

    /// Concrete adapter for webhook ingest; `None` when events arrive
    /// elsewhere (tests substitute a fake session)
    pub whatsapp: Option<Arc<WhatsAppChannel>>,

    /// Expected hub token for webhook subscription verification
    pub verify_token: Option<String>,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a new API server
    #[must_use]
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Build the router with all routes
    fn router(&self) -> Router {
        let router = Router::new()
            .merge(health::router())
            .merge(reply::router(self.state.clone()))
            .merge(webhook::router(self.state.clone()));

        // CORS layer for cross-origin webhook consoles
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
