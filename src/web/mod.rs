//! Web server module.
//!
//! Serves the downtime report and the raw history as JSON.

mod handlers;

use crate::history::HistoryStore;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: String,
    pub store: Arc<HistoryStore>,
}

/// Web server for pingtrail.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    /// Create a new server reporting on `host`.
    pub fn new(port: u16, host: impl Into<String>, store: Arc<HistoryStore>) -> Self {
        Self {
            port,
            state: AppState {
                host: host.into(),
                store,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_report))
            .route("/api/history", get(handlers::handle_history))
            .route("/favicon.ico", get(handlers::handle_favicon))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` completes.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Listening for requests on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_history_endpoint() {
        let store = Arc::new(HistoryStore::new());
        store.seed_if_empty(Utc::now());
        let router = Server::new(0, "example.com", store.clone()).routes();

        let response = router
            .oneshot(Request::builder().uri("/api/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: Vec<crate::history::Interval> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, store.snapshot());
    }
}
