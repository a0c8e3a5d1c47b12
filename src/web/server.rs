//! Loopback push listener using axum

use anyhow::Result;
use axum::http::Method;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

use usagelamp_core::lifecycle::Shutdown;
use usagelamp_core::scheduler::Trigger;
use usagelamp_core::state::SharedStore;

use super::api::{self, PushState};

/// Push endpoint bound to 127.0.0.1
pub struct PushServer {
    port: u16,
    state: Arc<PushState>,
}

impl PushServer {
    pub fn new(port: u16, store: SharedStore, triggers: mpsc::Sender<Trigger>) -> Self {
        Self {
            port,
            state: Arc::new(PushState { store, triggers }),
        }
    }

    /// Build the router with permissive CORS
    ///
    /// The sender runs in a browser extension, so pre-flight must succeed
    /// from any origin.
    pub fn router(state: Arc<PushState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);

        Router::new()
            .route("/usage", post(api::post_usage))
            .route("/status", get(api::get_status))
            .with_state(state)
            .layer(cors)
    }

    /// Bind and serve in a background task until `shutdown` fires
    ///
    /// Returns `None` if the port cannot be bound; the daemon keeps running
    /// without push.
    pub async fn start(self, shutdown: Shutdown) -> Option<tokio::task::JoinHandle<Result<()>>> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!(
                    "Push endpoint unavailable on {} ({}), continuing without push",
                    addr,
                    e
                );
                return None;
            }
        };

        let local = listener.local_addr().unwrap_or(addr);
        tracing::info!("Push endpoint listening on http://{}", local);

        let app = Self::router(self.state);
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await?;
            tracing::debug!("Push endpoint closed");
            Ok(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use usagelamp_core::state::SnapshotStore;

    fn test_state() -> Arc<PushState> {
        let (triggers, _rx) = mpsc::channel(8);
        Arc::new(PushState {
            store: SnapshotStore::shared(),
            triggers,
        })
    }

    #[tokio::test]
    async fn test_preflight_allows_any_origin() {
        let app = PushServer::router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/usage")
                    .header("origin", "chrome-extension://abcdef")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        let methods = headers["access-control-allow-methods"].to_str().unwrap();
        assert!(methods.contains("POST"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_not_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let (triggers, _rx) = mpsc::channel(8);
        let server = PushServer::new(port, SnapshotStore::shared(), triggers);
        assert!(server.start(Shutdown::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let (triggers, _rx) = mpsc::channel(8);
        let server = PushServer::new(0, SnapshotStore::shared(), triggers);
        let shutdown = Shutdown::new();

        let handle = server.start(shutdown.clone()).await.unwrap();
        shutdown.trigger();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener should close")
            .unwrap();
        assert!(result.is_ok());
    }
}
