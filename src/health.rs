//! Health Check API
//!
//! Provides health check endpoints for monitoring and process supervisors.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::bridge::Bridge;
use crate::conversation::ConversationStats;
use crate::transport::Identity;

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Start time for uptime calculation
    pub start_time: Instant,
    /// Application version
    pub version: &'static str,
    pub bridge: Arc<Bridge>,
}

impl AppState {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
            bridge,
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Account the bridge is logged in as
    pub identity: Option<Identity>,
    pub conversations: ConversationStats,
    /// Timestamp (ISO 8601)
    pub timestamp: String,
}

/// Health check handler
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let identity = state.bridge.identity();
    Json(HealthResponse {
        status: if identity.is_some() { "ok" } else { "starting" },
        version: state.version,
        uptime_secs: state.uptime_secs(),
        identity,
        conversations: state.bridge.store().stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: ready once the transport is connected
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.bridge.identity().is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Create health check router
pub fn health_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health router until the process exits
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Health server listening on {}", listener.local_addr()?);
    axum::serve(listener, health_router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeOptions;
    use crate::conversation::ConversationStore;
    use crate::model::{OpenAiBackend, OpenAiConfig};
    use crate::peer::PeerResolver;
    use crate::telegram::BotTransport;
    use crate::transport::Transport;

    fn state() -> Arc<AppState> {
        let transport: Arc<dyn Transport> = Arc::new(BotTransport::new("123:test"));
        let model = Arc::new(OpenAiBackend::new(OpenAiConfig::default()).unwrap());
        let bridge = Bridge::new(
            Arc::clone(&transport),
            model,
            Arc::new(ConversationStore::new()),
            Arc::new(PeerResolver::new(transport)),
            BridgeOptions::default(),
        );
        Arc::new(AppState::new(Arc::new(bridge)))
    }

    #[test]
    fn test_app_state_version() {
        let state = state();
        assert!(!state.version.is_empty());
        assert!(state.uptime_secs() < 10);
    }

    #[tokio::test]
    async fn test_not_ready_before_connect() {
        assert_eq!(readiness(State(state())).await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(liveness().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_starting() {
        let Json(response) = health_check(State(state())).await;
        assert_eq!(response.status, "starting");
        assert!(response.identity.is_none());
        assert_eq!(response.conversations.stored_contexts, 0);
    }
}
