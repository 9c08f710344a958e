//! # Probe and Metrics Endpoint
//!
//! Small HTTP server running next to the controller.
//!
//! ## Endpoints
//!
//! - `GET /healthz` - Liveness, with import counts per phase
//! - `GET /readyz` - Readiness, 503 until the controller has started
//! - `GET /metrics` - Prometheus text format metrics
//!
//! ## Example
//!
//! ```no_run
//! use vmimport::api::{create_router, AppState};
//! use vmimport::store::ObjectStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ObjectStore::new());
//! let state = Arc::new(AppState::new(store));
//! let app = create_router(state.clone(), Duration::from_secs(30));
//!
//! state.mark_ready();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod health;

pub use health::HealthResponse;

use crate::metrics::MetricsCollector;
use crate::store::ObjectStore;
use axum::{routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared state of the probe handlers.
pub struct AppState {
    pub store: Arc<ObjectStore>,
    pub metrics_collector: Arc<MetricsCollector>,
    ready: AtomicBool,
}

impl AppState {
    /// Create state over `store`, installing the metrics recorder if none is installed yet.
    pub fn new(store: Arc<ObjectStore>) -> Self {
        let prometheus_handle = crate::metrics::setup_metrics_or_detached();
        let metrics_collector = Arc::new(MetricsCollector::new(
            Arc::clone(&store),
            Instant::now(),
            prometheus_handle,
        ));
        Self {
            store,
            metrics_collector,
            ready: AtomicBool::new(false),
        }
    }

    /// Report ready on `/readyz`.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Create the router with all endpoints configured.
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(crate::metrics::handler::metrics_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
