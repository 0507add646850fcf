//! Health check HTTP server
//!
//! Exposes the relay's connection state and metrics over HTTP for process
//! supervisors and operators.

use crate::observability::metrics::metrics;
use crate::transport::mqtt::ConnectionState;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// HTTP health check server
pub struct HealthServer {
    client_id: String,
    port: u16,
    status: watch::Receiver<ConnectionState>,
    started_at: Instant,
}

impl HealthServer {
    /// Create a health server that reports the given connection status
    pub fn new(client_id: impl Into<String>, port: u16, status: watch::Receiver<ConnectionState>) -> Self {
        Self {
            client_id: client_id.into(),
            port,
            status,
            started_at: Instant::now(),
        }
    }

    fn connection_state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Build the route table
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let health_server = Arc::clone(self);
        let ready_server = Arc::clone(self);

        // GET /health - connection status
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.health_status();
                let code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
            }
        });

        // GET /metrics - metrics snapshot
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&metrics().snapshot()))
        });

        // GET /ready - ready once connected to the broker
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let ready = server.connection_state() == ConnectionState::Connected;
                let response = ReadinessResponse {
                    ready,
                    timestamp: current_timestamp(),
                };
                let code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
            }
        });

        // GET /live - process liveness
        let live_route = warp::path("live").and(warp::get()).and_then(|| async {
            Ok::<_, Infallible>(warp::reply::json(&LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            }))
        });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).and_then(|| async {
            let endpoints: HashMap<String, String> = [
                ("/health", "Connection status; 503 unless connected"),
                ("/metrics", "Relay metrics snapshot"),
                ("/ready", "Readiness probe"),
                ("/live", "Liveness probe"),
            ]
            .into_iter()
            .map(|(path, description)| (path.to_string(), description.to_string()))
            .collect();
            Ok::<_, Infallible>(warp::reply::json(&ApiDocumentationResponse { endpoints }))
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
    }

    /// Serve until the process exits
    pub async fn start(self: Arc<Self>) {
        let routes = self.routes();
        tracing::info!(port = self.port, "Starting health server");
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }

    fn health_status(&self) -> HealthStatus {
        let state = self.connection_state();
        HealthStatus {
            status: if state == ConnectionState::Connected {
                "healthy".to_string()
            } else {
                "degraded".to_string()
            },
            client_id: self.client_id.clone(),
            connection_state: state,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            timestamp: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub client_id: String,
    pub connection_state: ConnectionState,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<String, String>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
