//! Service health state and the `/health` handler.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;

/// Service health state
#[derive(Clone)]
pub struct HealthState {
    pub last_poll_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_poll_count: Arc<RwLock<usize>>,
    pub error_count: Arc<RwLock<usize>>,
    pub last_stale: Arc<RwLock<bool>>,
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            last_poll_time: Arc::new(RwLock::new(None)),
            last_poll_count: Arc::new(RwLock::new(0)),
            error_count: Arc::new(RwLock::new(0)),
            last_stale: Arc::new(RwLock::new(false)),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_success(&self, count: usize, stale: bool) {
        *self.last_poll_time.write().await = Some(Utc::now());
        *self.last_poll_count.write().await = count;
        *self.last_stale.write().await = stale;
        *self.error_count.write().await = 0;
        *self.last_error.write().await = None;
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.error_count.write().await += 1;
        *self.last_error.write().await = Some(message.into());
    }
}

/// Health check handler
pub async fn health_handler(State(health): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let last_poll = *health.last_poll_time.read().await;
    let last_count = *health.last_poll_count.read().await;
    let errors = *health.error_count.read().await;
    let stale = *health.last_stale.read().await;
    let last_error = health.last_error.read().await.clone();

    let status = if errors > 5 {
        "degraded"
    } else if stale {
        "stale"
    } else {
        "ok"
    };

    let http_status = if errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (http_status, Json(json!({
        "service": "props-ingestion",
        "version": env!("CARGO_PKG_VERSION"),
        "status": status,
        "last_poll": last_poll.map(|t| t.to_rfc3339()),
        "last_poll_count": last_count,
        "serving_snapshot": stale,
        "consecutive_errors": errors,
        "last_error": last_error
    })))
}
