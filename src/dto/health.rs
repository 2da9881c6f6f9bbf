use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the scoring backend is considered reachable.
    pub online: bool,
    /// Scoring sessions currently open.
    pub open_sessions: usize,
    /// Hole scores waiting in the offline queue across all matches.
    pub pending_queue_size: usize,
}

impl HealthResponse {
    /// Healthy when online; degraded while scoring runs from the offline queue.
    pub fn new(online: bool, open_sessions: usize, pending_queue_size: usize) -> Self {
        Self {
            status: if online { "ok" } else { "degraded" }.to_string(),
            online,
            open_sessions,
            pending_queue_size,
        }
    }
}

/// Network state reported by the presentation layer.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConnectivityRequest {
    /// Whether the device has network access.
    pub online: bool,
}

/// Connectivity after a report.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectivityResponse {
    /// Effective connectivity after applying the report.
    pub online: bool,
}
