use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report connectivity, open sessions and the device-wide queue backlog.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let online = state.connectivity().is_online();
    let pending = state.queue().size();
    if !online {
        warn!(pending, "scoring backend unreachable (degraded mode)");
    }

    HealthResponse::new(online, state.sessions().len(), pending)
}
