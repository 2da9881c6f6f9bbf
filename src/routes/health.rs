use axum::{
    Json, Router,
    extract::State,
    routing::{get, put},
};

use crate::{
    dto::health::{ConnectivityRequest, ConnectivityResponse, HealthResponse},
    services::{health_service, session_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
/// Return connectivity, open sessions and the offline backlog.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = health_service::health_status(&state).await;
    Json(status)
}

#[utoipa::path(
    put,
    path = "/connectivity",
    tag = "health",
    request_body = ConnectivityRequest,
    responses((status = 200, description = "Effective connectivity", body = ConnectivityResponse))
)]
/// Record the network state seen by the presentation layer.
pub async fn report_connectivity(
    State(state): State<SharedState>,
    Json(payload): Json<ConnectivityRequest>,
) -> Json<ConnectivityResponse> {
    Json(session_service::report_connectivity(&state, payload))
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/healthcheck", get(healthcheck))
        .route("/connectivity", put(report_connectivity))
}
