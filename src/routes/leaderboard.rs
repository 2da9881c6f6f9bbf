use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    services::session_service,
    state::{SharedState, scoring::Leaderboard},
};

/// Routes exposing competition standings.
pub fn router() -> Router<SharedState> {
    Router::new().route("/competitions/{id}/leaderboard", get(leaderboard))
}

/// Team standings of a competition, refreshed in the background once requested.
#[utoipa::path(
    get,
    path = "/competitions/{id}/leaderboard",
    tag = "leaderboard",
    params(("id" = String, Path, description = "Competition identifier")),
    responses(
        (status = 200, description = "Competition leaderboard", body = Leaderboard),
        (status = 404, description = "Unknown competition")
    )
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Leaderboard>, AppError> {
    Ok(Json(session_service::leaderboard(&state, id).await?))
}
