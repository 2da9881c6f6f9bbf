use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::session::{
        ConcedeRequest, OpenSessionRequest, OpenSessionResponse, SessionStateResponse,
        SetCurrentHoleRequest, SubmitScoreRequest, SubmitScoreResponse,
    },
    error::AppError,
    services::session_service,
    state::{SharedState, scoring::MatchSummary},
};

/// Routes driving scoring sessions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", get(session_state).delete(close_session))
        .route("/sessions/{id}/scores", post(submit_score))
        .route("/sessions/{id}/scorecard", post(submit_scorecard))
        .route("/sessions/{id}/concede", post(concede_match))
        .route("/sessions/{id}/current-hole", put(set_current_hole))
        .route("/sessions/{id}/refetch", post(refetch))
        .route("/sessions/{id}/takeover", post(take_over))
        .route("/sessions/{id}/decision/ack", post(acknowledge_decision))
        .route("/sessions/{id}/queue/{hole}", delete(discard_queued))
}

/// Open a scoring session on a match for a user.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    request_body = OpenSessionRequest,
    responses(
        (status = 200, description = "Session opened", body = OpenSessionResponse),
        (status = 503, description = "Local storage unavailable")
    )
)]
pub async fn open_session(
    State(state): State<SharedState>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<Json<OpenSessionResponse>, AppError> {
    payload.validate()?;
    let response = session_service::open_session(&state, payload).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Current session state", body = SessionStateResponse),
        (status = 404, description = "Unknown session")
    )
)]
/// Current state of a session.
pub async fn session_state(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStateResponse>, AppError> {
    Ok(Json(session_service::session_state(&state, id).await?))
}

/// Tear the session down and release its scoring lock.
#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 204, description = "Session closed"),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    session_service::close_session(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Submit the user's score for a hole, queueing it when offline.
#[utoipa::path(
    post,
    path = "/sessions/{id}/scores",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = SubmitScoreRequest,
    responses(
        (status = 200, description = "Score confirmed or queued", body = SubmitScoreResponse),
        (status = 400, description = "Score outside the allowed ranges"),
        (status = 403, description = "Caller is not a participant or not the assigned marker"),
        (status = 409, description = "Hole closed or scorecard already submitted"),
        (status = 423, description = "Another session holds the scoring lock")
    )
)]
pub async fn submit_score(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitScoreRequest>,
) -> Result<Json<SubmitScoreResponse>, AppError> {
    payload.validate()?;
    let response = session_service::submit_score(&state, id, payload).await?;
    Ok(Json(response))
}

/// Finalize the user's scorecard.
#[utoipa::path(
    post,
    path = "/sessions/{id}/scorecard",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Scorecard submitted", body = MatchSummary),
        (status = 409, description = "Holes still unvalidated or queued"),
        (status = 503, description = "Backend unreachable")
    )
)]
pub async fn submit_scorecard(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchSummary>, AppError> {
    Ok(Json(session_service::submit_scorecard(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/concede",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = ConcedeRequest,
    responses(
        (status = 200, description = "Match conceded", body = SessionStateResponse),
        (status = 403, description = "Caller does not play in the match")
    )
)]
/// Concede the match on behalf of the user's team.
pub async fn concede_match(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ConcedeRequest>>,
) -> Result<Json<SessionStateResponse>, AppError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    payload.validate()?;
    Ok(Json(
        session_service::concede_match(&state, id, payload).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/sessions/{id}/current-hole",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    request_body = SetCurrentHoleRequest,
    responses((status = 200, description = "Hole cursor moved", body = SessionStateResponse))
)]
/// Move the session's hole cursor.
pub async fn set_current_hole(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetCurrentHoleRequest>,
) -> Result<Json<SessionStateResponse>, AppError> {
    payload.validate()?;
    Ok(Json(
        session_service::set_current_hole(&state, id, payload).await?,
    ))
}

/// Reload the scoring view now.
#[utoipa::path(
    post,
    path = "/sessions/{id}/refetch",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "View reloaded", body = SessionStateResponse))
)]
pub async fn refetch(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStateResponse>, AppError> {
    Ok(Json(session_service::refetch(&state, id).await?))
}

/// Take the scoring lock from whichever session holds it.
#[utoipa::path(
    post,
    path = "/sessions/{id}/takeover",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Lock taken over", body = SessionStateResponse))
)]
pub async fn take_over(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStateResponse>, AppError> {
    Ok(Json(session_service::take_over(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/decision/ack",
    tag = "sessions",
    params(("id" = String, Path, description = "Session identifier")),
    responses((status = 200, description = "Decision notice dismissed", body = SessionStateResponse))
)]
/// Dismiss the early-decision notice.
pub async fn acknowledge_decision(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStateResponse>, AppError> {
    Ok(Json(
        session_service::acknowledge_decision(&state, id).await?,
    ))
}

/// Discard the user's queued score for a hole, typically after the backend rejected its replay.
#[utoipa::path(
    delete,
    path = "/sessions/{id}/queue/{hole}",
    tag = "sessions",
    params(
        ("id" = String, Path, description = "Session identifier"),
        ("hole" = u8, Path, description = "Hole whose queued score is dropped")
    ),
    responses(
        (status = 200, description = "Queued score discarded", body = SessionStateResponse),
        (status = 404, description = "Unknown session or nothing queued for the hole"),
        (status = 423, description = "Another session holds the scoring lock")
    )
)]
pub async fn discard_queued(
    State(state): State<SharedState>,
    Path((id, hole)): Path<(Uuid, u8)>,
) -> Result<Json<SessionStateResponse>, AppError> {
    Ok(Json(
        session_service::discard_queued(&state, id, hole).await?,
    ))
}
