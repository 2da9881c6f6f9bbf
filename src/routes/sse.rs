use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown session")
    )
)]
/// Stream a session's state changes, queue activity, lock and decision notices.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, preamble) = sse_service::subscribe_session(&state, id).await?;
    info!(session_id = %id, "new session SSE connection");
    Ok(sse_service::to_sse_stream(receiver, preamble, id))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{id}/events", get(session_stream))
}
