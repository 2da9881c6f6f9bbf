use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the match-play scoring sync service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::health::report_connectivity,
        crate::routes::sessions::open_session,
        crate::routes::sessions::session_state,
        crate::routes::sessions::close_session,
        crate::routes::sessions::submit_score,
        crate::routes::sessions::submit_scorecard,
        crate::routes::sessions::concede_match,
        crate::routes::sessions::set_current_hole,
        crate::routes::sessions::refetch,
        crate::routes::sessions::take_over,
        crate::routes::sessions::acknowledge_decision,
        crate::routes::sessions::discard_queued,
        crate::routes::sse::session_stream,
        crate::routes::leaderboard::leaderboard,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::ConnectivityRequest,
            crate::dto::health::ConnectivityResponse,
            crate::dto::session::OpenSessionRequest,
            crate::dto::session::OpenSessionResponse,
            crate::dto::session::SubmitScoreRequest,
            crate::dto::session::SubmitScoreResponse,
            crate::dto::session::SubmitOutcome,
            crate::dto::session::SetCurrentHoleRequest,
            crate::dto::session::ConcedeRequest,
            crate::dto::session::SessionStateResponse,
            crate::dto::session::SessionErrorPayload,
            crate::dto::phase::VisiblePhase,
            crate::dto::sse::Handshake,
            crate::dto::sse::QueueChangedEvent,
            crate::dto::sse::SessionBlockedEvent,
            crate::dto::sse::SessionUnblockedEvent,
            crate::dto::sse::MatchDecidedEvent,
            crate::dto::sse::ConnectivityChangedEvent,
            crate::dto::sse::ErrorEvent,
            crate::state::scoring::ScoringView,
            crate::state::scoring::MatchSummary,
            crate::state::scoring::Leaderboard,
            crate::state::scoring::DerivedFlags,
            crate::state::state_machine::ErrorKind,
        )
    ),
    tags(
        (name = "health", description = "Health and connectivity endpoints"),
        (name = "sessions", description = "Scoring session use cases"),
        (name = "sse", description = "Server-sent events streams"),
        (name = "leaderboard", description = "Competition standings"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_session_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/sessions/{id}/scores"));
        assert!(paths.contains_key("/sessions/{id}/events"));
        assert!(paths.contains_key("/sessions/{id}/queue/{hole}"));
        assert!(paths.contains_key("/competitions/{id}/leaderboard"));
    }
}
