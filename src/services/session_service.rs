//! Use cases behind the session REST routes. Each helper resolves the session from the registry
//! and delegates to [`ScoringSession`], returning the refreshed read state.

use tracing::{debug, info};

use crate::{
    dto::{
        health::{ConnectivityRequest, ConnectivityResponse},
        session::{
            ConcedeRequest, OpenSessionRequest, OpenSessionResponse, SessionStateResponse,
            SetCurrentHoleRequest, SubmitScoreRequest, SubmitScoreResponse,
        },
    },
    error::ServiceError,
    services::{scoring_session::ScoringSession, session_lock::SessionId},
    state::{
        SharedState,
        scoring::{CompetitionId, Leaderboard, MatchSummary},
    },
};

/// Open a scoring session and register it.
pub async fn open_session(
    state: &SharedState,
    request: OpenSessionRequest,
) -> Result<OpenSessionResponse, ServiceError> {
    let session = ScoringSession::open(state, request.match_id, request.user_id).await?;
    state.sessions().insert(session.id(), session.clone());
    Ok(OpenSessionResponse {
        session_id: session.id(),
        state: session.snapshot().await,
    })
}

/// Tear a session down and forget it.
pub async fn close_session(state: &SharedState, session_id: SessionId) -> Result<(), ServiceError> {
    let (_, session) = state
        .sessions()
        .remove(&session_id)
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;
    session.close().await;
    Ok(())
}

/// Current state of a session.
pub async fn session_state(
    state: &SharedState,
    session_id: SessionId,
) -> Result<SessionStateResponse, ServiceError> {
    Ok(state.session(session_id)?.snapshot().await)
}

/// Submit a hole score through the session.
pub async fn submit_score(
    state: &SharedState,
    session_id: SessionId,
    request: SubmitScoreRequest,
) -> Result<SubmitScoreResponse, ServiceError> {
    let session = state.session(session_id)?;
    let (hole_number, submission) = request.into_parts();
    let outcome = session.submit_score(hole_number, submission).await?;
    Ok(SubmitScoreResponse {
        outcome,
        state: session.snapshot().await,
    })
}

/// Finalize the user's scorecard.
pub async fn submit_scorecard(
    state: &SharedState,
    session_id: SessionId,
) -> Result<MatchSummary, ServiceError> {
    state.session(session_id)?.submit_scorecard().await
}

/// Concede the match for the user's team.
pub async fn concede_match(
    state: &SharedState,
    session_id: SessionId,
    request: ConcedeRequest,
) -> Result<SessionStateResponse, ServiceError> {
    let session = state.session(session_id)?;
    let reason = request
        .reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());
    session.concede_match(reason).await?;
    Ok(session.snapshot().await)
}

/// Move the hole cursor.
pub async fn set_current_hole(
    state: &SharedState,
    session_id: SessionId,
    request: SetCurrentHoleRequest,
) -> Result<SessionStateResponse, ServiceError> {
    let session = state.session(session_id)?;
    session.set_current_hole(request.hole_number).await?;
    Ok(session.snapshot().await)
}

/// Reload the scoring view now.
pub async fn refetch(
    state: &SharedState,
    session_id: SessionId,
) -> Result<SessionStateResponse, ServiceError> {
    let session = state.session(session_id)?;
    session.refetch().await?;
    Ok(session.snapshot().await)
}

/// Force the scoring lock onto this session.
pub async fn take_over(
    state: &SharedState,
    session_id: SessionId,
) -> Result<SessionStateResponse, ServiceError> {
    let session = state.session(session_id)?;
    session.take_over().await?;
    Ok(session.snapshot().await)
}

/// Drop the user's queued score for a hole, such as one the backend keeps rejecting.
pub async fn discard_queued(
    state: &SharedState,
    session_id: SessionId,
    hole_number: u8,
) -> Result<SessionStateResponse, ServiceError> {
    let session = state.session(session_id)?;
    session.discard_queued(hole_number).await?;
    Ok(session.snapshot().await)
}

/// Dismiss the early-decision notice.
pub async fn acknowledge_decision(
    state: &SharedState,
    session_id: SessionId,
) -> Result<SessionStateResponse, ServiceError> {
    let session = state.session(session_id)?;
    if session.acknowledge_decision().await.is_none() {
        debug!(session_id = %session_id, "no decision notice to acknowledge");
    }
    Ok(session.snapshot().await)
}

/// Apply the network state reported by the presentation layer.
pub fn report_connectivity(state: &SharedState, request: ConnectivityRequest) -> ConnectivityResponse {
    if state.connectivity().set_online(request.online) {
        info!(online = request.online, "network state reported");
    }
    ConnectivityResponse {
        online: state.connectivity().is_online(),
    }
}

/// Cached standings, fetched on first access.
pub async fn leaderboard(
    state: &SharedState,
    competition_id: CompetitionId,
) -> Result<Leaderboard, ServiceError> {
    state.leaderboard().get(competition_id).await
}
