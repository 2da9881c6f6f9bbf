use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{phase::VisiblePhase, validation::validate_concession_reason},
    state::{
        scoring::{
            DecidedResult, DerivedFlags, MAX_GROSS, MAX_HOLES, MIN_GROSS, MatchSummary,
            ScoreSubmission, ScoringView,
        },
        state_machine::ErrorKind,
    },
};

/// Payload used to open a scoring session on a match.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OpenSessionRequest {
    /// Match to score.
    pub match_id: Uuid,
    /// Acting user; identity transport is handled upstream.
    pub user_id: Uuid,
}

/// Identifier returned when a session is opened.
#[derive(Debug, Serialize, ToSchema)]
pub struct OpenSessionResponse {
    /// Identifier of the new session.
    pub session_id: Uuid,
    /// State right after opening.
    pub state: SessionStateResponse,
}

/// Hole score submitted by the session's user.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitScoreRequest {
    /// 1-based hole number.
    #[validate(range(min = 1, max = MAX_HOLES))]
    pub hole_number: u8,
    /// Own gross; `null` when the player picked up.
    #[validate(range(min = MIN_GROSS, max = MAX_GROSS))]
    pub own_score: Option<u8>,
    /// Player the user marks for, when the submission covers them too.
    #[serde(default)]
    pub marked_player_id: Option<Uuid>,
    /// Gross recorded for the marked player; `null` when they picked up.
    #[serde(default)]
    #[validate(range(min = MIN_GROSS, max = MAX_GROSS))]
    pub marked_score: Option<u8>,
}

impl SubmitScoreRequest {
    /// Split into hole number and backend payload.
    pub fn into_parts(self) -> (u8, ScoreSubmission) {
        (
            self.hole_number,
            ScoreSubmission {
                own_score: self.own_score,
                marked_player_id: self.marked_player_id,
                marked_score: self.marked_score,
            },
        )
    }
}

/// Whether a submission reached the backend or waits in the offline queue.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted by the backend.
    Confirmed,
    /// Waiting in the offline queue.
    Queued,
}

/// Result of a hole submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitScoreResponse {
    /// Whether the score was confirmed or queued.
    pub outcome: SubmitOutcome,
    /// Session state after the submission.
    pub state: SessionStateResponse,
}

/// New position of the hole cursor.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetCurrentHoleRequest {
    /// 1-based hole number.
    #[validate(range(min = 1, max = MAX_HOLES))]
    pub hole_number: u8,
}

/// Concession of the user's team.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct ConcedeRequest {
    /// Optional note stored with the concession.
    #[serde(default)]
    #[validate(custom(function = "validate_concession_reason"))]
    pub reason: Option<String>,
}

/// Failure of the last call, cleared by the next successful one.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionErrorPayload {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Read state of a scoring session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionStateResponse {
    /// Session identifier.
    pub session_id: Uuid,
    /// Match being scored.
    pub match_id: Uuid,
    /// User acting through the session.
    pub user_id: Uuid,
    /// Coarse phase of the view.
    pub phase: VisiblePhase,
    /// Last view confirmed by the backend.
    pub scoring_view: Option<ScoringView>,
    /// Hole the user is scoring.
    pub current_hole: u8,
    /// Whether the initial load is in flight.
    pub is_loading: bool,
    /// Whether a submission is in flight.
    pub is_submitting: bool,
    /// Failure of the last call, if any.
    pub error: Option<SessionErrorPayload>,
    /// Summary of a finalized scorecard.
    pub match_summary: Option<MatchSummary>,
    /// Whether the backend is considered unreachable.
    pub is_offline: bool,
    /// Whether another session holds the scoring lock.
    pub is_session_blocked: bool,
    /// Queued submissions of the user for this match.
    pub pending_queue_size: usize,
    /// Flags derived for the session's user; absent until a view is loaded.
    pub derived: Option<DerivedFlags>,
    /// Early decision waiting for acknowledgement.
    pub decision_notice: Option<DecidedResult>,
    /// RFC 3339 time the snapshot was taken.
    pub updated_at: String,
}
