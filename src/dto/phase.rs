use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::ScoringPhase;

/// Session phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisiblePhase {
    /// Nothing fetched yet.
    Idle,
    /// Initial fetch in flight.
    Loading,
    /// A confirmed scoring view is shown.
    Loaded,
    /// A submission is in flight.
    Submitting,
    /// The last call failed; see `error`.
    Error,
    /// Session torn down.
    Closed,
}

impl From<&ScoringPhase> for VisiblePhase {
    fn from(value: &ScoringPhase) -> Self {
        match value {
            ScoringPhase::Idle => VisiblePhase::Idle,
            ScoringPhase::Loading => VisiblePhase::Loading,
            ScoringPhase::Loaded(_) => VisiblePhase::Loaded,
            ScoringPhase::Submitting(_) => VisiblePhase::Submitting,
            ScoringPhase::Error(_) => VisiblePhase::Error,
            ScoringPhase::Closed => VisiblePhase::Closed,
        }
    }
}
