use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::scoring::ScoringView;

/// Category of a failed use-case call, as surfaced on the session's `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Backend unreachable or timed out.
    Network,
    /// Business rule or input validation failure.
    Validation,
    /// Another session holds the scoring lock.
    SessionConflict,
    /// Local storage could not be written.
    Storage,
}

/// Failure recorded by the state machine, keeping the last confirmed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure category.
    pub kind: ErrorKind,
    /// Description shown to the user.
    pub message: String,
    /// Last view confirmed by the backend before the failure, if any.
    pub view: Option<Arc<ScoringView>>,
}

/// Phases of a scoring session's view of the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringPhase {
    /// Nothing fetched yet.
    Idle,
    /// Initial fetch in flight.
    Loading,
    /// A confirmed view is available.
    Loaded(Arc<ScoringView>),
    /// A submission is in flight on top of the given view.
    Submitting(Arc<ScoringView>),
    /// The last call failed.
    Error(Failure),
    /// The session was torn down; late results are discarded.
    Closed,
}

impl ScoringPhase {
    /// Most recent confirmed view, whatever the phase.
    pub fn view(&self) -> Option<&Arc<ScoringView>> {
        match self {
            ScoringPhase::Loaded(view) | ScoringPhase::Submitting(view) => Some(view),
            ScoringPhase::Error(failure) => failure.view.as_ref(),
            ScoringPhase::Idle | ScoringPhase::Loading | ScoringPhase::Closed => None,
        }
    }

    /// Whether the initial load is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, ScoringPhase::Loading)
    }

    /// Whether a submission is in flight.
    pub fn is_submitting(&self) -> bool {
        matches!(self, ScoringPhase::Submitting(_))
    }

    /// Failure recorded by the last call, if still current.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ScoringPhase::Error(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringEvent {
    /// A fetch (initial load, poll or refetch) started.
    FetchStarted,
    /// A fetch returned a view.
    Fetched(Arc<ScoringView>),
    /// A submission (hole score, scorecard, concession) started.
    SubmitStarted,
    /// A submission was confirmed with the given view.
    Submitted(Arc<ScoringView>),
    /// A submission was accepted locally (queued) without a new view.
    SubmitDeferred,
    /// A call failed.
    Failed { kind: ErrorKind, message: String },
    /// The session is being torn down.
    TornDown,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: ScoringPhase,
    /// The event that cannot be applied from this phase.
    pub event: ScoringEvent,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Phase at the time of the snapshot.
    pub phase: ScoringPhase,
    /// Increments on each applied transition.
    pub version: usize,
}

/// Tagged-union view state of a scoring session.
#[derive(Debug, Clone)]
pub struct ScoringStateMachine {
    phase: ScoringPhase,
    version: usize,
}

impl Default for ScoringStateMachine {
    fn default() -> Self {
        Self {
            phase: ScoringPhase::Idle,
            version: 0,
        }
    }
}

impl ScoringStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> &ScoringPhase {
        &self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Copy the current phase with its version.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase.clone(),
            version: self.version,
        }
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: ScoringEvent) -> Result<&ScoringPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        if next != self.phase {
            self.phase = next;
            self.version += 1;
        }
        Ok(&self.phase)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: ScoringEvent) -> Result<ScoringPhase, InvalidTransition> {
        let next = match (&self.phase, event) {
            (ScoringPhase::Closed, event) => {
                return Err(InvalidTransition {
                    from: ScoringPhase::Closed,
                    event,
                });
            }
            (_, ScoringEvent::TornDown) => ScoringPhase::Closed,

            (ScoringPhase::Idle, ScoringEvent::FetchStarted) => ScoringPhase::Loading,
            (ScoringPhase::Error(Failure { view: None, .. }), ScoringEvent::FetchStarted) => {
                ScoringPhase::Loading
            }
            // Background refresh keeps the current phase.
            (
                phase @ (ScoringPhase::Loading
                | ScoringPhase::Loaded(_)
                | ScoringPhase::Submitting(_)
                | ScoringPhase::Error(_)),
                ScoringEvent::FetchStarted,
            ) => phase.clone(),

            (
                ScoringPhase::Loading | ScoringPhase::Loaded(_) | ScoringPhase::Error(_),
                ScoringEvent::Fetched(view),
            ) => ScoringPhase::Loaded(view),
            (ScoringPhase::Submitting(_), ScoringEvent::Fetched(view)) => {
                ScoringPhase::Submitting(view)
            }

            (ScoringPhase::Loaded(view), ScoringEvent::SubmitStarted) => {
                ScoringPhase::Submitting(view.clone())
            }
            (
                ScoringPhase::Error(Failure {
                    view: Some(view), ..
                }),
                ScoringEvent::SubmitStarted,
            ) => ScoringPhase::Submitting(view.clone()),

            (ScoringPhase::Submitting(_), ScoringEvent::Submitted(view)) => {
                ScoringPhase::Loaded(view)
            }
            (ScoringPhase::Submitting(view), ScoringEvent::SubmitDeferred) => {
                ScoringPhase::Loaded(view.clone())
            }

            (phase, ScoringEvent::Failed { kind, message }) => ScoringPhase::Error(Failure {
                kind,
                message,
                view: phase.view().cloned(),
            }),

            (from, event) => {
                return Err(InvalidTransition {
                    from: from.clone(),
                    event,
                });
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::state::scoring::{
        MatchFormat, MatchInfo, MatchStanding, MatchStatus, ScoringView,
    };

    fn view() -> Arc<ScoringView> {
        Arc::new(ScoringView {
            match_info: MatchInfo {
                id: Uuid::new_v4(),
                competition_id: None,
                format: MatchFormat::Singles,
                status: MatchStatus::InProgress,
                participants: Vec::new(),
                is_decided: false,
                decided_result: None,
            },
            holes: Vec::new(),
            scores: Vec::new(),
            marker_assignments: Vec::new(),
            hole_results: Vec::new(),
            standing: MatchStanding::default(),
            submitted_scorecards: Vec::new(),
            concession: None,
        })
    }

    fn apply(sm: &mut ScoringStateMachine, event: ScoringEvent) -> ScoringPhase {
        sm.apply(event).unwrap().clone()
    }

    fn failed(kind: ErrorKind) -> ScoringEvent {
        ScoringEvent::Failed {
            kind,
            message: "boom".into(),
        }
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = ScoringStateMachine::new();
        assert_eq!(sm.phase(), &ScoringPhase::Idle);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn load_then_submit_happy_path() {
        let mut sm = ScoringStateMachine::new();
        let first = view();
        let second = view();

        assert_eq!(apply(&mut sm, ScoringEvent::FetchStarted), ScoringPhase::Loading);
        assert_eq!(
            apply(&mut sm, ScoringEvent::Fetched(first.clone())),
            ScoringPhase::Loaded(first.clone())
        );
        assert_eq!(
            apply(&mut sm, ScoringEvent::SubmitStarted),
            ScoringPhase::Submitting(first)
        );
        assert_eq!(
            apply(&mut sm, ScoringEvent::Submitted(second.clone())),
            ScoringPhase::Loaded(second)
        );
        assert_eq!(sm.version(), 4);
    }

    #[test]
    fn poll_response_during_submit_keeps_submitting() {
        let mut sm = ScoringStateMachine::new();
        apply(&mut sm, ScoringEvent::FetchStarted);
        apply(&mut sm, ScoringEvent::Fetched(view()));
        apply(&mut sm, ScoringEvent::SubmitStarted);

        let polled = view();
        assert_eq!(
            apply(&mut sm, ScoringEvent::Fetched(polled.clone())),
            ScoringPhase::Submitting(polled)
        );
    }

    #[test]
    fn failure_keeps_last_confirmed_view_and_clears_on_success() {
        let mut sm = ScoringStateMachine::new();
        let confirmed = view();
        apply(&mut sm, ScoringEvent::FetchStarted);
        apply(&mut sm, ScoringEvent::Fetched(confirmed.clone()));
        apply(&mut sm, ScoringEvent::SubmitStarted);

        let phase = apply(&mut sm, failed(ErrorKind::Validation));
        let failure = phase.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Validation);
        assert_eq!(failure.view.as_ref(), Some(&confirmed));

        let refreshed = view();
        assert_eq!(
            apply(&mut sm, ScoringEvent::Fetched(refreshed.clone())),
            ScoringPhase::Loaded(refreshed)
        );
    }

    #[test]
    fn deferred_submit_returns_to_loaded() {
        let mut sm = ScoringStateMachine::new();
        let confirmed = view();
        apply(&mut sm, ScoringEvent::FetchStarted);
        apply(&mut sm, ScoringEvent::Fetched(confirmed.clone()));
        apply(&mut sm, ScoringEvent::SubmitStarted);
        assert_eq!(
            apply(&mut sm, ScoringEvent::SubmitDeferred),
            ScoringPhase::Loaded(confirmed)
        );
    }

    #[test]
    fn submit_requires_a_view() {
        let mut sm = ScoringStateMachine::new();
        let err = sm.apply(ScoringEvent::SubmitStarted).unwrap_err();
        assert_eq!(err.from, ScoringPhase::Idle);
        assert_eq!(err.event, ScoringEvent::SubmitStarted);
    }

    #[test]
    fn results_after_teardown_are_rejected() {
        let mut sm = ScoringStateMachine::new();
        apply(&mut sm, ScoringEvent::FetchStarted);
        assert_eq!(apply(&mut sm, ScoringEvent::TornDown), ScoringPhase::Closed);

        let err = sm.apply(ScoringEvent::Fetched(view())).unwrap_err();
        assert_eq!(err.from, ScoringPhase::Closed);
        assert_eq!(sm.phase(), &ScoringPhase::Closed);
    }

    #[test]
    fn background_refresh_does_not_bump_version() {
        let mut sm = ScoringStateMachine::new();
        apply(&mut sm, ScoringEvent::FetchStarted);
        apply(&mut sm, ScoringEvent::Fetched(view()));
        let version = sm.version();
        apply(&mut sm, ScoringEvent::FetchStarted);
        assert_eq!(sm.version(), version);
    }
}
