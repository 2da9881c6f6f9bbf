use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;
use uuid::Uuid;

use super::{BackendError, BackendResult, ScoringBackend};
use crate::{
    error::ServiceError,
    services::{hole_scoring, standing},
    state::scoring::{
        CompetitionId, Concession, Hole, Leaderboard, LeaderboardEntry, MarkerAssignment,
        MatchFormat, MatchId, MatchInfo, MatchStanding, MatchStatus, MatchSummary, Participant,
        ScoreSubmission, ScoringView, Team, UserId,
    },
};

/// Par and stroke index of a standard 18-hole course.
const COURSE: [(u8, u8); 18] = [
    (4, 7),
    (5, 11),
    (3, 15),
    (4, 1),
    (4, 9),
    (3, 17),
    (5, 3),
    (4, 13),
    (4, 5),
    (4, 8),
    (3, 16),
    (5, 2),
    (4, 12),
    (4, 6),
    (3, 18),
    (4, 10),
    (5, 4),
    (4, 14),
];

/// Holes of the course used by demo matches.
pub fn standard_course() -> Vec<Hole> {
    COURSE
        .iter()
        .zip(1u8..)
        .map(|(&(par, stroke_index), number)| Hole {
            number,
            par,
            stroke_index,
        })
        .collect()
}

/// Definition of a match seeded into the in-memory backend.
#[derive(Debug, Clone)]
pub struct MatchSetup {
    /// Match identifier.
    pub id: MatchId,
    /// Competition the match belongs to.
    pub competition_id: Option<CompetitionId>,
    /// Playing format.
    pub format: MatchFormat,
    /// Players of both sides.
    pub participants: Vec<Participant>,
    /// Who marks whom; every player needs exactly one marker.
    pub marker_assignments: Vec<MarkerAssignment>,
    /// Holes in play.
    pub holes: Vec<Hole>,
}

impl MatchSetup {
    /// Singles match between two players marking each other.
    pub fn singles(player_a: Participant, player_b: Participant) -> Self {
        let marker_assignments = vec![
            MarkerAssignment {
                player_id: player_a.user_id,
                marker_id: player_b.user_id,
            },
            MarkerAssignment {
                player_id: player_b.user_id,
                marker_id: player_a.user_id,
            },
        ];
        Self {
            id: Uuid::new_v4(),
            competition_id: None,
            format: MatchFormat::Singles,
            participants: vec![player_a, player_b],
            marker_assignments,
            holes: standard_course(),
        }
    }

    /// Match served by the daemon when running against the in-memory backend.
    pub fn demo() -> Self {
        let player = |id: u128, name: &str, team, handicap_allowance| Participant {
            user_id: Uuid::from_u128(id),
            name: name.into(),
            team,
            handicap_allowance,
        };
        Self {
            id: Uuid::from_u128(0x1000),
            competition_id: Some(Uuid::from_u128(0x2000)),
            ..Self::singles(player(0xa1, "Player A1", Team::A, 4), player(0xb1, "Player B1", Team::B, 9))
        }
    }

    fn into_view(self) -> ScoringView {
        ScoringView {
            match_info: MatchInfo {
                id: self.id,
                competition_id: self.competition_id,
                format: self.format,
                status: MatchStatus::Scheduled,
                participants: self.participants,
                is_decided: false,
                decided_result: None,
            },
            holes: self.holes,
            scores: Vec::new(),
            marker_assignments: self.marker_assignments,
            hole_results: Vec::new(),
            standing: MatchStanding::default(),
            submitted_scorecards: Vec::new(),
            concession: None,
        }
    }
}

struct Inner {
    matches: DashMap<MatchId, ScoringView>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
    failing_holes: Mutex<HashSet<(MatchId, u8)>>,
    view_calls: AtomicUsize,
    submit_calls: AtomicUsize,
}

/// Scoring service kept in memory, with fault injection for tests and offline demos.
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Empty service, reachable and without latency.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                matches: DashMap::new(),
                reachable: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                failing_holes: Mutex::new(HashSet::new()),
                view_calls: AtomicUsize::new(0),
                submit_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Register a match and return its id.
    pub fn insert_match(&self, setup: MatchSetup) -> MatchId {
        let id = setup.id;
        self.inner.matches.insert(id, setup.into_view());
        id
    }

    /// Authoritative copy of a match.
    pub fn snapshot(&self, match_id: MatchId) -> Option<ScoringView> {
        self.inner.matches.get(&match_id).map(|view| view.clone())
    }

    /// Simulate losing or regaining the network.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Make submissions for one hole fail as if the network dropped.
    pub fn fail_hole(&self, match_id: MatchId, hole_number: u8) {
        self.failing_holes().insert((match_id, hole_number));
    }

    /// Undo every [`InMemoryBackend::fail_hole`].
    pub fn clear_failures(&self) {
        self.failing_holes().clear();
    }

    /// Number of `submit_hole_score` calls that reached the service.
    pub fn submit_calls(&self) -> usize {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_scoring_view` calls that reached the service.
    pub fn view_calls(&self) -> usize {
        self.inner.view_calls.load(Ordering::SeqCst)
    }

    fn failing_holes(&self) -> std::sync::MutexGuard<'_, HashSet<(MatchId, u8)>> {
        self.inner
            .failing_holes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn network(&self) -> BackendResult<()> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unreachable {
                message: "scoring service unreachable".into(),
            })
        }
    }

    fn with_match<T>(
        &self,
        match_id: MatchId,
        op: impl FnOnce(&mut ScoringView) -> Result<T, ServiceError>,
    ) -> BackendResult<T> {
        let mut view = self
            .inner
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| BackendError::rejected(404, format!("match `{match_id}` not found")))?;
        op(&mut view).map_err(to_rejection)
    }

    fn apply_score(
        &self,
        match_id: MatchId,
        caller: UserId,
        hole_number: u8,
        submission: &ScoreSubmission,
    ) -> BackendResult<ScoringView> {
        if self.failing_holes().contains(&(match_id, hole_number)) {
            return Err(BackendError::Unreachable {
                message: format!("connection reset while submitting hole {hole_number}"),
            });
        }

        self.with_match(match_id, |view| {
            hole_scoring::check_submission(view, caller, hole_number, submission)?;
            hole_scoring::apply_submission(view, caller, hole_number, submission);
            standing::recompute(view);
            debug!(match_id = %match_id, hole_number, "hole score stored");
            Ok(view.clone())
        })
    }

    fn finalize_scorecard(&self, match_id: MatchId, caller: UserId) -> BackendResult<MatchSummary> {
        self.with_match(match_id, |view| {
            if !view.is_participant(caller) {
                return Err(ServiceError::Forbidden(
                    "only match participants can submit a scorecard".into(),
                ));
            }
            if view.has_submitted(caller) {
                return Err(ServiceError::InvalidState(
                    "scorecard already submitted for this match".into(),
                ));
            }
            let flags = view.derived_for(caller);
            if !view.match_info.status.is_terminal() && flags.validated_holes < flags.total_holes {
                return Err(ServiceError::InvalidState(format!(
                    "{} of {} holes validated",
                    flags.validated_holes, flags.total_holes
                )));
            }

            view.submitted_scorecards.push(caller);
            let everyone_done = view
                .match_info
                .participants
                .iter()
                .all(|participant| view.submitted_scorecards.contains(&participant.user_id));
            if everyone_done && !view.match_info.status.is_terminal() {
                view.match_info.status = MatchStatus::Completed;
            }
            Ok(standing::match_summary(view, caller))
        })
    }

    fn concede(
        &self,
        match_id: MatchId,
        caller: UserId,
        team: Team,
        reason: Option<String>,
    ) -> BackendResult<ScoringView> {
        self.with_match(match_id, |view| {
            if view.match_info.team_of(caller) != Some(team) {
                return Err(ServiceError::Forbidden(
                    "only a player of the conceding team can concede".into(),
                ));
            }
            if view.match_info.status.is_terminal() {
                return Err(ServiceError::InvalidState(
                    "match is already finished".into(),
                ));
            }
            view.concession = Some(Concession {
                team,
                conceded_by: caller,
                reason,
            });
            standing::recompute(view);
            Ok(view.clone())
        })
    }

    fn leaderboard(&self, competition_id: CompetitionId) -> BackendResult<Leaderboard> {
        let mut entries = [Team::A, Team::B].map(|team| LeaderboardEntry {
            team,
            points: 0.0,
            won: 0,
            halved: 0,
            lost: 0,
            in_progress: 0,
        });
        let mut found = false;

        for view in self.inner.matches.iter() {
            if view.match_info.competition_id != Some(competition_id) {
                continue;
            }
            found = true;
            let info = &view.match_info;
            match (&info.decided_result, info.status) {
                (Some(result), _) => {
                    let (winner, loser) = match result.winner {
                        Team::A => (0, 1),
                        Team::B => (1, 0),
                    };
                    entries[winner].won += 1;
                    entries[loser].lost += 1;
                }
                (None, MatchStatus::Completed) => {
                    entries.iter_mut().for_each(|entry| entry.halved += 1);
                }
                (None, _) => entries.iter_mut().for_each(|entry| entry.in_progress += 1),
            }
        }

        if !found {
            return Err(BackendError::rejected(
                404,
                format!("competition `{competition_id}` not found"),
            ));
        }

        for entry in &mut entries {
            entry.points = entry.won as f32 + entry.halved as f32 * 0.5;
        }
        Ok(Leaderboard {
            competition_id,
            entries: entries.into(),
        })
    }
}

fn to_rejection(err: ServiceError) -> BackendError {
    let status = match &err {
        ServiceError::InvalidInput(_) => 422,
        ServiceError::Forbidden(_) => 403,
        ServiceError::NotFound(_) => 404,
        ServiceError::InvalidState(_) | ServiceError::SessionConflict { .. } => 409,
        _ => 500,
    };
    let message = match err {
        ServiceError::InvalidInput(message)
        | ServiceError::Forbidden(message)
        | ServiceError::NotFound(message)
        | ServiceError::InvalidState(message) => message,
        other => other.to_string(),
    };
    BackendError::rejected(status, message)
}

impl ScoringBackend for InMemoryBackend {
    fn get_scoring_view(
        &self,
        match_id: MatchId,
        _caller: UserId,
    ) -> BoxFuture<'static, BackendResult<ScoringView>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.network().await?;
            backend.inner.view_calls.fetch_add(1, Ordering::SeqCst);
            backend
                .snapshot(match_id)
                .ok_or_else(|| BackendError::rejected(404, format!("match `{match_id}` not found")))
        })
    }

    fn submit_hole_score(
        &self,
        match_id: MatchId,
        caller: UserId,
        hole_number: u8,
        submission: ScoreSubmission,
    ) -> BoxFuture<'static, BackendResult<ScoringView>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.network().await?;
            backend.inner.submit_calls.fetch_add(1, Ordering::SeqCst);
            backend.apply_score(match_id, caller, hole_number, &submission)
        })
    }

    fn submit_scorecard(
        &self,
        match_id: MatchId,
        caller: UserId,
    ) -> BoxFuture<'static, BackendResult<MatchSummary>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.network().await?;
            backend.finalize_scorecard(match_id, caller)
        })
    }

    fn concede_match(
        &self,
        match_id: MatchId,
        caller: UserId,
        team: Team,
        reason: Option<String>,
    ) -> BoxFuture<'static, BackendResult<ScoringView>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.network().await?;
            backend.concede(match_id, caller, team, reason)
        })
    }

    fn get_leaderboard(
        &self,
        competition_id: CompetitionId,
    ) -> BoxFuture<'static, BackendResult<Leaderboard>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.network().await?;
            backend.leaderboard(competition_id)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>> {
        let backend = self.clone();
        Box::pin(async move { backend.network().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::scoring::ValidationStatus;

    fn setup() -> (InMemoryBackend, MatchSetup) {
        let backend = InMemoryBackend::new();
        let setup = MatchSetup::demo();
        backend.insert_match(setup.clone());
        (backend, setup)
    }

    fn players(setup: &MatchSetup) -> (UserId, UserId) {
        (setup.participants[0].user_id, setup.participants[1].user_id)
    }

    fn both_sides(own: u8, marked_player: UserId, marked: u8) -> ScoreSubmission {
        ScoreSubmission {
            own_score: Some(own),
            marked_player_id: Some(marked_player),
            marked_score: Some(marked),
        }
    }

    #[test]
    fn standard_course_is_a_stroke_index_permutation() {
        let mut indexes: Vec<_> = standard_course().iter().map(|hole| hole.stroke_index).collect();
        indexes.sort_unstable();
        assert_eq!(indexes, (1..=18).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn submissions_validate_through_the_marker() {
        let (backend, setup) = setup();
        let (a, b) = players(&setup);

        let view = backend
            .submit_hole_score(setup.id, a, 1, both_sides(4, b, 5))
            .await
            .unwrap();
        assert_eq!(view.match_info.status, MatchStatus::InProgress);
        assert_eq!(
            view.score(1, a).unwrap().validation_status(),
            ValidationStatus::Pending
        );

        let view = backend
            .submit_hole_score(setup.id, b, 1, both_sides(5, a, 4))
            .await
            .unwrap();
        assert_eq!(
            view.score(1, a).unwrap().validation_status(),
            ValidationStatus::Match
        );
        assert_eq!(view.hole_results.len(), 1);
        assert_eq!(backend.submit_calls(), 2);
    }

    #[tokio::test]
    async fn rule_violations_map_to_client_statuses() {
        let (backend, setup) = setup();
        let (a, _) = players(&setup);

        let err = backend
            .submit_hole_score(setup.id, Uuid::new_v4(), 1, both_sides(4, a, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 403, .. }));

        let err = backend
            .concede_match(setup.id, a, Team::B, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 403, .. }));

        let err = backend.submit_scorecard(setup.id, a).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn fault_injection_is_transient() {
        let (backend, setup) = setup();
        let (a, b) = players(&setup);

        backend.fail_hole(setup.id, 2);
        let err = backend
            .submit_hole_score(setup.id, a, 2, both_sides(4, b, 4))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        backend.clear_failures();
        backend.set_reachable(false);
        assert!(backend.health_check().await.unwrap_err().is_transient());
        backend.set_reachable(true);
        assert!(backend.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn concession_finishes_match_and_feeds_leaderboard() {
        let (backend, setup) = setup();
        let (a, _) = players(&setup);

        let view = backend
            .concede_match(setup.id, a, Team::A, Some("weather".into()))
            .await
            .unwrap();
        assert_eq!(view.match_info.status, MatchStatus::Conceded);

        let competition = setup.competition_id.unwrap();
        let leaderboard = backend.get_leaderboard(competition).await.unwrap();
        let team_b = &leaderboard.entries[1];
        assert_eq!((team_b.team, team_b.won), (Team::B, 1));
        assert_eq!(team_b.points, 1.0);

        // Conceded matches accept a scorecard without validated holes.
        let summary = backend.submit_scorecard(setup.id, a).await.unwrap();
        assert_eq!(summary.result.unwrap().winner, Team::B);
    }
}
