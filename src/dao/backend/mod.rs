mod error;
#[cfg(feature = "http-backend")]
mod http;
mod memory;

pub use self::error::{BackendError, BackendResult};
#[cfg(feature = "http-backend")]
pub use self::http::HttpScoringBackend;
pub use self::memory::{InMemoryBackend, MatchSetup};

use futures::future::BoxFuture;

use crate::state::scoring::{
    CompetitionId, Leaderboard, MatchId, MatchSummary, ScoreSubmission, ScoringView, Team, UserId,
};

/// Abstraction over the remote scoring service.
///
/// Every call carries the acting user; how the backend authenticates that user is outside this
/// crate.
pub trait ScoringBackend: Send + Sync {
    /// Current scoring view of a match as seen by `caller`.
    fn get_scoring_view(
        &self,
        match_id: MatchId,
        caller: UserId,
    ) -> BoxFuture<'static, BackendResult<ScoringView>>;
    /// Record `caller`'s entry for a hole and return the updated view.
    fn submit_hole_score(
        &self,
        match_id: MatchId,
        caller: UserId,
        hole_number: u8,
        submission: ScoreSubmission,
    ) -> BoxFuture<'static, BackendResult<ScoringView>>;
    /// Finalize `caller`'s scorecard.
    fn submit_scorecard(
        &self,
        match_id: MatchId,
        caller: UserId,
    ) -> BoxFuture<'static, BackendResult<MatchSummary>>;
    /// Concede the match for `team`.
    fn concede_match(
        &self,
        match_id: MatchId,
        caller: UserId,
        team: Team,
        reason: Option<String>,
    ) -> BoxFuture<'static, BackendResult<ScoringView>>;
    /// Cross-match standings of a competition.
    fn get_leaderboard(
        &self,
        competition_id: CompetitionId,
    ) -> BoxFuture<'static, BackendResult<Leaderboard>>;
    /// Cheap reachability check.
    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>>;
}
