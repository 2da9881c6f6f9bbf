//! Match-play domain model mirrored from the scoring backend.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifier of a match.
pub type MatchId = Uuid;
/// Identifier of a player or marker.
pub type UserId = Uuid;
/// Identifier of a competition grouping several matches.
pub type CompetitionId = Uuid;

/// Number of holes in a full match.
pub const MAX_HOLES: u8 = 18;
/// Lowest gross score accepted for a completed hole.
pub const MIN_GROSS: u8 = 1;
/// Highest gross score accepted for a completed hole.
pub const MAX_GROSS: u8 = 9;

/// Playing format of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchFormat {
    /// One player per side.
    Singles,
    /// Two players per side, best ball counts.
    Fourball,
    /// Two players per side sharing one ball.
    Foursomes,
}

/// Lifecycle status of a match as owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// Not started yet.
    Scheduled,
    /// Being played.
    InProgress,
    /// Played out or decided early.
    Completed,
    /// Awarded without play.
    Walkover,
    /// One side gave the match up.
    Conceded,
}

impl MatchStatus {
    /// Terminal statuses accept no further scoring.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchStatus::Completed | MatchStatus::Walkover | MatchStatus::Conceded
        )
    }
}

/// Side of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Team {
    /// First side.
    A,
    /// Second side.
    B,
}

impl Team {
    /// The other side.
    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

/// Player registered on one side of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    /// Player identifier.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Side the player is on.
    pub team: Team,
    /// Handicap strokes this player receives over 18 holes.
    pub handicap_allowance: u8,
}

/// Final or early result of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DecidedResult {
    /// Winning side.
    pub winner: Team,
    /// Margin label such as `5&4`, `1UP` or `CONCEDED`.
    pub score: String,
}

/// Match header: format, status and participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchInfo {
    /// Match identifier.
    pub id: Uuid,
    /// Competition the match counts towards, if any.
    #[serde(default)]
    pub competition_id: Option<Uuid>,
    /// Playing format.
    pub format: MatchFormat,
    /// Lifecycle status.
    pub status: MatchStatus,
    /// Players of both sides.
    pub participants: Vec<Participant>,
    /// Set by the backend once the result can no longer change.
    pub is_decided: bool,
    /// Winner and margin once decided.
    #[serde(default)]
    pub decided_result: Option<DecidedResult>,
}

impl MatchInfo {
    /// Look up a participant by user id.
    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| participant.user_id == user_id)
    }

    /// Side the user plays on, if they are a participant.
    pub fn team_of(&self, user_id: UserId) -> Option<Team> {
        self.participant(user_id).map(|participant| participant.team)
    }

    /// Participants playing for `team`.
    pub fn players(&self, team: Team) -> impl Iterator<Item = &Participant> {
        self.participants
            .iter()
            .filter(move |participant| participant.team == team)
    }
}

/// Course hole definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Hole {
    /// 1-based hole number.
    pub number: u8,
    /// Par of the hole.
    pub par: u8,
    /// Difficulty rank 1..=18, 1 being the hardest hole.
    pub stroke_index: u8,
}

/// Gross result recorded for one player on one hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrossScore {
    /// Hole completed in the given number of strokes.
    Strokes(u8),
    /// Player picked up without completing the hole.
    PickedUp,
}

impl GrossScore {
    /// Build from the wire representation where `None` means "picked up".
    pub fn from_reported(value: Option<u8>) -> Self {
        match value {
            Some(strokes) => GrossScore::Strokes(strokes),
            None => GrossScore::PickedUp,
        }
    }

    /// Number of strokes, or `None` when the player picked up.
    pub fn strokes(self) -> Option<u8> {
        match self {
            GrossScore::Strokes(strokes) => Some(strokes),
            GrossScore::PickedUp => None,
        }
    }
}

/// Agreement state between the player's own report and the marker's report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// At least one report is missing.
    Pending,
    /// Both reports agree.
    Match,
    /// The reports disagree; either side must correct theirs.
    Mismatch,
}

/// Dual-entry score for one (hole, player).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlayerScore {
    /// Hole the entry belongs to.
    pub hole_number: u8,
    /// Player the entry belongs to.
    pub user_id: Uuid,
    /// Self-reported gross, `None` until the player reports.
    #[serde(default)]
    pub own_score: Option<GrossScore>,
    /// Gross reported by the assigned marker, `None` until the marker reports.
    #[serde(default)]
    pub marker_score: Option<GrossScore>,
}

impl PlayerScore {
    /// Empty entry for a (hole, player) pair.
    pub fn new(hole_number: u8, user_id: UserId) -> Self {
        Self {
            hole_number,
            user_id,
            own_score: None,
            marker_score: None,
        }
    }

    /// Derived from the current pair of reports, never stored.
    pub fn validation_status(&self) -> ValidationStatus {
        match (self.own_score, self.marker_score) {
            (Some(own), Some(marker)) if own == marker => ValidationStatus::Match,
            (Some(_), Some(_)) => ValidationStatus::Mismatch,
            _ => ValidationStatus::Pending,
        }
    }

    /// The agreed gross score once both sides match.
    pub fn validated_score(&self) -> Option<GrossScore> {
        match self.validation_status() {
            ValidationStatus::Match => self.own_score,
            _ => None,
        }
    }
}

/// Marker responsible for independently recording a player's scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MarkerAssignment {
    /// Scored player.
    pub player_id: Uuid,
    /// User recording the player's scores.
    pub marker_id: Uuid,
}

/// Winner of a single hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoleWinner {
    /// Team A won the hole.
    A,
    /// Team B won the hole.
    B,
    /// Neither side won the hole.
    Halved,
}

/// Outcome of a resolved hole with the running standing after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HoleResult {
    /// Resolved hole.
    pub hole_number: u8,
    /// Side that won it.
    pub winner: HoleWinner,
    /// Holes up for team A after this hole (negative when team B leads).
    pub running_lead: i32,
}

/// Running match standing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchStanding {
    /// `nUP` or `AS`.
    pub status: String,
    /// Side ahead, `None` when all square.
    pub leading_team: Option<Team>,
    /// Holes resolved so far.
    pub holes_played: u8,
    /// Holes not yet resolved.
    pub holes_remaining: u8,
}

impl Default for MatchStanding {
    fn default() -> Self {
        Self {
            status: "AS".into(),
            leading_team: None,
            holes_played: 0,
            holes_remaining: MAX_HOLES,
        }
    }
}

/// Recorded concession of a side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Concession {
    /// Side giving the match up.
    pub team: Team,
    /// Participant who conceded.
    pub conceded_by: Uuid,
    /// Optional note left by the conceding side.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Payload of one hole submission (`scoreData`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScoreSubmission {
    /// Own gross, `None` meaning picked up.
    pub own_score: Option<u8>,
    /// Player this submitter marks for, when the submission covers them too.
    #[serde(default)]
    pub marked_player_id: Option<Uuid>,
    /// Gross recorded for the marked player, `None` meaning picked up.
    #[serde(default)]
    pub marked_score: Option<u8>,
}

/// Full scoring view of a match as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScoringView {
    /// Match header.
    #[serde(rename = "match")]
    pub match_info: MatchInfo,
    /// Holes of the course.
    pub holes: Vec<Hole>,
    /// One entry per (hole, player) with any report.
    pub scores: Vec<PlayerScore>,
    /// Marker of each player.
    pub marker_assignments: Vec<MarkerAssignment>,
    /// Resolved holes in order.
    #[serde(default)]
    pub hole_results: Vec<HoleResult>,
    /// Running standing after the last resolved hole.
    #[serde(default)]
    pub standing: MatchStanding,
    /// Users who finalized their scorecard.
    #[serde(default)]
    pub submitted_scorecards: Vec<Uuid>,
    /// Present when the match ended by concession.
    #[serde(default)]
    pub concession: Option<Concession>,
}

/// Flags derived for one viewer of a scoring view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct DerivedFlags {
    /// Whether the viewer plays in the match.
    pub is_match_player: bool,
    /// Whether the viewer already finalized their scorecard.
    pub has_submitted: bool,
    /// Holes with a validated score for the viewer.
    pub validated_holes: u8,
    /// Holes in play, shortened by an early decision.
    pub total_holes: u8,
    /// Whether the viewer may finalize now.
    pub can_submit_scorecard: bool,
}

impl ScoringView {
    /// Whether `user_id` plays in this match.
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.match_info.participant(user_id).is_some()
    }

    /// Marker assigned to `player_id`.
    pub fn marker_for(&self, player_id: UserId) -> Option<UserId> {
        self.marker_assignments
            .iter()
            .find(|assignment| assignment.player_id == player_id)
            .map(|assignment| assignment.marker_id)
    }

    /// Hole definition by number.
    pub fn hole(&self, number: u8) -> Option<&Hole> {
        self.holes.iter().find(|hole| hole.number == number)
    }

    /// Score entry for a (hole, player) pair.
    pub fn score(&self, hole_number: u8, user_id: UserId) -> Option<&PlayerScore> {
        self.scores
            .iter()
            .find(|score| score.hole_number == hole_number && score.user_id == user_id)
    }

    /// Whether the user already finalized their scorecard.
    pub fn has_submitted(&self, user_id: UserId) -> bool {
        self.submitted_scorecards.contains(&user_id)
    }

    /// Holes in play: 18, or the decided boundary once the match is decided.
    pub fn total_holes(&self) -> u8 {
        if self.match_info.is_decided {
            self.standing.holes_played
        } else {
            MAX_HOLES
        }
    }

    /// Number of holes where the user's own entry is validated.
    pub fn validated_holes(&self, user_id: UserId) -> u8 {
        let count = self
            .scores
            .iter()
            .filter(|score| {
                score.user_id == user_id
                    && score.validation_status() == ValidationStatus::Match
            })
            .count();
        u8::try_from(count).unwrap_or(u8::MAX)
    }

    /// Compute the viewer-specific flags.
    pub fn derived_for(&self, user_id: UserId) -> DerivedFlags {
        let is_match_player = self.is_participant(user_id);
        let has_submitted = self.has_submitted(user_id);
        let validated_holes = self.validated_holes(user_id);
        let total_holes = self.total_holes();
        DerivedFlags {
            is_match_player,
            has_submitted,
            validated_holes,
            total_holes,
            can_submit_scorecard: is_match_player
                && !has_submitted
                && validated_holes >= total_holes,
        }
    }
}

/// Per-user summary returned once a scorecard is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchSummary {
    /// Finalized match.
    pub match_id: Uuid,
    /// User whose scorecard was finalized.
    pub user_id: Uuid,
    /// Decided result, or `None` when the match ended all square.
    pub result: Option<DecidedResult>,
    /// Final standing label (`AS`, `2UP`, ...).
    pub standing: String,
    /// Sum of validated gross scores.
    pub gross_total: u32,
    /// Gross total minus handicap strokes received.
    pub net_total: i32,
    /// Holes won by the user's side.
    pub holes_won: u8,
    /// Holes lost by the user's side.
    pub holes_lost: u8,
    /// Halved holes.
    pub holes_halved: u8,
    /// Holes where the user picked up.
    pub holes_picked_up: u8,
}

/// Aggregate standing of one side across a competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    /// Side the entry aggregates.
    pub team: Team,
    /// One point per win, half a point per halved match.
    pub points: f32,
    /// Matches won.
    pub won: u32,
    /// Matches halved.
    pub halved: u32,
    /// Matches lost.
    pub lost: u32,
    /// Matches still being played.
    pub in_progress: u32,
}

/// Cross-match standings of a competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Leaderboard {
    /// Competition identifier.
    pub competition_id: Uuid,
    /// Entries sorted by points.
    pub entries: Vec<LeaderboardEntry>,
}
