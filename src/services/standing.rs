//! Hole winners, running standing and early-decision detection.

use crate::state::scoring::{
    DecidedResult, GrossScore, Hole, HoleResult, HoleWinner, MAX_HOLES, MatchStanding,
    MatchStatus, MatchSummary, ScoringView, Team, UserId, ValidationStatus,
};

/// Score label recorded on a conceded match.
pub const CONCEDED_LABEL: &str = "CONCEDED";

/// Handicap strokes a player with `allowance` receives on a hole of `stroke_index`.
pub fn strokes_received(allowance: u8, stroke_index: u8) -> u8 {
    let base = allowance / MAX_HOLES;
    let extra = allowance % MAX_HOLES;
    base + u8::from(stroke_index <= extra)
}

/// Net score of a gross result; a pick-up has none.
pub fn net_score(gross: GrossScore, allowance: u8, hole: &Hole) -> Option<i32> {
    gross
        .strokes()
        .map(|strokes| i32::from(strokes) - i32::from(strokes_received(allowance, hole.stroke_index)))
}

/// Winner of `hole`, or `None` while the hole is unresolved.
pub fn hole_winner(view: &ScoringView, hole: &Hole) -> Option<HoleWinner> {
    let entries: Vec<_> = view
        .scores
        .iter()
        .filter(|score| score.hole_number == hole.number)
        .collect();

    if entries
        .iter()
        .any(|score| score.validation_status() != ValidationStatus::Match)
    {
        return None;
    }

    let team_best = |team: Team| -> Option<Option<i32>> {
        let mut validated = false;
        let mut best: Option<i32> = None;
        for player in view.match_info.players(team) {
            let Some(gross) = entries
                .iter()
                .find(|score| score.user_id == player.user_id)
                .and_then(|score| score.validated_score())
            else {
                continue;
            };
            validated = true;
            if let Some(net) = net_score(gross, player.handicap_allowance, hole) {
                best = Some(best.map_or(net, |current| current.min(net)));
            }
        }
        validated.then_some(best)
    };

    let a = team_best(Team::A)?;
    let b = team_best(Team::B)?;
    let winner = match (a, b) {
        (Some(a), Some(b)) if a < b => HoleWinner::A,
        (Some(a), Some(b)) if b < a => HoleWinner::B,
        (Some(_), None) => HoleWinner::A,
        (None, Some(_)) => HoleWinner::B,
        _ => HoleWinner::Halved,
    };
    Some(winner)
}

/// Standing label for a lead from team A's perspective.
pub fn standing_label(lead: i32) -> String {
    if lead == 0 {
        "AS".into()
    } else {
        format!("{}UP", lead.unsigned_abs())
    }
}

fn leader(lead: i32) -> Option<Team> {
    match lead {
        0 => None,
        lead if lead > 0 => Some(Team::A),
        _ => Some(Team::B),
    }
}

/// Rebuild hole results, standing and decision fields from the scores.
pub fn recompute(view: &mut ScoringView) {
    let mut results = Vec::new();
    let mut lead = 0i32;
    let mut decided = None;

    for number in 1..=MAX_HOLES {
        let Some(hole) = view.hole(number).copied() else {
            break;
        };
        let Some(winner) = hole_winner(view, &hole) else {
            break;
        };
        lead += match winner {
            HoleWinner::A => 1,
            HoleWinner::B => -1,
            HoleWinner::Halved => 0,
        };
        results.push(HoleResult {
            hole_number: number,
            winner,
            running_lead: lead,
        });

        let remaining = MAX_HOLES - number;
        let margin = lead.unsigned_abs();
        if margin > u32::from(remaining) {
            let score = if remaining > 0 {
                format!("{margin}&{remaining}")
            } else {
                format!("{margin}UP")
            };
            decided = leader(lead).map(|winner| DecidedResult { winner, score });
            break;
        }
    }

    let played = u8::try_from(results.len()).unwrap_or(MAX_HOLES);
    view.standing = MatchStanding {
        status: standing_label(lead),
        leading_team: leader(lead),
        holes_played: played,
        holes_remaining: MAX_HOLES - played,
    };
    view.hole_results = results;

    if view.match_info.status == MatchStatus::Scheduled && !view.scores.is_empty() {
        view.match_info.status = MatchStatus::InProgress;
    }

    if let Some(concession) = &view.concession {
        view.match_info.status = MatchStatus::Conceded;
        view.match_info.is_decided = true;
        view.match_info.decided_result = Some(DecidedResult {
            winner: concession.team.opponent(),
            score: CONCEDED_LABEL.into(),
        });
    } else if view.match_info.status != MatchStatus::Walkover {
        view.match_info.is_decided = decided.is_some();
        view.match_info.decided_result = decided;
    }
}

/// Summary of a finalized scorecard from `user_id`'s perspective.
pub fn match_summary(view: &ScoringView, user_id: UserId) -> MatchSummary {
    let participant = view.match_info.participant(user_id);
    let team = participant.map(|participant| participant.team);
    let allowance = participant.map_or(0, |participant| participant.handicap_allowance);

    let mut gross_total = 0u32;
    let mut net_total = 0i32;
    let mut holes_picked_up = 0u8;
    for score in view.scores.iter().filter(|score| score.user_id == user_id) {
        let (Some(gross), Some(hole)) = (score.validated_score(), view.hole(score.hole_number))
        else {
            continue;
        };
        match gross {
            GrossScore::Strokes(strokes) => {
                gross_total += u32::from(strokes);
                net_total += net_score(gross, allowance, hole).unwrap_or_default();
            }
            GrossScore::PickedUp => holes_picked_up += 1,
        }
    }

    let (mut holes_won, mut holes_lost, mut holes_halved) = (0u8, 0u8, 0u8);
    for result in &view.hole_results {
        match (result.winner, team) {
            (HoleWinner::Halved, _) => holes_halved += 1,
            (HoleWinner::A, Some(Team::A)) | (HoleWinner::B, Some(Team::B)) => holes_won += 1,
            (_, Some(_)) => holes_lost += 1,
            (_, None) => {}
        }
    }

    MatchSummary {
        match_id: view.match_info.id,
        user_id,
        result: view.match_info.decided_result.clone(),
        standing: view.standing.status.clone(),
        gross_total,
        net_total,
        holes_won,
        holes_lost,
        holes_halved,
        holes_picked_up,
    }
}
