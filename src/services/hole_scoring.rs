//! Dual-entry hole scoring rules shared by the session and the in-memory backend.

use crate::{
    error::ServiceError,
    state::scoring::{
        GrossScore, MAX_GROSS, MAX_HOLES, MIN_GROSS, PlayerScore, ScoreSubmission, ScoringView,
        UserId,
    },
};

/// Check the parts of a submission that do not depend on the match state.
///
/// `total_holes` is the decided boundary when a view is known, [`MAX_HOLES`] otherwise.
pub fn check_ranges(
    hole_number: u8,
    total_holes: u8,
    submission: &ScoreSubmission,
) -> Result<(), ServiceError> {
    if hole_number == 0 || hole_number > MAX_HOLES {
        return Err(ServiceError::InvalidInput(format!(
            "hole {hole_number} is outside 1..={MAX_HOLES}"
        )));
    }
    if hole_number > total_holes {
        return Err(ServiceError::InvalidState(format!(
            "match was decided after hole {total_holes}; hole {hole_number} can no longer be scored"
        )));
    }

    check_gross("ownScore", submission.own_score)?;
    check_gross("markedScore", submission.marked_score)?;

    if submission.marked_player_id.is_none() && submission.marked_score.is_some() {
        return Err(ServiceError::InvalidInput(
            "markedScore requires markedPlayerId".into(),
        ));
    }

    Ok(())
}

fn check_gross(field: &str, value: Option<u8>) -> Result<(), ServiceError> {
    match value {
        Some(strokes) if !(MIN_GROSS..=MAX_GROSS).contains(&strokes) => {
            Err(ServiceError::InvalidInput(format!(
                "{field} must be between {MIN_GROSS} and {MAX_GROSS} or null, got {strokes}"
            )))
        }
        _ => Ok(()),
    }
}

/// Validate a submission by `caller` for `hole_number` against the current view.
pub fn check_submission(
    view: &ScoringView,
    caller: UserId,
    hole_number: u8,
    submission: &ScoreSubmission,
) -> Result<(), ServiceError> {
    let status = view.match_info.status;
    if status.is_terminal() {
        return Err(ServiceError::InvalidState(format!(
            "match is {status:?} and accepts no further scores"
        )));
    }

    check_ranges(hole_number, view.total_holes(), submission)?;

    if !view.is_participant(caller) {
        return Err(ServiceError::Forbidden(
            "only match participants can submit scores".into(),
        ));
    }
    if view.has_submitted(caller) {
        return Err(ServiceError::InvalidState(
            "scorecard already submitted for this match".into(),
        ));
    }

    if let Some(marked) = submission.marked_player_id {
        if marked == caller {
            return Err(ServiceError::InvalidInput(
                "a player cannot mark their own score".into(),
            ));
        }
        if !view.is_participant(marked) {
            return Err(ServiceError::InvalidInput(format!(
                "marked player {marked} does not play in this match"
            )));
        }
        if view.marker_for(marked) != Some(caller) {
            return Err(ServiceError::Forbidden(format!(
                "caller is not the assigned marker of {marked}"
            )));
        }
    }

    Ok(())
}

/// Upsert the entries touched by an accepted submission.
///
/// The caller's own entry always receives `ownScore`; the marked player's entry receives
/// `markedScore` as its marker side.
pub fn apply_submission(
    view: &mut ScoringView,
    caller: UserId,
    hole_number: u8,
    submission: &ScoreSubmission,
) {
    entry_mut(view, hole_number, caller).own_score =
        Some(GrossScore::from_reported(submission.own_score));

    if let Some(marked) = submission.marked_player_id {
        entry_mut(view, hole_number, marked).marker_score =
            Some(GrossScore::from_reported(submission.marked_score));
    }
}

fn entry_mut(view: &mut ScoringView, hole_number: u8, user_id: UserId) -> &mut PlayerScore {
    let position = view
        .scores
        .iter()
        .position(|score| score.hole_number == hole_number && score.user_id == user_id);
    match position {
        Some(index) => &mut view.scores[index],
        None => {
            view.scores.push(PlayerScore::new(hole_number, user_id));
            let last = view.scores.len() - 1;
            &mut view.scores[last]
        }
    }
}
