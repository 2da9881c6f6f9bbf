use serde::{Deserialize, Serialize};

use crate::state::scoring::{MatchId, ScoreSubmission, UserId};

/// Unsent hole submission kept in the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Match the score belongs to.
    pub match_id: MatchId,
    /// User who entered the score; replays are sent on their behalf.
    pub user_id: UserId,
    /// 1-based hole number.
    pub hole_number: u8,
    /// Payload sent to the backend.
    pub score_data: ScoreSubmission,
    /// Unix milliseconds of the local intent.
    pub timestamp: i64,
}

/// Identity of a queued intent: one per (match, submitter, hole).
pub type QueueKey = (MatchId, UserId, u8);

impl QueueEntry {
    /// Unique key of the entry.
    pub fn key(&self) -> QueueKey {
        (self.match_id, self.user_id, self.hole_number)
    }
}

/// Holder of the scoring lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLockRecord {
    /// Match the holder is scoring.
    pub match_id: MatchId,
    /// Holding session.
    pub session_id: uuid::Uuid,
    /// Unix milliseconds of acquisition or last heartbeat.
    pub timestamp: i64,
}
