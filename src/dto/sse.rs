use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{scoring::DecidedResult, state_machine::ErrorKind};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// Optional SSE event name.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Subscribed session.
    pub session_id: Uuid,
    /// Match the session scores.
    pub match_id: Uuid,
    /// Human-readable message confirming the subscription.
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the offline queue of the session's match changes.
pub struct QueueChangedEvent {
    /// Match whose queue changed.
    pub match_id: Uuid,
    /// Entries still queued.
    pub pending_queue_size: usize,
    /// Entries confirmed during the replay that triggered this event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed: Option<usize>,
    /// Hole whose replay failed, leaving it and later holes queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_on_hole: Option<u8>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when another session holds the scoring lock.
pub struct SessionBlockedEvent {
    /// Match the session scores.
    pub match_id: Uuid,
    /// Session currently holding the lock, when known.
    pub holder_session_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the session holds the scoring lock again.
pub struct SessionUnblockedEvent {
    /// Match the session scores.
    pub match_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once when the session first observes the match as decided.
pub struct MatchDecidedEvent {
    /// Decided match.
    pub match_id: Uuid,
    /// Winner and margin.
    pub result: DecidedResult,
    /// Holes the match was scheduled for.
    pub total_holes: u8,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the effective connectivity flips.
pub struct ConnectivityChangedEvent {
    /// Effective connectivity.
    pub online: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a use-case call fails.
pub struct ErrorEvent {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}
