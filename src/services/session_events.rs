use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        session::SessionStateResponse,
        sse::{
            ConnectivityChangedEvent, ErrorEvent, MatchDecidedEvent, QueueChangedEvent,
            ServerEvent, SessionBlockedEvent, SessionUnblockedEvent,
        },
    },
    services::offline_queue::ReplayReport,
    state::{bus::EventBus, scoring::DecidedResult, state_machine::ErrorKind},
};

/// Full session state changed.
pub const EVENT_VIEW_UPDATED: &str = "view.updated";
/// Offline queue size or replay outcome.
pub const EVENT_QUEUE_CHANGED: &str = "queue.changed";
/// Another session took the scoring lock.
pub const EVENT_SESSION_BLOCKED: &str = "session.blocked";
/// The session holds the scoring lock again.
pub const EVENT_SESSION_UNBLOCKED: &str = "session.unblocked";
/// The match was decided before its last hole.
pub const EVENT_MATCH_DECIDED: &str = "match.decided";
/// Effective connectivity flipped.
pub const EVENT_CONNECTIVITY_CHANGED: &str = "connectivity.changed";
/// A use-case call failed.
pub const EVENT_ERROR: &str = "error";

/// Broadcast the full session state after a view or local state change.
pub fn broadcast_view_updated(bus: &EventBus<ServerEvent>, state: &SessionStateResponse) {
    send_event(bus, EVENT_VIEW_UPDATED, state);
}

/// Broadcast the new queue size of a match.
pub fn broadcast_queue_changed(bus: &EventBus<ServerEvent>, match_id: Uuid, pending: usize) {
    let payload = QueueChangedEvent {
        match_id,
        pending_queue_size: pending,
        replayed: None,
        halted_on_hole: None,
    };
    send_event(bus, EVENT_QUEUE_CHANGED, &payload);
}

/// Broadcast the outcome of a queue replay.
pub fn broadcast_replay(bus: &EventBus<ServerEvent>, match_id: Uuid, report: &ReplayReport) {
    let payload = QueueChangedEvent {
        match_id,
        pending_queue_size: report.remaining,
        replayed: Some(report.replayed),
        halted_on_hole: report.halted_on,
    };
    send_event(bus, EVENT_QUEUE_CHANGED, &payload);
}

/// Broadcast that another session holds the lock.
pub fn broadcast_session_blocked(
    bus: &EventBus<ServerEvent>,
    match_id: Uuid,
    holder_session_id: Option<Uuid>,
) {
    let payload = SessionBlockedEvent {
        match_id,
        holder_session_id,
    };
    send_event(bus, EVENT_SESSION_BLOCKED, &payload);
}

/// Broadcast that the session holds the lock again.
pub fn broadcast_session_unblocked(bus: &EventBus<ServerEvent>, match_id: Uuid) {
    send_event(bus, EVENT_SESSION_UNBLOCKED, &SessionUnblockedEvent { match_id });
}

/// Broadcast an early decision the session has not announced yet.
pub fn broadcast_match_decided(
    bus: &EventBus<ServerEvent>,
    match_id: Uuid,
    result: DecidedResult,
    total_holes: u8,
) {
    let payload = MatchDecidedEvent {
        match_id,
        result,
        total_holes,
    };
    send_event(bus, EVENT_MATCH_DECIDED, &payload);
}

/// Broadcast a connectivity flip.
pub fn broadcast_connectivity_changed(bus: &EventBus<ServerEvent>, online: bool) {
    send_event(
        bus,
        EVENT_CONNECTIVITY_CHANGED,
        &ConnectivityChangedEvent { online },
    );
}

/// Broadcast a failed use-case call.
pub fn broadcast_error(bus: &EventBus<ServerEvent>, kind: ErrorKind, message: &str) {
    let payload = ErrorEvent {
        kind,
        message: message.to_string(),
    };
    send_event(bus, EVENT_ERROR, &payload);
}

fn send_event(bus: &EventBus<ServerEvent>, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => bus.publish(event),
        Err(err) => warn!(event, error = %err, "failed to serialize session SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_carry_their_name_and_json_payload() {
        let bus = EventBus::new(4);
        let mut receiver = bus.subscribe();
        let match_id = Uuid::new_v4();

        broadcast_queue_changed(&bus, match_id, 2);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event.as_deref(), Some(EVENT_QUEUE_CHANGED));
        let payload: serde_json::Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(payload["pending_queue_size"], 2);
        assert!(payload.get("replayed").is_none());
    }
}
