use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    services::{session_events::EVENT_VIEW_UPDATED, session_lock::SessionId},
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to a session's stream.
///
/// Returns the receiver and the events only this client gets before the live ones: a handshake
/// and the current session state.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: SessionId,
) -> Result<(broadcast::Receiver<ServerEvent>, Vec<ServerEvent>), ServiceError> {
    let session = state.session(session_id)?;
    let receiver = session.subscribe();

    let mut preamble = Vec::with_capacity(2);
    let handshake = Handshake {
        session_id,
        match_id: session.match_id(),
        message: "session stream connected".into(),
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &handshake) {
        Ok(event) => preamble.push(event),
        Err(err) => warn!(error = %err, "failed to serialize SSE handshake"),
    }
    match ServerEvent::json(
        Some(EVENT_VIEW_UPDATED.to_string()),
        &session.snapshot().await,
    ) {
        Ok(event) => preamble.push(event),
        Err(err) => warn!(error = %err, "failed to serialize session state"),
    }
    Ok((receiver, preamble))
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a broadcast receiver into an SSE response, forwarding events until the client
/// disconnects or the session closes.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    preamble: Vec<ServerEvent>,
    session_id: SessionId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        for payload in preamble {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages but keep the stream alive.
                            continue;
                        }
                    }
                }
            }
        }

        info!(session_id = %session_id, "session SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
