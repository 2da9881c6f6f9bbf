use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health and connectivity payloads.
pub mod health;
/// Coarse phase exposed to clients.
pub mod phase;
/// Session requests and state.
pub mod session;
/// SSE event payloads.
pub mod sse;
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
