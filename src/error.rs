use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::{backend::BackendError, storage::StorageError},
    state::state_machine::ErrorKind,
};

/// Errors that can occur in scoring use cases.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Local storage could not be read or written.
    #[error("local storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Backend unreachable; the call may succeed later.
    #[error("backend unreachable: {0}")]
    Network(String),
    /// Caller is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current match state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Another session currently holds the scoring lock for this match.
    #[error("another session is scoring match {match_id}")]
    SessionConflict { match_id: Uuid },
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// The scoring session was torn down while the call was in flight.
    #[error("scoring session closed")]
    SessionClosed,
}

impl ServiceError {
    /// Failures worth retrying later (queued for submissions, retried by the next poll for fetches).
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Network(_) | ServiceError::Timeout)
    }

    /// Category used by the session's state machine.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Network(_) | ServiceError::Timeout => ErrorKind::Network,
            ServiceError::SessionConflict { .. } => ErrorKind::SessionConflict,
            ServiceError::Unavailable(_) => ErrorKind::Storage,
            ServiceError::Forbidden(_)
            | ServiceError::InvalidInput(_)
            | ServiceError::InvalidState(_)
            | ServiceError::NotFound(_)
            | ServiceError::SessionClosed => ErrorKind::Validation,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<BackendError> for ServiceError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unreachable { message } => ServiceError::Network(message),
            BackendError::Timeout => ServiceError::Timeout,
            BackendError::Rejected { status, message } => match status {
                400 | 422 => ServiceError::InvalidInput(message),
                401 | 403 => ServiceError::Forbidden(message),
                404 => ServiceError::NotFound(message),
                500.. => ServiceError::Network(message),
                _ => ServiceError::InvalidState(message),
            },
            BackendError::Decode { message } => {
                ServiceError::InvalidState(format!("unexpected backend response: {message}"))
            }
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Caller not allowed to act on the match.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Session blocked by another scorer.
    #[error("locked: {0}")]
    Locked(String),
    /// Backend or local storage unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Network(message) => AppError::ServiceUnavailable(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::Forbidden(message) => AppError::Forbidden(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            err @ ServiceError::SessionConflict { .. } => AppError::Locked(err.to_string()),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::SessionClosed => AppError::Conflict("scoring session closed".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Locked(_) => StatusCode::LOCKED,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_statuses_map_to_taxonomy() {
        let rejected = |status| BackendError::Rejected {
            status,
            message: "nope".into(),
        };

        assert!(ServiceError::from(BackendError::Timeout).is_transient());
        assert!(ServiceError::from(rejected(503)).is_transient());
        assert!(matches!(
            ServiceError::from(rejected(403)),
            ServiceError::Forbidden(_)
        ));
        assert!(matches!(
            ServiceError::from(rejected(409)),
            ServiceError::InvalidState(_)
        ));
        assert_eq!(ServiceError::from(rejected(422)).kind(), ErrorKind::Validation);
    }
}
