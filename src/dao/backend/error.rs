use thiserror::Error;

/// Convenient result alias returning [`BackendError`] failures.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures that can occur while talking to the scoring backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The request never reached the backend.
    #[error("backend unreachable: {message}")]
    Unreachable { message: String },
    /// The backend did not answer in time.
    #[error("backend request timed out")]
    Timeout,
    /// The backend answered with a non-success status.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The response payload could not be decoded.
    #[error("failed to decode backend response: {message}")]
    Decode { message: String },
}

impl BackendError {
    /// Shorthand for a business rejection.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        BackendError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Connectivity failures and server-side errors may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Unreachable { .. } | BackendError::Timeout => true,
            BackendError::Rejected { status, .. } => *status >= 500,
            BackendError::Decode { .. } => false,
        }
    }
}
