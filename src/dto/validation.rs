//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest concession reason accepted.
pub const MAX_REASON_LENGTH: usize = 280;

/// Validates that a concession reason is not blank and stays short.
///
/// # Examples
///
/// ```ignore
/// validate_concession_reason("injury")   // Ok
/// validate_concession_reason("   ")      // Err - blank
/// ```
pub fn validate_concession_reason(reason: &str) -> Result<(), ValidationError> {
    if reason.trim().is_empty() {
        let mut err = ValidationError::new("reason_blank");
        err.message = Some("Concession reason must not be blank; omit it instead".into());
        return Err(err);
    }

    let length = reason.chars().count();
    if length > MAX_REASON_LENGTH {
        let mut err = ValidationError::new("reason_length");
        err.message = Some(
            format!("Concession reason must be at most {MAX_REASON_LENGTH} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use validator::Validate;

    use super::*;
    use crate::dto::session::{ConcedeRequest, SubmitScoreRequest};

    #[test]
    fn test_validate_concession_reason() {
        assert!(validate_concession_reason("injury").is_ok());
        assert!(validate_concession_reason("").is_err());
        assert!(validate_concession_reason(" \t").is_err());
        assert!(validate_concession_reason(&"x".repeat(MAX_REASON_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_concede_request_without_reason_is_valid() {
        assert!(ConcedeRequest::default().validate().is_ok());
    }

    #[test]
    fn test_submit_score_request_ranges() {
        let request = |hole_number, own_score| SubmitScoreRequest {
            hole_number,
            own_score,
            marked_player_id: None,
            marked_score: None,
        };
        assert!(request(1, Some(4)).validate().is_ok());
        assert!(request(18, None).validate().is_ok());
        assert!(request(0, Some(4)).validate().is_err());
        assert!(request(19, Some(4)).validate().is_err());
        assert!(request(3, Some(10)).validate().is_err());
    }
}
