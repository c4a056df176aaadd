//! Registry error types.
//!
//! Every registry error is a synchronous, non-retryable signal to the
//! caller; resubmission by the client is the retry mechanism. Internal
//! details are logged server-side and never leak into the wire error.

use common::protocol::ErrorCode;
use thiserror::Error;

/// Errors returned by room registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The room requires a password and none was supplied.
    #[error("password required for room {room_id}")]
    AuthRequired {
        room_id: String,
        hint: Option<String>,
    },

    /// The supplied password did not match the stored hash.
    #[error("password mismatch for room {room_id}")]
    AuthFailed { room_id: String },

    /// Malformed request (empty ids, duplicate user, premature signal).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Operation referenced a room that does not exist.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Actor plumbing failure (mailbox closed, hashing failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Map to the wire error code. Internal failures surface as a
    /// generic bad request with no details attached.
    #[must_use]
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            RegistryError::AuthRequired { hint, .. } => ErrorCode::AuthRequired {
                hint: hint.clone(),
            },
            RegistryError::AuthFailed { .. } => ErrorCode::AuthFailed,
            RegistryError::BadRequest(message) => ErrorCode::BadRequest {
                message: message.clone(),
            },
            RegistryError::RoomNotFound(room_id) => ErrorCode::BadRequest {
                message: format!("unknown room: {room_id}"),
            },
            RegistryError::Internal(_) => ErrorCode::BadRequest {
                message: "internal error".to_string(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn auth_required_carries_hint() {
        let err = RegistryError::AuthRequired {
            room_id: "r1".to_string(),
            hint: Some("pet's name".to_string()),
        };
        assert_eq!(
            err.to_error_code(),
            ErrorCode::AuthRequired {
                hint: Some("pet's name".to_string())
            }
        );
    }

    #[test]
    fn internal_details_do_not_leak() {
        let err = RegistryError::Internal("bcrypt cost out of range".to_string());
        let code = err.to_error_code();
        match code {
            ErrorCode::BadRequest { message } => {
                assert!(!message.contains("bcrypt"));
            }
            other => unreachable!("unexpected code: {other:?}"),
        }
    }

    #[test]
    fn display_formatting() {
        assert_eq!(
            format!("{}", RegistryError::AuthFailed {
                room_id: "r1".to_string()
            }),
            "password mismatch for room r1"
        );
    }
}
