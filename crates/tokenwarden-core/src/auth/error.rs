use thiserror::Error;

use crate::api::ApiError;

/// Shown when the session could not be renewed.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please login again.";

/// Shown when the identity endpoint rejected an otherwise valid session.
pub const SESSION_CHECK_FAILED_MESSAGE: &str = "Unable to verify your session. Please login again.";

/// Shown when the identity endpoint cannot be reached and no renewal is possible.
pub const SERVER_UNREACHABLE_MESSAGE: &str = "Unable to reach the server. Please try again.";

/// Login failures, with messages suitable for an inline form error.
#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Access denied")]
    AccessDenied,

    #[error("Server error. Please try again.")]
    ServerError,

    #[error("Server is not responding. Please try again later.")]
    ServerNotResponding,

    #[error("Unable to connect to server. Check your internet connection.")]
    Network(String),

    #[error("Unexpected login response: {0}")]
    MalformedResponse(String),

    #[error("Login failed (status {0})")]
    Rejected(u16),
}

impl From<ApiError> for LoginError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized => LoginError::InvalidCredentials,
            ApiError::AccessDenied(_) => LoginError::AccessDenied,
            ApiError::ServerError { .. } => LoginError::ServerError,
            ApiError::Timeout => LoginError::ServerNotResponding,
            ApiError::Network(msg) => LoginError::Network(msg),
            ApiError::MalformedResponse(msg) => LoginError::MalformedResponse(msg),
            ApiError::Rejected { status, .. } => LoginError::Rejected(status),
        }
    }
}

/// Renewal failures. Every variant except `Superseded` ends the local session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A login or logout happened while the renewal was in flight; its
    /// result was discarded.
    #[error("Session changed while renewing")]
    Superseded,

    #[error("No renewal credential available")]
    MissingRenewalCredential,

    #[error("Renewal rejected: {0}")]
    RenewalRejected(#[source] ApiError),

    #[error("Renewed credential is not valid")]
    InvalidRenewedCredential,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_error_messages_by_status() {
        assert_eq!(
            LoginError::from(ApiError::Unauthorized).to_string(),
            "Invalid email or password"
        );
        assert_eq!(
            LoginError::from(ApiError::AccessDenied(String::new())).to_string(),
            "Access denied"
        );
        assert_eq!(
            LoginError::from(ApiError::ServerError { status: 503, body: String::new() }).to_string(),
            "Server error. Please try again."
        );
        assert!(matches!(
            LoginError::from(ApiError::Rejected { status: 422, body: String::new() }),
            LoginError::Rejected(422)
        ));
    }

    #[test]
    fn test_timeout_is_distinct_from_rejection() {
        let err = LoginError::from(ApiError::Timeout);
        assert!(matches!(err, LoginError::ServerNotResponding));
        assert!(err.to_string().contains("not responding"));
    }
}
