use serde::Serialize;
use serde_json::Value;

use crate::api::UserClaims;

/// Key under which the access credential is merged into the user claims.
pub const ACCESS_TOKEN_FIELD: &str = "accessToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

/// The consumer-visible authentication state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionSnapshot {
    Loading,
    Unauthenticated {
        error: Option<String>,
    },
    Authenticated {
        user: UserClaims,
        #[serde(skip)]
        credential: String,
    },
}

impl SessionSnapshot {
    /// Merge the access credential into the normalized user claims.
    pub fn authenticated(mut user: UserClaims, credential: &str) -> Self {
        user.insert(
            ACCESS_TOKEN_FIELD.to_string(),
            Value::String(credential.to_string()),
        );
        SessionSnapshot::Authenticated {
            user,
            credential: credential.to_string(),
        }
    }

    pub fn signed_out() -> Self {
        SessionSnapshot::Unauthenticated { error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        SessionSnapshot::Unauthenticated {
            error: Some(message.into()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            SessionSnapshot::Loading => SessionStatus::Loading,
            SessionSnapshot::Unauthenticated { .. } => SessionStatus::Unauthenticated,
            SessionSnapshot::Authenticated { .. } => SessionStatus::Authenticated,
        }
    }

    pub fn user(&self) -> Option<&UserClaims> {
        match self {
            SessionSnapshot::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SessionSnapshot::Unauthenticated { error } => error.as_deref(),
            _ => None,
        }
    }

    pub fn credential(&self) -> Option<&str> {
        match self {
            SessionSnapshot::Authenticated { credential, .. } => Some(credential),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionSnapshot::Authenticated { .. })
    }

    /// Same user with a renewed credential.
    pub(crate) fn with_credential(&self, credential: &str) -> Option<Self> {
        self.user()
            .map(|user| SessionSnapshot::authenticated(user.clone(), credential))
    }
}
