//! Response-shape normalization for the auth endpoints.
//!
//! The backend has answered in several envelopes over its lifetime. Each
//! endpoint's accepted shapes are tried in a fixed priority order; the first
//! structural match wins and anything else is a `MalformedResponse`.

use serde_json::{Map, Value};

use super::ApiError;

/// Normalized user claims returned by the identity endpoint.
pub type UserClaims = Map<String, Value>;

/// Accepted shapes of `GET /auth/me`, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityShape {
    /// `{success, data: {user}}`
    Envelope(UserClaims),
    /// `{user}`
    Wrapped(UserClaims),
    /// `{id, ...}`
    Bare(UserClaims),
}

impl IdentityShape {
    pub fn detect(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        if obj.contains_key("success") {
            if let Some(user) = obj
                .get("data")
                .and_then(|d| d.get("user"))
                .and_then(Value::as_object)
            {
                return Some(IdentityShape::Envelope(user.clone()));
            }
        }

        if let Some(user) = obj.get("user").and_then(Value::as_object) {
            return Some(IdentityShape::Wrapped(user.clone()));
        }

        if obj.get("id").is_some_and(|id| !id.is_null()) {
            return Some(IdentityShape::Bare(obj.clone()));
        }

        None
    }

    pub fn into_user(self) -> UserClaims {
        match self {
            IdentityShape::Envelope(user)
            | IdentityShape::Wrapped(user)
            | IdentityShape::Bare(user) => user,
        }
    }
}

/// Normalize an identity response into user claims.
pub fn normalize_identity(value: &Value) -> Result<UserClaims, ApiError> {
    IdentityShape::detect(value)
        .map(IdentityShape::into_user)
        .ok_or_else(|| {
            ApiError::MalformedResponse("identity response matches no known shape".to_string())
        })
}

/// Credentials and user issued by a successful login.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: UserClaims,
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Parse either `{success, data: {accessToken, refreshToken, user}}` or
/// `{access, refresh, user}`.
pub fn parse_login(value: &Value) -> Result<LoginGrant, ApiError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ApiError::MalformedResponse("login response is not an object".into()))?;

    let (fields, access_key, refresh_key) =
        if let Some(data) = obj.get("data").and_then(Value::as_object) {
            (data, "accessToken", "refreshToken")
        } else if obj.contains_key("access") {
            (obj, "access", "refresh")
        } else {
            return Err(ApiError::MalformedResponse(
                "login response matches no known shape".into(),
            ));
        };

    let access_token = non_empty_str(fields, access_key).ok_or_else(|| {
        ApiError::MalformedResponse(format!("login response missing {}", access_key))
    })?;
    let user = fields
        .get("user")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::MalformedResponse("login response missing user".into()))?;

    Ok(LoginGrant {
        access_token: access_token.to_string(),
        refresh_token: non_empty_str(fields, refresh_key).map(str::to_string),
        user: user.clone(),
    })
}

/// Parse `{success, data: {accessToken}}` or the legacy `{access}`.
pub fn parse_renewal(value: &Value) -> Result<String, ApiError> {
    value
        .get("data")
        .and_then(Value::as_object)
        .and_then(|data| non_empty_str(data, "accessToken"))
        .or_else(|| value.as_object().and_then(|obj| non_empty_str(obj, "access")))
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::MalformedResponse("renewal response missing access token".into())
        })
}
