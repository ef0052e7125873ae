//! Bearer credential decoding.
//!
//! Access credentials are JWT-shaped (`header.payload.signature`). Only the
//! payload is read; signatures are the backend's business. Every failure
//! here is swallowed and reported as "no claims", never as an error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::debug;

/// Decoded key/value payload of an access credential.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Expiry in epoch seconds. Fractional `exp` values are truncated.
    pub fn expires_at(&self) -> Option<i64> {
        match self.0.get("exp")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.0.get("iat").and_then(Value::as_i64)
    }

    pub fn subject(&self) -> Option<String> {
        match self.0.get("sub")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Time remaining relative to `now` (epoch seconds); negative once expired.
    /// Saturates at the bounds of `Duration` for absurd expiry values.
    pub fn time_until_expiry(&self, now: i64) -> Option<Duration> {
        self.expires_at().map(|exp| {
            exp.checked_sub(now)
                .and_then(Duration::try_seconds)
                .unwrap_or(if exp >= now { Duration::MAX } else { Duration::MIN })
        })
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.time_until_expiry(Utc::now().timestamp())
            .map(|d| d.num_minutes().max(0))
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Decode the payload segment of a credential.
///
/// Returns `None` for anything that is not exactly three dot-separated
/// segments with a base64url JSON object in the middle.
pub fn decode(raw: &str) -> Option<Claims> {
    let mut segments = raw.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        debug!("Credential does not have three segments");
        return None;
    };

    // Some issuers pad their segments; the alphabet is still url-safe.
    let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Credential payload is not valid base64url");
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(Claims(map)),
        Ok(_) => {
            debug!("Credential payload is not a JSON object");
            None
        }
        Err(e) => {
            debug!(error = %e, "Credential payload is not valid JSON");
            None
        }
    }
}

/// Check a credential against an explicit clock (epoch seconds).
pub fn is_valid_at(raw: &str, now: i64) -> bool {
    if raw.is_empty() {
        return false;
    }
    decode(raw)
        .and_then(|claims| claims.expires_at())
        .map(|exp| exp > now)
        .unwrap_or(false)
}

/// Check a credential against the wall clock.
pub fn is_valid(raw: &str) -> bool {
    is_valid_at(raw, Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) fn encode_for_test(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
