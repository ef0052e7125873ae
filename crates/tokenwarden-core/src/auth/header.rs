use std::sync::{Arc, PoisonError, RwLock};

use reqwest::header::HeaderValue;

/// The default `Authorization` header applied to outgoing requests.
///
/// Shared between the credential store (the only writer) and the transport
/// (which reads it at request time). Clone is cheap.
#[derive(Debug, Clone, Default)]
pub struct AuthHeader {
    value: Arc<RwLock<Option<HeaderValue>>>,
}

impl AuthHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current header value, if a credential is installed.
    pub fn get(&self) -> Option<HeaderValue> {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    /// Build the sensitive `Bearer` value for a credential without installing it.
    pub(crate) fn bearer(access: &str) -> Result<HeaderValue, reqwest::header::InvalidHeaderValue> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", access))?;
        value.set_sensitive(true);
        Ok(value)
    }

    pub(crate) fn install(&self, value: HeaderValue) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    #[cfg(test)]
    pub(crate) fn set_bearer(&self, access: &str) -> Result<(), reqwest::header::InvalidHeaderValue> {
        self.install(Self::bearer(access)?);
        Ok(())
    }

    pub(crate) fn clear(&self) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let header = AuthHeader::new();
        let transport_view = header.clone();

        header.set_bearer("abc").expect("valid");
        assert_eq!(
            transport_view.get().as_ref().and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );

        header.clear();
        assert!(!transport_view.is_set());
    }

    #[test]
    fn test_rejects_header_breaking_values() {
        let header = AuthHeader::new();
        assert!(header.set_bearer("bad\nvalue").is_err());
        assert!(!header.is_set());
    }
}
