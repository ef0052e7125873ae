//! tokenwarden-core - session and token lifecycle for dashboard clients.
//!
//! Decides whether the client holds a usable access credential, renews it
//! ahead of expiry, recovers from transient failures during renewal, and
//! publishes a single session snapshot for the UI layer to render from.

pub mod api;
pub mod auth;
pub mod codec;
pub mod config;
pub mod logging;

pub use api::{ApiError, AuthBackend, HttpAuthBackend, LoginRequest, UserClaims};
pub use auth::{
    AuthHeader, CredentialStore, LoginError, Navigator, NoopNavigator, SessionError,
    SessionHandle, SessionService, SessionSnapshot, SessionStatus,
};
pub use config::{SessionConfig, StorageKind};

use std::sync::Arc;

/// Build an HTTP-backed session from configuration and hand back the
/// consumer view. Call `check_session` on the result at startup.
pub fn connect(
    config: SessionConfig,
    navigator: Arc<dyn Navigator>,
) -> anyhow::Result<SessionHandle<HttpAuthBackend>> {
    let service = SessionService::from_config(config, navigator)?;
    Ok(SessionHandle::new(service))
}
