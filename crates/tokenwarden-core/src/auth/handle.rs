use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{AuthBackend, LoginRequest, UserClaims};

use super::error::{LoginError, SessionError};
use super::{SessionService, SessionSnapshot, SessionStatus};

/// What the UI layer holds: the current `{status, user, error}` plus the
/// session operations. Clone is cheap.
pub struct SessionHandle<B: AuthBackend> {
    service: Arc<SessionService<B>>,
    receiver: watch::Receiver<Arc<SessionSnapshot>>,
}

impl<B: AuthBackend> Clone for SessionHandle<B> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            receiver: self.receiver.clone(),
        }
    }
}

impl<B: AuthBackend> SessionHandle<B> {
    pub fn new(service: Arc<SessionService<B>>) -> Self {
        let receiver = service.subscribe();
        Self { service, receiver }
    }

    /// The current snapshot; the same Arc until something changes.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.receiver.borrow())
    }

    pub fn status(&self) -> SessionStatus {
        self.receiver.borrow().status()
    }

    pub fn user(&self) -> Option<UserClaims> {
        self.receiver.borrow().user().cloned()
    }

    pub fn error(&self) -> Option<String> {
        self.receiver.borrow().error().map(str::to_string)
    }

    /// Wait for the next snapshot change. Returns `None` once the service
    /// has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<SessionSnapshot>> {
        self.receiver.changed().await.ok()?;
        Some(Arc::clone(&self.receiver.borrow_and_update()))
    }

    pub async fn check_session(&self) -> SessionSnapshot {
        self.service.check_session().await
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<SessionSnapshot, LoginError> {
        self.service.login(request).await
    }

    pub async fn logout(&self) -> SessionSnapshot {
        self.service.logout().await
    }

    pub async fn refresh(&self) -> Result<(), SessionError> {
        self.service.renew().await
    }
}
