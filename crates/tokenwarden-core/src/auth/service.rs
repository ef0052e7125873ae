//! The session state machine.
//!
//! `SessionService` decides whether the stored access credential is usable,
//! renews it when it is not (or when the identity endpoint is unreachable),
//! fetches the current user, and publishes the resulting snapshot. Nothing
//! here returns an error to a session-check caller; `login` is the only
//! operation that fails outward, so a sign-in form can show the reason.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::api::envelope::{self, UserClaims};
use crate::api::{ApiError, AuthBackend, HttpAuthBackend, LoginRequest};
use crate::codec;
use crate::config::{SessionConfig, StorageKind};

use super::error::{
    LoginError, SessionError, SERVER_UNREACHABLE_MESSAGE, SESSION_CHECK_FAILED_MESSAGE,
    SESSION_EXPIRED_MESSAGE,
};
use super::store::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
use super::{AuthHeader, CredentialStore, RenewalScheduler, SessionSnapshot};

/// Upper bound for the renewal retry backoff
const MAX_RENEWAL_BACKOFF: Duration = Duration::from_secs(60);

/// Where to send the user once their session cannot be recovered.
pub trait Navigator: Send + Sync {
    fn redirect_to_sign_in(&self);
}

/// For hosts that react to the published snapshot instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn redirect_to_sign_in(&self) {}
}

type SharedCheck = Shared<BoxFuture<'static, SessionSnapshot>>;

pub struct SessionService<B: AuthBackend> {
    config: SessionConfig,
    backend: B,
    store: CredentialStore,
    scheduler: RenewalScheduler,
    navigator: Arc<dyn Navigator>,
    snapshot: watch::Sender<Arc<SessionSnapshot>>,
    in_flight: Mutex<Option<SharedCheck>>,
    // Bumped by login and logout; work started under an older epoch must
    // not write credentials, arm timers or publish.
    epoch: AtomicU64,
    weak_self: Weak<Self>,
}

impl SessionService<HttpAuthBackend> {
    /// Build the HTTP-backed service with the configured storage backend.
    pub fn from_config(config: SessionConfig, navigator: Arc<dyn Navigator>) -> Result<Arc<Self>> {
        let header = AuthHeader::new();
        let backend = HttpAuthBackend::new(config.clone(), header.clone())?;
        let storage: Box<dyn KeyValueStore> = match config.storage {
            StorageKind::Memory => Box::new(MemoryStore::new()),
            StorageKind::File => Box::new(FileStore::new(config.cache_dir()?)),
            StorageKind::Keyring => Box::new(KeyringStore::new()),
        };
        let store = CredentialStore::new(storage, header);
        Ok(Self::new(config, backend, store, navigator))
    }
}

impl<B: AuthBackend> SessionService<B> {
    pub fn new(
        config: SessionConfig,
        backend: B,
        store: CredentialStore,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        let (snapshot, _) = watch::channel(Arc::new(SessionSnapshot::Loading));
        Arc::new_cyclic(|weak_self| Self {
            scheduler: RenewalScheduler::new(config.renew_threshold()),
            config,
            backend,
            store,
            navigator,
            snapshot,
            in_flight: Mutex::new(None),
            epoch: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    /// Current snapshot. The Arc only changes when the snapshot does.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn scheduler(&self) -> &RenewalScheduler {
        &self.scheduler
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Invalidate every renewal and check started before this point.
    fn begin_epoch(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "Session epoch advanced");
    }

    fn publish(&self, next: SessionSnapshot) {
        self.snapshot.send_if_modified(|current| {
            if **current == next {
                false
            } else {
                debug!(status = ?next.status(), "Session snapshot changed");
                *current = Arc::new(next);
                true
            }
        });
    }

    /// Validate the stored credentials and settle on a snapshot.
    ///
    /// Concurrent callers share a single in-flight check.
    pub async fn check_session(&self) -> SessionSnapshot {
        let Some(this) = self.weak_self.upgrade() else {
            return self.run_check().await;
        };

        let check = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.as_ref() {
                Some(check) if check.peek().is_none() => {
                    debug!("Joining in-flight session check");
                    check.clone()
                }
                _ => {
                    let check = async move { this.run_check().await }.boxed().shared();
                    *in_flight = Some(check.clone());
                    check
                }
            }
        };

        let snapshot = check.await;

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.as_ref().is_some_and(|c| c.peek().is_some()) {
            *in_flight = None;
        }
        snapshot
    }

    async fn run_check(&self) -> SessionSnapshot {
        debug!("Checking session");
        let epoch = self.epoch();
        let snapshot = self.resolve_session(epoch).await;
        if !self.is_current(epoch) {
            debug!("Session changed during check, keeping the newer snapshot");
            return (*self.snapshot()).clone();
        }
        info!(status = ?snapshot.status(), "Session check settled");
        self.publish(snapshot.clone());
        snapshot
    }

    async fn resolve_session(&self, epoch: u64) -> SessionSnapshot {
        let mut renewed = false;

        loop {
            let access = self.store.get_access();
            let renewal = self.store.get_renewal();

            if let Some(access) = access.as_deref().filter(|a| codec::is_valid(a)) {
                if let Err(e) = self.store.set(access, None) {
                    warn!(error = %e, "Failed to re-affirm access credential");
                }

                match self.fetch_identity().await {
                    Ok(_) if !self.is_current(epoch) => return (*self.snapshot()).clone(),
                    Ok(user) => {
                        self.arm_for(access);
                        return SessionSnapshot::authenticated(user, access);
                    }
                    Err(e) if e.is_transient() => {
                        warn!(error = %e, renewed, "Identity fetch failed, server may be unreachable");
                        if renewed {
                            return SessionSnapshot::failed(SERVER_UNREACHABLE_MESSAGE);
                        }
                        let Some(renewal) = renewal else {
                            return SessionSnapshot::failed(SERVER_UNREACHABLE_MESSAGE);
                        };
                        match self.exchange_renewal(&renewal, epoch).await {
                            Ok(_) => {}
                            Err(SessionError::Superseded) => return (*self.snapshot()).clone(),
                            Err(e) => return self.expire_session(&e),
                        }
                        renewed = true;
                        continue;
                    }
                    Err(e) => {
                        error!(error = %e, "Identity fetch rejected");
                        return SessionSnapshot::failed(SESSION_CHECK_FAILED_MESSAGE);
                    }
                }
            }

            match renewal {
                Some(renewal) if !renewed => {
                    debug!(access_present = access.is_some(), "Access credential unusable, renewing");
                    match self.exchange_renewal(&renewal, epoch).await {
                        Ok(_) => {}
                        Err(SessionError::Superseded) => return (*self.snapshot()).clone(),
                        Err(e) => return self.expire_session(&e),
                    }
                    renewed = true;
                }
                Some(_) => return self.expire_session(&SessionError::InvalidRenewedCredential),
                None => {
                    if access.is_some() {
                        debug!("Discarding unusable access credential");
                        self.scheduler.cancel();
                        if let Err(e) = self.store.clear() {
                            warn!(error = %e, "Failed to clear credentials");
                        }
                    }
                    return SessionSnapshot::signed_out();
                }
            }
        }
    }

    async fn fetch_identity(&self) -> Result<UserClaims, ApiError> {
        let response = timeout(self.config.identity_timeout(), self.backend.current_user())
            .await
            .map_err(|_| ApiError::Timeout)??;
        envelope::normalize_identity(&response)
    }

    /// Exchange the renewal credential for a new access credential and
    /// persist it. Transient failures are retried with backoff. Nothing is
    /// persisted if the session epoch moved on while waiting.
    async fn exchange_renewal(&self, renewal: &str, epoch: u64) -> Result<String, SessionError> {
        let mut attempt = 0;
        let mut backoff = self.config.renewal_backoff();

        let access = loop {
            let result = match self.backend.refresh(renewal).await {
                Ok(response) => envelope::parse_renewal(&response),
                Err(e) => Err(e),
            };
            if !self.is_current(epoch) {
                info!("Discarding renewal result from a previous session");
                return Err(SessionError::Superseded);
            }
            match result {
                Ok(access) => break access,
                Err(e) if e.is_transient() && attempt < self.config.renewal_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, backoff_ms = backoff.as_millis() as u64, "Renewal failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_RENEWAL_BACKOFF);
                }
                Err(e) => return Err(SessionError::RenewalRejected(e)),
            }
        };

        if !codec::is_valid(&access) {
            return Err(SessionError::InvalidRenewedCredential);
        }
        if let Err(e) = self.store.set(&access, None) {
            warn!(error = %e, "Failed to persist renewed credential");
        }
        debug!("Access credential renewed");
        Ok(access)
    }

    /// Tear the session down after an unrecoverable renewal failure.
    fn expire_session(&self, reason: &dyn Display) -> SessionSnapshot {
        warn!(reason = %reason, "Session could not be renewed, signing out");
        self.scheduler.cancel();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credentials");
        }
        self.navigator.redirect_to_sign_in();
        SessionSnapshot::failed(SESSION_EXPIRED_MESSAGE)
    }

    /// Schedule the next renewal from the credential's expiry claim.
    fn arm_for(&self, access: &str) {
        let Some(expiry) = codec::decode(access).and_then(|c| c.expires_at()) else {
            debug!("Access credential carries no expiry, renewal not scheduled");
            return;
        };

        let weak = self.weak_self.clone();
        let outcome = self.scheduler.arm(expiry, move || async move {
            if let Some(service) = weak.upgrade() {
                match service.renew().await {
                    Ok(()) => {}
                    Err(SessionError::Superseded) => debug!("Scheduled renewal superseded"),
                    Err(e) => warn!(error = %e, "Scheduled renewal failed"),
                }
            }
        });
        debug!(?outcome, "Renewal armed");
    }

    /// Sign in. Fails with a message suitable for the sign-in form.
    pub async fn login(&self, request: &LoginRequest) -> Result<SessionSnapshot, LoginError> {
        let response = match timeout(self.config.login_timeout(), self.backend.login(request)).await {
            Ok(response) => response?,
            Err(_) => {
                warn!(timeout_secs = self.config.login_timeout_secs, "Login request timed out");
                return Err(LoginError::ServerNotResponding);
            }
        };

        let grant = envelope::parse_login(&response).map_err(|e| {
            error!(error = %e, "Unrecognized login response");
            LoginError::from(e)
        })?;

        // Never carry a previous user's renewal credential into this session.
        self.begin_epoch();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear previous credentials");
        }
        if let Err(e) = self
            .store
            .set(&grant.access_token, grant.refresh_token.as_deref())
        {
            warn!(error = %e, "Failed to persist credentials");
        }
        if grant.refresh_token.is_none() {
            warn!("Login response carried no renewal credential");
        }
        self.arm_for(&grant.access_token);

        let snapshot = SessionSnapshot::authenticated(grant.user, &grant.access_token);
        self.publish(snapshot.clone());
        info!("Login successful");
        Ok(snapshot)
    }

    /// Sign out locally, telling the server on a best-effort basis.
    pub async fn logout(&self) -> SessionSnapshot {
        self.begin_epoch();
        match timeout(self.config.request_timeout(), self.backend.logout()).await {
            Ok(Ok(())) => debug!("Server-side logout acknowledged"),
            Ok(Err(e)) => warn!(error = %e, "Server-side logout failed"),
            Err(_) => warn!("Server-side logout timed out"),
        }

        self.scheduler.cancel();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credentials");
        }

        let snapshot = SessionSnapshot::signed_out();
        self.publish(snapshot.clone());
        info!("Logged out");
        snapshot
    }

    /// Exchange the renewal credential for a new access credential. The
    /// renewal credential itself is left untouched. On failure the session
    /// is torn down and the user is sent to sign in.
    pub async fn renew(&self) -> Result<(), SessionError> {
        let epoch = self.epoch();
        let result = match self.store.get_renewal() {
            Some(renewal) => self.exchange_renewal(&renewal, epoch).await,
            None => Err(SessionError::MissingRenewalCredential),
        };

        match result {
            Err(SessionError::Superseded) => Err(SessionError::Superseded),
            Ok(access) => {
                self.arm_for(&access);
                if let Some(next) = self.snapshot().with_credential(&access) {
                    self.publish(next);
                }
                info!("Session renewed");
                Ok(())
            }
            Err(e) => {
                let snapshot = self.expire_session(&e);
                self.publish(snapshot);
                Err(e)
            }
        }
    }
}
