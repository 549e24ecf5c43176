//! Public façade over the session lifecycle.
//!
//! The controller owns the refresh scheduler, the session validator and the
//! session-limit coordinator. A watcher task turns their failure events into
//! a forced logout followed by [`SessionEvent::Invalidated`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crm_core::constants::{REVOKED_BY_USER, REVOKE_REASON_LOGOUT, REVOKE_REASON_MANUAL};
use crm_core::{
    decode_claims, is_expired, InvalidationReason, LoginRequest, RevokeSessionRequest,
    SessionLimitError, SessionRecord, User,
};
use crm_keystore::CredentialStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credentials;
use crate::device::DeviceIdentityProvider;
use crate::error::AuthError;
use crate::events::{RefreshEvent, SessionEvent, EVENT_CHANNEL_CAPACITY};
use crate::limit::{LimitPhase, LoginCredentials, Resolution, SessionLimitCoordinator};
use crate::scheduler::{RefreshOutcome, RefreshScheduleState, RefreshScheduler};
use crate::settings::SessionSettings;
use crate::transport::{AuthTransport, Authorization};
use crate::validator::SessionValidator;

pub struct AuthSessionController {
    settings: SessionSettings,
    store: Arc<dyn CredentialStore>,
    device: Arc<dyn DeviceIdentityProvider>,
    transport: Arc<dyn AuthTransport>,
    clock: Arc<dyn Clock>,
    scheduler: RefreshScheduler,
    validator: SessionValidator,
    limits: SessionLimitCoordinator,
    events: broadcast::Sender<SessionEvent>,
    lifecycle: AsyncMutex<()>,
    active: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AuthSessionController {
    /// Must be called inside a tokio runtime for invalidations to be acted on.
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn CredentialStore>,
        device: Arc<dyn DeviceIdentityProvider>,
        transport: Arc<dyn AuthTransport>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let scheduler = RefreshScheduler::new(
            store.clone(),
            device.clone(),
            transport.clone(),
            clock.clone(),
            settings.refresh_policy(),
            settings.client_type,
        );
        let validator =
            SessionValidator::new(store.clone(), device.clone(), transport.clone(), clock.clone());
        let limits = SessionLimitCoordinator::new(transport.clone(), device.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let controller = Arc::new(Self {
            settings,
            store,
            device,
            transport,
            clock,
            scheduler,
            validator,
            limits,
            events,
            lifecycle: AsyncMutex::new(()),
            active: AtomicBool::new(false),
            watcher: Mutex::new(None),
        });
        controller.spawn_watcher();
        controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Logs in and starts background renewal and validation. Either the
    /// whole session is established or nothing changes.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let _guard = self.lifecycle.lock().await;
        self.login_locked(LoginCredentials::new(email, password))
            .await
    }

    /// Revokes the chosen session(s) of a pending session-limit rejection and
    /// retries the parked login. If that login fails transiently the flow
    /// stays resolved, and calling this again only retries the login.
    pub async fn resolve_session_limit(&self, resolution: Resolution) -> Result<User, AuthError> {
        let _guard = self.lifecycle.lock().await;
        let credentials = self.limits.resolve(resolution).await?;
        let result = self.login_locked(credentials).await;
        if let Err(err) = &result {
            if self.limits.phase() == LimitPhase::Resolved && !err.is_retryable() {
                self.limits.cancel();
            }
        }
        result
    }

    pub fn cancel_session_limit(&self) {
        self.limits.cancel();
    }

    #[must_use]
    pub fn pending_session_limit(&self) -> Option<SessionLimitError> {
        self.limits.pending()
    }

    #[must_use]
    pub fn session_limit_phase(&self) -> LimitPhase {
        self.limits.phase()
    }

    /// Ends the session locally and, best effort, on the server. Safe to call
    /// at any time, any number of times.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let _guard = self.lifecycle.lock().await;
        let was_active = self.logout_locked().await?;
        if was_active {
            info!(event = "logged_out");
            let _ = self.events.send(SessionEvent::LoggedOut);
        }
        Ok(())
    }

    /// User from the cached access token, if it is still valid. Never
    /// touches the network.
    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        let token = credentials::access_token(self.store.as_ref()).ok()??;
        let claims = decode_claims(&token).ok()?;
        if is_expired(&claims, self.clock.now()) {
            return None;
        }
        Some(claims.user())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Resumes a persisted session. An expired access token is fine; the
    /// scheduler renews it straight away.
    pub async fn restore(&self) -> Result<Option<User>, AuthError> {
        let _guard = self.lifecycle.lock().await;
        if credentials::refresh_token(self.store.as_ref())?.is_none() {
            debug!(event = "restore_skipped", reason = "no_refresh_token");
            return Ok(None);
        }
        let user = credentials::access_token(self.store.as_ref())?
            .and_then(|token| decode_claims(&token).ok())
            .map(|claims| claims.user());
        self.start_background();
        info!(event = "session_restored", user_id = user.as_ref().map(|user| user.id.as_str()));
        Ok(user)
    }

    pub async fn force_refresh(&self) -> Result<RefreshOutcome, AuthError> {
        if !self.is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }
        self.scheduler.force_refresh().await
    }

    pub async fn check_session(&self) -> Result<Option<SessionRecord>, AuthError> {
        self.validator.check_now().await
    }

    /// Revokes another session of the signed-in account. Revoking the
    /// current session is a logout.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), AuthError> {
        let current = credentials::session_id(self.store.as_ref())?;
        if current.as_deref() == Some(session_id) {
            return self.logout().await;
        }
        let access_token =
            credentials::access_token(self.store.as_ref())?.ok_or(AuthError::NotAuthenticated)?;
        let device = self.device.identity()?;
        let request = RevokeSessionRequest {
            device_id: device.device_id,
            reason: REVOKE_REASON_MANUAL.to_string(),
            revoked_by: REVOKED_BY_USER.to_string(),
        };
        self.transport
            .revoke_session(&Authorization::Bearer(access_token), session_id, &request)
            .await?;
        info!(event = "session_revoked", session_id);
        Ok(())
    }

    pub fn touch(&self) -> Result<(), AuthError> {
        if !self.is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }
        credentials::touch(self.store.as_ref(), self.clock.now())?;
        Ok(())
    }

    #[must_use]
    pub fn refresh_state(&self) -> RefreshScheduleState {
        self.scheduler.state()
    }

    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.validator.is_polling()
    }

    async fn login_locked(&self, credentials: LoginCredentials) -> Result<User, AuthError> {
        let device = self.device.identity()?;
        let request = LoginRequest {
            email: credentials.email.clone(),
            password: credentials.password().to_string(),
            device_id: device.device_id.clone(),
            device_fingerprint: device.fingerprint,
            client_type: self.settings.client_type,
        };
        let response = match self.transport.login(&request).await {
            Ok(response) => response,
            Err(AuthError::SessionLimitExceeded(limit)) => {
                let public = self.limits.begin(*limit, credentials);
                return Err(AuthError::SessionLimitExceeded(Box::new(public)));
            }
            Err(err) => {
                info!(event = "login_failed", error = %err);
                return Err(err);
            }
        };
        decode_claims(&response.token)?;
        if response.session.device_id != device.device_id {
            warn!(
                event = "login_device_unexpected",
                session_id = %response.session.session_id
            );
        }

        // The previous session, if any, is replaced without remote revocation.
        self.stop_background();
        if let Err(err) = credentials::persist_login(self.store.as_ref(), &response, self.clock.now())
        {
            if let Err(clear_err) = self.store.clear() {
                warn!(event = "credential_clear_failed", error = %clear_err);
            }
            self.active.store(false, Ordering::SeqCst);
            return Err(err.into());
        }
        self.limits.finish();
        self.start_background();

        let user = response.user;
        info!(
            event = "login_succeeded",
            user_id = %user.id,
            session_id = %response.session.session_id
        );
        let _ = self.events.send(SessionEvent::LoggedIn { user: user.clone() });
        Ok(user)
    }

    /// Returns whether a session was active.
    async fn logout_locked(&self) -> Result<bool, AuthError> {
        self.stop_background();
        self.limits.cancel();
        let was_active = self.active.swap(false, Ordering::SeqCst);
        self.revoke_remote_session().await;
        self.store.clear()?;
        Ok(was_active)
    }

    async fn revoke_remote_session(&self) {
        let session_id = credentials::session_id(self.store.as_ref()).ok().flatten();
        let access_token = credentials::access_token(self.store.as_ref()).ok().flatten();
        let (Some(session_id), Some(access_token)) = (session_id, access_token) else {
            return;
        };
        let device = match self.device.identity() {
            Ok(device) => device,
            Err(err) => {
                warn!(event = "remote_logout_skipped", error = %err);
                return;
            }
        };
        let request = RevokeSessionRequest {
            device_id: device.device_id,
            reason: REVOKE_REASON_LOGOUT.to_string(),
            revoked_by: REVOKED_BY_USER.to_string(),
        };
        match self
            .transport
            .revoke_session(&Authorization::Bearer(access_token), &session_id, &request)
            .await
        {
            Ok(()) => debug!(event = "remote_logout_done", session_id = %session_id),
            Err(err) => warn!(event = "remote_logout_failed", error = %err),
        }
    }

    fn start_background(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.scheduler.start();
        self.validator
            .start_polling(self.settings.validation_interval());
    }

    fn stop_background(&self) {
        self.scheduler.stop();
        self.validator.stop_polling();
    }

    async fn invalidate(&self, reason: InvalidationReason, stale: impl FnOnce(&Self) -> bool) {
        let _guard = self.lifecycle.lock().await;
        if stale(self) || !self.is_authenticated() {
            debug!(event = "stale_invalidation_ignored", reason = %reason);
            return;
        }
        if reason.is_security_event() {
            warn!(event = "session_invalidated", reason = %reason, security = true);
        } else {
            info!(event = "session_invalidated", reason = %reason);
        }
        if let Err(err) = self.logout_locked().await {
            warn!(event = "forced_logout_incomplete", error = %err);
        }
        let _ = self.events.send(SessionEvent::Invalidated { reason });
    }

    fn spawn_watcher(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = "session_watcher_not_started", reason = "no_runtime");
            return;
        };
        let weak = Arc::downgrade(self);
        let refresh_events = self.scheduler.subscribe();
        let invalid_events = self.validator.subscribe();
        let task = runtime.spawn(watch(weak, refresh_events, invalid_events));
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

impl Drop for AuthSessionController {
    fn drop(&mut self) {
        let watcher = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
        }
    }
}

async fn watch(
    controller: Weak<AuthSessionController>,
    mut refresh_events: broadcast::Receiver<RefreshEvent>,
    mut invalid_events: broadcast::Receiver<crate::events::SessionInvalid>,
) {
    loop {
        tokio::select! {
            event = refresh_events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(event = "refresh_events_lagged", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(controller) = controller.upgrade() else { break };
                match event {
                    RefreshEvent::Refreshed { generation, .. } => {
                        if generation == controller.scheduler.generation() {
                            let _ = controller.events.send(SessionEvent::Refreshed);
                        }
                    }
                    RefreshEvent::Fatal { error, generation } => {
                        controller
                            .invalidate(error.invalidation_reason(), |controller| {
                                controller.scheduler.generation() != generation
                            })
                            .await;
                    }
                }
            }
            event = invalid_events.recv() => {
                let invalid = match event {
                    Ok(invalid) => invalid,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(event = "session_events_lagged", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(controller) = controller.upgrade() else { break };
                controller
                    .invalidate(invalid.reason, |controller| {
                        controller.validator.generation() != invalid.generation
                    })
                    .await;
            }
        }
    }
}
