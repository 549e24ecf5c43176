//! Resumable login after a concurrent-session rejection.
//!
//! The rejected credentials and the server's management token are parked
//! here until the user revokes a session (or gives up). The management token
//! authorizes exactly the revoke calls of one flow and is dropped when the
//! flow resolves or is cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crm_core::constants::{REVOKED_BY_USER, REVOKE_REASON_SESSION_LIMIT};
use crm_core::{RevokeOtherSessionsRequest, RevokeSessionRequest, SessionLimitError};
use tracing::{info, warn};

use crate::device::DeviceIdentityProvider;
use crate::error::AuthError;
use crate::transport::{AuthTransport, Authorization};

#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub email: String,
    password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    RevokeSession(String),
    RevokeOthers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitPhase {
    Idle,
    AwaitingResolution,
    Resolved,
}

enum LimitState {
    Idle,
    AwaitingResolution(Box<PendingResolution>),
    /// Revocation done; the credentials wait for a successful login.
    Resolved(LoginCredentials),
}

struct PendingResolution {
    limit: SessionLimitError,
    credentials: LoginCredentials,
    management_token: Option<String>,
}

pub struct SessionLimitCoordinator {
    transport: Arc<dyn AuthTransport>,
    device: Arc<dyn DeviceIdentityProvider>,
    state: Mutex<LimitState>,
}

impl SessionLimitCoordinator {
    pub fn new(transport: Arc<dyn AuthTransport>, device: Arc<dyn DeviceIdentityProvider>) -> Self {
        Self {
            transport,
            device,
            state: Mutex::new(LimitState::Idle),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn phase(&self) -> LimitPhase {
        match &*self.lock_state() {
            LimitState::Idle => LimitPhase::Idle,
            LimitState::AwaitingResolution(_) => LimitPhase::AwaitingResolution,
            LimitState::Resolved(_) => LimitPhase::Resolved,
        }
    }

    /// The pending rejection without its management token.
    #[must_use]
    pub fn pending(&self) -> Option<SessionLimitError> {
        match &*self.lock_state() {
            LimitState::AwaitingResolution(pending) => Some(pending.limit.clone()),
            _ => None,
        }
    }

    /// Parks a rejected login and returns the rejection stripped of its
    /// management token. Replaces any earlier pending flow.
    pub fn begin(
        &self,
        mut limit: SessionLimitError,
        credentials: LoginCredentials,
    ) -> SessionLimitError {
        let management_token = limit.management_token.take();
        info!(
            event = "session_limit_pending",
            current = limit.current_active_sessions,
            max = limit.max_concurrent_sessions,
            management_token = management_token.is_some()
        );
        *self.lock_state() = LimitState::AwaitingResolution(Box::new(PendingResolution {
            limit: limit.clone(),
            credentials,
            management_token,
        }));
        limit
    }

    /// Performs the chosen revocation. On success the flow moves to
    /// `Resolved` and the parked credentials are handed back for the retried
    /// login; on failure it stays pending. Once `Resolved`, the credentials
    /// are handed back again without another revoke.
    pub async fn resolve(&self, resolution: Resolution) -> Result<LoginCredentials, AuthError> {
        let (auth, limit) = match &*self.lock_state() {
            LimitState::AwaitingResolution(pending) => (
                pending
                    .management_token
                    .clone()
                    .map_or(Authorization::Anonymous, Authorization::Management),
                pending.limit.clone(),
            ),
            LimitState::Resolved(credentials) => {
                info!(event = "session_limit_login_retry");
                return Ok(credentials.clone());
            }
            LimitState::Idle => return Err(AuthError::NoPendingResolution),
        };
        let device = self.device.identity()?;
        let outcome = match &resolution {
            Resolution::RevokeSession(session_id) => {
                if limit.find_session(session_id).is_none() {
                    return Err(AuthError::UnknownSession(session_id.clone()));
                }
                let request = RevokeSessionRequest {
                    device_id: device.device_id,
                    reason: REVOKE_REASON_SESSION_LIMIT.to_string(),
                    revoked_by: REVOKED_BY_USER.to_string(),
                };
                self.transport
                    .revoke_session(&auth, session_id, &request)
                    .await
            }
            Resolution::RevokeOthers => {
                let request = RevokeOtherSessionsRequest {
                    user_id: limit.user_id.clone(),
                    keep_device_id: device.device_id,
                    reason: REVOKE_REASON_SESSION_LIMIT.to_string(),
                    revoked_by: REVOKED_BY_USER.to_string(),
                };
                self.transport.revoke_other_sessions(&auth, &request).await
            }
        };
        if let Err(err) = outcome {
            warn!(event = "session_limit_revoke_failed", error = %err);
            return Err(err);
        }

        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, LimitState::Idle) {
            LimitState::AwaitingResolution(pending) => {
                *state = LimitState::Resolved(pending.credentials.clone());
                info!(event = "session_limit_resolved", resolution = ?resolution);
                Ok(pending.credentials)
            }
            other => {
                // Cancelled while the revoke was in flight.
                *state = other;
                Err(AuthError::NoPendingResolution)
            }
        }
    }

    pub fn cancel(&self) {
        let mut state = self.lock_state();
        if !matches!(*state, LimitState::Idle) {
            info!(event = "session_limit_cancelled");
        }
        *state = LimitState::Idle;
    }

    /// Ends the flow after a successful login, whichever way it got there.
    pub fn finish(&self) {
        *self.lock_state() = LimitState::Idle;
    }
}
