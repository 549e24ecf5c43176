//! Silent access-token renewal.
//!
//! One refresh is armed per access token, `lead_time` before it expires. The
//! scheduler owns a single one-shot timer and at most one in-flight refresh
//! request; every other trigger coalesces onto the in-flight one.
//!
//! `stop()` bumps the run generation. A request that completes under an older
//! generation is discarded without touching the store or re-arming, which is
//! what lets `logout()` win against a refresh already on the wire.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crm_core::constants::{REFRESH_LEAD_TIME_SECONDS, REFRESH_RETRY_BACKOFF_SECONDS};
use crm_core::{decode_claims, time_until_expiry, ClientType, RefreshRequest, RefreshResponse, TokenClaims};
use crm_keystore::CredentialStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credentials;
use crate::device::DeviceIdentityProvider;
use crate::error::AuthError;
use crate::events::{RefreshEvent, EVENT_CHANNEL_CAPACITY};
use crate::transport::AuthTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub lead_time: Duration,
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(REFRESH_LEAD_TIME_SECONDS.unsigned_abs()),
            retry_backoff: Duration::from_secs(REFRESH_RETRY_BACKOFF_SECONDS),
            retry_backoff_max: Duration::from_secs(REFRESH_RETRY_BACKOFF_SECONDS),
        }
    }
}

impl RefreshPolicy {
    /// Delay before retry number `failures` (1-based): doubles from
    /// `retry_backoff` up to `retry_backoff_max`.
    #[must_use]
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let ceiling = self.retry_backoff_max.max(self.retry_backoff);
        self.retry_backoff
            .saturating_mul(1_u32 << exponent)
            .min(ceiling)
    }

    /// Time to wait before refreshing a token with `claims`. Zero when the
    /// token is already inside the lead window or expired.
    #[must_use]
    pub fn delay_for(&self, claims: &TokenClaims, now: DateTime<Utc>) -> Duration {
        let lead = chrono::Duration::from_std(self.lead_time).unwrap_or(chrono::Duration::MAX);
        time_until_expiry(claims, now)
            .checked_sub(&lead)
            .and_then(|delay| delay.to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Another refresh was already in flight; its result applies.
    Coalesced,
    /// The scheduler was stopped while the request was in flight.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshScheduleState {
    pub running: bool,
    pub timer_pending: bool,
    pub refresh_in_flight: bool,
    pub consecutive_failures: u32,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub generation: u64,
}

pub struct RefreshScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    device: Arc<dyn DeviceIdentityProvider>,
    transport: Arc<dyn AuthTransport>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    client_type: ClientType,
    events: broadcast::Sender<RefreshEvent>,
    state: Mutex<ScheduleState>,
}

#[derive(Default)]
struct ScheduleState {
    running: bool,
    generation: u64,
    timer: Option<PendingTimer>,
    timer_seq: u64,
    in_flight: Option<u64>,
    consecutive_failures: u32,
    next_refresh_at: Option<DateTime<Utc>>,
}

struct PendingTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl ScheduleState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
        self.next_refresh_at = None;
    }

    fn halt(&mut self) {
        self.running = false;
        self.generation += 1;
        self.in_flight = None;
        self.consecutive_failures = 0;
        self.cancel_timer();
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Timer,
    Forced,
}

impl Trigger {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Forced => "forced",
        }
    }
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        device: Arc<dyn DeviceIdentityProvider>,
        transport: Arc<dyn AuthTransport>,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
        client_type: ClientType,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                device,
                transport,
                clock,
                policy,
                client_type,
                events,
                state: Mutex::new(ScheduleState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    /// Arms the timer for the stored access token. Calling it again while
    /// running re-reads the token and replaces the pending timer.
    pub fn start(&self) {
        let mut state = self.inner.lock_state();
        if !state.running {
            state.running = true;
            state.generation += 1;
            state.consecutive_failures = 0;
            info!(event = "refresh_scheduler_started", generation = state.generation);
        }
        if state.in_flight.is_some() {
            return;
        }
        self.inner.arm_from_store(&mut state, false);
    }

    /// Cancels the timer and orphans any in-flight request. Idempotent.
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        if !state.running && state.timer.is_none() && state.in_flight.is_none() {
            return;
        }
        state.halt();
        info!(event = "refresh_scheduler_stopped", generation = state.generation);
    }

    /// Refreshes now, or joins the refresh already in flight.
    pub async fn force_refresh(&self) -> Result<RefreshOutcome, AuthError> {
        Inner::refresh(&self.inner, Trigger::Forced).await
    }

    #[must_use]
    pub fn state(&self) -> RefreshScheduleState {
        let state = self.inner.lock_state();
        RefreshScheduleState {
            running: state.running,
            timer_pending: state.timer.is_some(),
            refresh_in_flight: state.in_flight.is_some(),
            consecutive_failures: state.consecutive_failures,
            next_refresh_at: state.next_refresh_at,
            generation: state.generation,
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_from_store(self: &Arc<Self>, state: &mut ScheduleState, after_refresh: bool) {
        state.cancel_timer();
        let token = match credentials::access_token(self.store.as_ref()) {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(event = "refresh_not_armed", reason = "no_access_token");
                return;
            }
            Err(err) => {
                state.consecutive_failures += 1;
                let backoff = self.policy.backoff_for(state.consecutive_failures);
                warn!(event = "access_token_unreadable", error = %err, retry_in_secs = backoff.as_secs());
                self.arm(state, backoff);
                return;
            }
        };
        let now = self.clock.now();
        let delay = match decode_claims(&token) {
            Ok(claims) => {
                let delay = self.policy.delay_for(&claims, now);
                let remaining = time_until_expiry(&claims, now);
                if after_refresh && delay.is_zero() && remaining > chrono::Duration::zero() {
                    // A freshly issued token shorter-lived than the lead time
                    // would otherwise be refreshed in a tight loop.
                    (remaining / 2).to_std().unwrap_or(Duration::ZERO)
                } else {
                    delay
                }
            }
            Err(err) => {
                warn!(event = "access_token_malformed", error = %err);
                Duration::ZERO
            }
        };
        self.arm(state, delay);
    }

    fn arm(self: &Arc<Self>, state: &mut ScheduleState, delay: Duration) {
        state.cancel_timer();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = "refresh_not_armed", reason = "no_runtime");
            return;
        };
        state.timer_seq += 1;
        let id = state.timer_seq;
        let generation = state.generation;
        let deadline = tokio::time::Instant::now() + delay;
        let inner = Arc::clone(self);
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.fire(id, generation).await;
        });
        state.next_refresh_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| self.clock.now().checked_add_signed(delay));
        state.timer = Some(PendingTimer { id, handle });
        debug!(event = "refresh_armed", delay_secs = delay.as_secs(), generation);
    }

    async fn fire(self: &Arc<Self>, timer_id: u64, generation: u64) {
        {
            let mut state = self.lock_state();
            match state.timer.as_ref() {
                Some(timer) if timer.id == timer_id => {}
                _ => return,
            }
            // Detach rather than abort: this task is the one running.
            state.timer = None;
            state.next_refresh_at = None;
            if !state.running || state.generation != generation {
                return;
            }
        }
        if let Err(err) = Self::refresh(self, Trigger::Timer).await {
            debug!(event = "scheduled_refresh_failed", error = %err);
        }
    }

    async fn refresh(self: &Arc<Self>, trigger: Trigger) -> Result<RefreshOutcome, AuthError> {
        let generation = {
            let mut state = self.lock_state();
            if !state.running {
                return Err(AuthError::NotAuthenticated);
            }
            if state.in_flight.is_some() {
                debug!(event = "refresh_coalesced", trigger = trigger.as_str());
                return Ok(RefreshOutcome::Coalesced);
            }
            state.cancel_timer();
            state.in_flight = Some(state.generation);
            state.generation
        };
        debug!(event = "refresh_started", trigger = trigger.as_str(), generation);
        let result = self.request().await;
        self.complete(generation, result)
    }

    async fn request(&self) -> Result<RefreshResponse, AuthError> {
        let refresh_token = credentials::refresh_token(self.store.as_ref())?
            .ok_or(AuthError::InvalidRefreshToken)?;
        let device = self.device.identity()?;
        let request = RefreshRequest {
            refresh_token,
            device_id: device.device_id,
            device_fingerprint: device.fingerprint,
            client_type: self.client_type,
        };
        let response = self.transport.refresh_token(&request).await?;
        decode_claims(&response.access_token)
            .map_err(|err| AuthError::Validation(err.to_string()))?;
        Ok(response)
    }

    fn complete(
        self: &Arc<Self>,
        generation: u64,
        result: Result<RefreshResponse, AuthError>,
    ) -> Result<RefreshOutcome, AuthError> {
        let mut state = self.lock_state();
        if !state.running || state.generation != generation {
            debug!(event = "refresh_result_discarded", generation);
            return Ok(RefreshOutcome::Discarded);
        }
        state.in_flight = None;

        let result = result.and_then(|response| {
            credentials::persist_refresh(self.store.as_ref(), &response, self.clock.now())
                .map(|()| response)
                .map_err(AuthError::from)
        });
        match result {
            Ok(response) => {
                state.consecutive_failures = 0;
                info!(event = "access_token_refreshed", generation);
                let _ = self.events.send(RefreshEvent::Refreshed {
                    access_token: response.access_token,
                    generation,
                });
                self.arm_from_store(&mut state, true);
                Ok(RefreshOutcome::Refreshed)
            }
            Err(err) if err.is_retryable() => {
                state.consecutive_failures += 1;
                let backoff = self.policy.backoff_for(state.consecutive_failures);
                warn!(
                    event = "refresh_retry_scheduled",
                    error = %err,
                    failures = state.consecutive_failures,
                    retry_in_secs = backoff.as_secs()
                );
                self.arm(&mut state, backoff);
                Err(err)
            }
            Err(err) => {
                warn!(event = "refresh_failed", error = %err, generation);
                if let Err(clear_err) = self.store.clear() {
                    warn!(event = "credential_clear_failed", error = %clear_err);
                }
                state.halt();
                let _ = self.events.send(RefreshEvent::Fatal {
                    error: err.clone(),
                    generation: state.generation,
                });
                Err(err)
            }
        }
    }
}
