use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crm_core::{InvalidationReason, SessionRecord, SessionStatus};
use crm_keystore::CredentialStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credentials;
use crate::device::DeviceIdentityProvider;
use crate::error::AuthError;
use crate::events::{SessionInvalid, EVENT_CHANNEL_CAPACITY};
use crate::transport::{AuthTransport, Authorization};

/// Checks a server session record against the local device. Status is
/// checked first, then the device binding, then expiry.
pub fn validate_session(
    session: &SessionRecord,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<(), InvalidationReason> {
    if session.status != SessionStatus::Active {
        return Err(InvalidationReason::StatusChanged);
    }
    if session.device_id != device_id {
        return Err(InvalidationReason::DeviceMismatch);
    }
    if session.expires_at <= now {
        return Err(InvalidationReason::Expired);
    }
    Ok(())
}

/// Polls the server-side session and reports the first time it stops being
/// valid.
pub struct SessionValidator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    device: Arc<dyn DeviceIdentityProvider>,
    transport: Arc<dyn AuthTransport>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionInvalid>,
    state: Mutex<ValidatorState>,
}

#[derive(Default)]
struct ValidatorState {
    generation: u64,
    polling: bool,
    reported: bool,
    poller: Option<JoinHandle<()>>,
}

impl SessionValidator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        device: Arc<dyn DeviceIdentityProvider>,
        transport: Arc<dyn AuthTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                device,
                transport,
                clock,
                events,
                state: Mutex::new(ValidatorState::default()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionInvalid> {
        self.inner.events.subscribe()
    }

    /// Fetches the authoritative session for this device. `Ok(None)` when
    /// there is no local session or the server knows none.
    pub async fn check_now(&self) -> Result<Option<SessionRecord>, AuthError> {
        self.inner.check().await
    }

    /// Restarts polling every `interval`; the first check runs one interval
    /// from now.
    pub fn start_polling(&self, interval: Duration) {
        let mut state = self.inner.lock_state();
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
        state.generation += 1;
        state.polling = true;
        state.reported = false;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = "session_polling_not_started", reason = "no_runtime");
            return;
        };
        let interval = interval.max(Duration::from_secs(1));
        let first_tick = tokio::time::Instant::now() + interval;
        let inner = Arc::clone(&self.inner);
        state.poller = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = inner.check().await;
            }
        }));
        info!(
            event = "session_polling_started",
            interval_secs = interval.as_secs(),
            generation = state.generation
        );
    }

    pub fn stop_polling(&self) {
        let mut state = self.inner.lock_state();
        let Some(poller) = state.poller.take() else {
            state.polling = false;
            return;
        };
        poller.abort();
        state.polling = false;
        state.generation += 1;
        info!(event = "session_polling_stopped", generation = state.generation);
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.lock_state().polling
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }
}

impl Drop for SessionValidator {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ValidatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn check(&self) -> Result<Option<SessionRecord>, AuthError> {
        let Some(access_token) = credentials::access_token(self.store.as_ref())? else {
            return Ok(None);
        };
        let device = self.device.identity()?;
        let generation = self.lock_state().generation;
        let session = match self
            .transport
            .active_session(&Authorization::Bearer(access_token), &device.device_id)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(event = "session_check_failed", error = %err);
                return Err(err);
            }
        };
        let verdict = match session.as_ref() {
            Some(record) => validate_session(record, &device.device_id, self.clock.now()),
            None => Err(InvalidationReason::StatusChanged),
        };
        self.observe(generation, verdict);
        Ok(session)
    }

    fn observe(&self, generation: u64, verdict: Result<(), InvalidationReason>) {
        let mut state = self.lock_state();
        if !state.polling || state.generation != generation {
            return;
        }
        let Err(reason) = verdict else {
            return;
        };
        if state.reported {
            debug!(event = "session_invalid_repeated", reason = %reason);
            return;
        }
        state.reported = true;
        if reason.is_security_event() {
            warn!(event = "session_invalid", reason = %reason, security = true);
        } else {
            info!(event = "session_invalid", reason = %reason);
        }
        let _ = self.events.send(SessionInvalid { reason, generation });
    }
}
