#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use crm_core::{
    ClientType, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse,
    RevokeOtherSessionsRequest, RevokeSessionRequest, SessionLimitError, SessionRecord,
    SessionStatus, User,
};
use crm_keystore::{keys, CredentialStore, MemoryStore};
use crm_session::{
    AuthError, AuthSessionController, AuthTransport, Authorization, Clock, FixedDeviceIdentity,
    RefreshPolicy, RefreshScheduler, SessionSettings, SessionValidator, TokioClock,
};
use tokio::sync::Semaphore;

pub const DEVICE_ID: &str = "device-local";
pub const PASSWORD: &str = "correct-horse";
pub const MANAGEMENT_TOKEN: &str = "mgmt-token-1";
pub const ACCESS_TTL_SECS: i64 = 600;

pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp")
}

pub fn access_token(sub: &str, expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "sub": sub,
        "exp": expires_at.timestamp(),
        "email": format!("{sub}@example.com"),
        "tenant_id": "tenant-1",
        "role": "member",
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

pub fn session_record(session_id: &str, device_id: &str, now: DateTime<Utc>) -> SessionRecord {
    SessionRecord {
        session_id: session_id.to_string(),
        device_id: device_id.to_string(),
        status: SessionStatus::Active,
        created_at: now,
        last_activity_at: now,
        expires_at: now + chrono::Duration::days(30),
        client_type: ClientType::Web,
        device_name: Some(format!("{device_id} browser")),
    }
}

/// Lets every spawned task that is ready run to its next await point.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance_secs(secs: u64) {
    tokio::time::advance(Duration::from_secs(secs)).await;
    settle().await;
}

#[derive(Debug, Clone)]
pub struct RevokeCall {
    pub auth: Authorization,
    pub session_id: Option<String>,
    pub reason: String,
    pub keep_device_id: Option<String>,
}

/// In-memory auth server with scripted failures.
pub struct FakeTransport {
    clock: Arc<dyn Clock>,
    pub max_sessions: Mutex<usize>,
    pub sessions: Mutex<Vec<SessionRecord>>,
    pub refresh_script: Mutex<VecDeque<Result<RefreshResponse, AuthError>>>,
    pub active_script: Mutex<VecDeque<Result<Option<SessionRecord>, AuthError>>>,
    pub revoke_script: Mutex<VecDeque<AuthError>>,
    pub login_script: Mutex<VecDeque<AuthError>>,
    pub refresh_gate: Mutex<Option<Arc<Semaphore>>>,
    pub refresh_requests: Mutex<Vec<RefreshRequest>>,
    pub revoke_calls: Mutex<Vec<RevokeCall>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub active_calls: AtomicUsize,
    issued: AtomicUsize,
}

impl FakeTransport {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            max_sessions: Mutex::new(usize::MAX),
            sessions: Mutex::new(Vec::new()),
            refresh_script: Mutex::new(VecDeque::new()),
            active_script: Mutex::new(VecDeque::new()),
            revoke_script: Mutex::new(VecDeque::new()),
            login_script: Mutex::new(VecDeque::new()),
            refresh_gate: Mutex::new(None),
            refresh_requests: Mutex::new(Vec::new()),
            revoke_calls: Mutex::new(Vec::new()),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            active_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_count(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn script_refresh(&self, result: Result<RefreshResponse, AuthError>) {
        self.refresh_script.lock().expect("lock").push_back(result);
    }

    pub fn script_active(&self, result: Result<Option<SessionRecord>, AuthError>) {
        self.active_script.lock().expect("lock").push_back(result);
    }

    pub fn fail_next_login(&self, error: AuthError) {
        self.login_script.lock().expect("lock").push_back(error);
    }

    pub fn fail_next_revoke(&self, error: AuthError) {
        self.revoke_script.lock().expect("lock").push_back(error);
    }

    /// Holds every refresh request until permits are added to the returned gate.
    pub fn gate_refresh(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.refresh_gate.lock().expect("lock") = Some(gate.clone());
        gate
    }

    pub fn set_max_sessions(&self, max: usize) {
        *self.max_sessions.lock().expect("lock") = max;
    }

    pub fn seed_session(&self, session_id: &str, device_id: &str) {
        let record = session_record(session_id, device_id, self.clock.now());
        self.sessions.lock().expect("lock").push(record);
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .expect("lock")
            .iter()
            .map(|session| session.session_id.clone())
            .collect()
    }

    pub fn set_session_status(&self, device_id: &str, status: SessionStatus) {
        for session in self.sessions.lock().expect("lock").iter_mut() {
            if session.device_id == device_id {
                session.status = status;
            }
        }
    }

    pub fn revokes(&self) -> Vec<RevokeCall> {
        self.revoke_calls.lock().expect("lock").clone()
    }

    fn next_id(&self) -> usize {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn mint_refresh(&self) -> RefreshResponse {
        let n = self.next_id();
        let now = self.clock.now();
        RefreshResponse {
            access_token: access_token("user-1", now + chrono::Duration::seconds(ACCESS_TTL_SECS)),
            refresh_token: format!("refresh-{n}"),
            session: None,
        }
    }

    fn take_revoke_failure(&self) -> Option<AuthError> {
        self.revoke_script.lock().expect("lock").pop_front()
    }
}

#[async_trait]
impl AuthTransport for FakeTransport {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.login_script.lock().expect("lock").pop_front() {
            return Err(err);
        }
        if request.password != PASSWORD {
            return Err(AuthError::InvalidCredentials);
        }
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().expect("lock");
        sessions.retain(|session| session.device_id != request.device_id);
        let max = *self.max_sessions.lock().expect("lock");
        if sessions.len() >= max {
            return Err(AuthError::SessionLimitExceeded(Box::new(SessionLimitError {
                plan: Some("starter".to_string()),
                max_concurrent_sessions: u32::try_from(max).unwrap_or(u32::MAX),
                current_active_sessions: u32::try_from(sessions.len()).unwrap_or(u32::MAX),
                active_sessions: sessions.clone(),
                management_token: Some(MANAGEMENT_TOKEN.to_string()),
                user_id: Some("user-1".to_string()),
            })));
        }
        let n = self.next_id();
        let session = session_record(&format!("session-{n}"), &request.device_id, now);
        sessions.push(session.clone());
        Ok(LoginResponse {
            token: access_token("user-1", now + chrono::Duration::seconds(ACCESS_TTL_SECS)),
            refresh_token: format!("refresh-{n}"),
            user: User {
                id: "user-1".to_string(),
                email: Some(request.email.clone()),
                name: Some("Test User".to_string()),
                role: Some("member".to_string()),
                tenant_id: Some("tenant-1".to_string()),
            },
            session,
        })
    }

    async fn refresh_token(&self, request: &RefreshRequest) -> Result<RefreshResponse, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_requests.lock().expect("lock").push(request.clone());
        let gate = self.refresh_gate.lock().expect("lock").clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }
        let scripted = self.refresh_script.lock().expect("lock").pop_front();
        scripted.unwrap_or_else(|| Ok(self.mint_refresh()))
    }

    async fn active_session(
        &self,
        _auth: &Authorization,
        device_id: &str,
    ) -> Result<Option<SessionRecord>, AuthError> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.active_script.lock().expect("lock").pop_front() {
            return scripted;
        }
        Ok(self
            .sessions
            .lock()
            .expect("lock")
            .iter()
            .find(|session| session.device_id == device_id)
            .cloned())
    }

    async fn revoke_session(
        &self,
        auth: &Authorization,
        session_id: &str,
        request: &RevokeSessionRequest,
    ) -> Result<(), AuthError> {
        self.revoke_calls.lock().expect("lock").push(RevokeCall {
            auth: auth.clone(),
            session_id: Some(session_id.to_string()),
            reason: request.reason.clone(),
            keep_device_id: None,
        });
        if let Some(err) = self.take_revoke_failure() {
            return Err(err);
        }
        self.sessions
            .lock()
            .expect("lock")
            .retain(|session| session.session_id != session_id);
        Ok(())
    }

    async fn revoke_other_sessions(
        &self,
        auth: &Authorization,
        request: &RevokeOtherSessionsRequest,
    ) -> Result<(), AuthError> {
        self.revoke_calls.lock().expect("lock").push(RevokeCall {
            auth: auth.clone(),
            session_id: None,
            reason: request.reason.clone(),
            keep_device_id: Some(request.keep_device_id.clone()),
        });
        if let Some(err) = self.take_revoke_failure() {
            return Err(err);
        }
        self.sessions
            .lock()
            .expect("lock")
            .retain(|session| session.device_id == request.keep_device_id);
        Ok(())
    }
}

pub struct Harness {
    pub clock: Arc<TokioClock>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<FakeTransport>,
    pub device: Arc<FixedDeviceIdentity>,
}

impl Harness {
    /// Must be created after the paused runtime started.
    pub fn new() -> Self {
        let clock = Arc::new(TokioClock::starting_at(epoch()));
        let transport = Arc::new(FakeTransport::new(clock.clone()));
        Self {
            clock,
            store: Arc::new(MemoryStore::new()),
            transport,
            device: Arc::new(FixedDeviceIdentity::new(DEVICE_ID, "fp-local")),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Persists a logged-in session whose access token expires `expires_in`
    /// seconds from now.
    pub fn seed_tokens(&self, expires_in: i64) {
        let expires_at = self.now() + chrono::Duration::seconds(expires_in);
        self.store
            .set(keys::ACCESS_TOKEN, &access_token("user-1", expires_at))
            .expect("set access");
        self.store
            .set(keys::REFRESH_TOKEN, "refresh-0")
            .expect("set refresh");
        self.store.set(keys::SESSION_ID, "session-0").expect("set session");
        self.transport.seed_session("session-0", DEVICE_ID);
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key).expect("get")
    }

    pub fn store_set(&self, key: &str, value: &str) {
        self.store.set(key, value).expect("set");
    }

    pub fn store_remove(&self, key: &str) {
        self.store.remove(key).expect("remove");
    }

    pub fn scheduler(&self) -> RefreshScheduler {
        self.scheduler_with_policy(RefreshPolicy::default())
    }

    pub fn scheduler_with_policy(&self, policy: RefreshPolicy) -> RefreshScheduler {
        RefreshScheduler::new(
            self.store.clone(),
            self.device.clone(),
            self.transport.clone(),
            self.clock.clone(),
            policy,
            ClientType::Web,
        )
    }

    pub fn validator(&self) -> SessionValidator {
        SessionValidator::new(
            self.store.clone(),
            self.device.clone(),
            self.transport.clone(),
            self.clock.clone(),
        )
    }

    pub fn controller(&self) -> Arc<AuthSessionController> {
        AuthSessionController::new(
            SessionSettings::default(),
            self.store.clone(),
            self.device.clone(),
            self.transport.clone(),
            self.clock.clone(),
        )
    }
}
