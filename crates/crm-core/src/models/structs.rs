use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ClientType, SessionStatus};

/// Client-side projection of the server's session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub device_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub client_type: ClientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

/// Binds a session to one installation.
///
/// `device_id` is generated once and never changes. `fingerprint` is derived
/// from the environment and may drift between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub fingerprint: String,
}

/// Payload of a login rejected with `SESSION_LIMIT_EXCEEDED`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionLimitError {
    #[serde(default)]
    pub plan: Option<String>,
    pub max_concurrent_sessions: u32,
    pub current_active_sessions: u32,
    #[serde(default)]
    pub active_sessions: Vec<SessionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionLimitError {
    #[must_use]
    pub fn find_session(&self, session_id: &str) -> Option<&SessionRecord> {
        self.active_sessions
            .iter()
            .find(|session| session.session_id == session_id)
    }
}

impl std::fmt::Display for SessionLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} concurrent sessions in use",
            self.current_active_sessions, self.max_concurrent_sessions
        )?;
        if let Some(plan) = self.plan.as_deref() {
            write!(f, " (plan {plan})")?;
        }
        Ok(())
    }
}
