use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ClientType, SessionLimitError, SessionRecord, User};

#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: String,
    pub device_fingerprint: String,
    pub client_type: ClientType,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("client_type", &self.client_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub user: User,
    pub session: SessionRecord,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub device_id: String,
    pub device_fingerprint: String,
    pub client_type: ClientType,
}

impl std::fmt::Debug for RefreshRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshRequest")
            .field("device_id", &self.device_id)
            .field("client_type", &self.client_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub session: Option<SessionRecord>,
}

/// Error body returned by the auth endpoints.
///
/// Only `code` and `message` are fixed; everything else is kept so that
/// structured rejections (session limit) can be decoded from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiErrorBody {
    #[must_use]
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self {
            code: None,
            message: (!body.trim().is_empty()).then(|| body.trim().to_string()),
            extra: Map::new(),
        })
    }

    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.code
            .as_deref()
            .is_some_and(|value| value.eq_ignore_ascii_case(code))
    }

    #[must_use]
    pub fn describe(&self) -> String {
        if let Some(message) = self.message.as_deref() {
            return message.to_string();
        }
        match self.extra.get("error") {
            Some(Value::String(error)) => error.clone(),
            _ => self.code.clone().unwrap_or_default(),
        }
    }

    /// Session-limit fields live either at the top level or under `details`.
    pub fn session_limit(&self) -> Result<SessionLimitError, serde_json::Error> {
        let source = match self.extra.get("details") {
            Some(Value::Object(details)) => details.clone(),
            _ => self.extra.clone(),
        };
        serde_json::from_value(Value::Object(source))
    }
}
