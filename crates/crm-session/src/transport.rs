use async_trait::async_trait;
use crm_core::{
    LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RevokeOtherSessionsRequest,
    RevokeSessionRequest, SessionRecord,
};

use crate::error::AuthError;

/// Credential attached to a session-management call.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    Bearer(String),
    /// Short-lived token handed out with a session-limit rejection.
    Management(String),
    Anonymous,
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bearer(_) => "Bearer(<redacted>)",
            Self::Management(_) => "Management(<redacted>)",
            Self::Anonymous => "Anonymous",
        })
    }
}

#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError>;

    async fn refresh_token(&self, request: &RefreshRequest) -> Result<RefreshResponse, AuthError>;

    /// `Ok(None)` when the server knows no session for the device.
    async fn active_session(
        &self,
        auth: &Authorization,
        device_id: &str,
    ) -> Result<Option<SessionRecord>, AuthError>;

    async fn revoke_session(
        &self,
        auth: &Authorization,
        session_id: &str,
        request: &RevokeSessionRequest,
    ) -> Result<(), AuthError>;

    async fn revoke_other_sessions(
        &self,
        auth: &Authorization,
        request: &RevokeOtherSessionsRequest,
    ) -> Result<(), AuthError>;
}
