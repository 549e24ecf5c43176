use crm_core::{InvalidationReason, MalformedToken, SessionLimitError};
use crm_keystore::KeystoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AuthError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server unavailable: {status}")]
    Server { status: u16 },
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("refresh token is invalid or expired")]
    InvalidRefreshToken,
    #[error("session belongs to another device")]
    DeviceMismatch,
    #[error("device fingerprint mismatch")]
    FingerprintMismatch,
    #[error("session limit exceeded: {0}")]
    SessionLimitExceeded(Box<SessionLimitError>),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("request rejected: {status} {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error(transparent)]
    Storage(#[from] KeystoreError),
    #[error(transparent)]
    MalformedToken(#[from] MalformedToken),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("no session limit resolution is pending")]
    NoPendingResolution,
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl AuthError {
    /// Failures worth retrying later with the same input.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Server { .. } | Self::Storage(_)
        )
    }

    /// Reason reported when this error ends a session.
    #[must_use]
    pub fn invalidation_reason(&self) -> InvalidationReason {
        match self {
            Self::DeviceMismatch => InvalidationReason::DeviceMismatch,
            Self::FingerprintMismatch => InvalidationReason::Suspicious,
            _ => InvalidationReason::RefreshRejected,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Validation(err.to_string())
        } else if err.is_builder() {
            Self::Validation(format!("invalid request: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}
