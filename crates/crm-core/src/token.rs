//! Expiry arithmetic over access tokens.
//!
//! Access tokens are JWT compact strings. The client never checks the
//! signature; it only reads the claims to know who is logged in and when the
//! token has to be renewed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::User;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl TokenClaims {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    #[must_use]
    pub fn user(&self) -> User {
        User {
            id: self.sub.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedToken {
    reason: &'static str,
}

impl MalformedToken {
    const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl std::fmt::Display for MalformedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed access token: {}", self.reason)
    }
}

impl std::error::Error for MalformedToken {}

pub fn decode_claims(token: &str) -> Result<TokenClaims, MalformedToken> {
    let mut segments = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(MalformedToken::new("expected three segments"));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| MalformedToken::new("payload is not base64url"))?;
    let claims: TokenClaims =
        serde_json::from_slice(&bytes).map_err(|_| MalformedToken::new("invalid claims"))?;
    if DateTime::from_timestamp(claims.exp, 0).is_none() {
        return Err(MalformedToken::new("exp out of range"));
    }
    Ok(claims)
}

/// Negative once the token is past its expiry.
#[must_use]
pub fn time_until_expiry(claims: &TokenClaims, now: DateTime<Utc>) -> Duration {
    claims.expires_at() - now
}

#[must_use]
pub fn is_expired(claims: &TokenClaims, now: DateTime<Utc>) -> bool {
    time_until_expiry(claims, now) <= Duration::zero()
}

#[must_use]
pub fn is_expiring_within(claims: &TokenClaims, now: DateTime<Utc>, threshold: Duration) -> bool {
    let remaining = time_until_expiry(claims, now);
    remaining > Duration::zero() && remaining <= threshold
}
