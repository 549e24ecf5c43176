//! Typed access to the session values kept in a [`CredentialStore`].

use chrono::{DateTime, Utc};
use crm_core::{LoginResponse, RefreshResponse};
use crm_keystore::{keys, CredentialStore, KeystoreError};

pub fn access_token(store: &dyn CredentialStore) -> Result<Option<String>, KeystoreError> {
    Ok(non_empty(store.get(keys::ACCESS_TOKEN)?))
}

pub fn refresh_token(store: &dyn CredentialStore) -> Result<Option<String>, KeystoreError> {
    Ok(non_empty(store.get(keys::REFRESH_TOKEN)?))
}

pub fn session_id(store: &dyn CredentialStore) -> Result<Option<String>, KeystoreError> {
    Ok(non_empty(store.get(keys::SESSION_ID)?))
}

pub fn last_activity_at(
    store: &dyn CredentialStore,
) -> Result<Option<DateTime<Utc>>, KeystoreError> {
    let Some(raw) = non_empty(store.get(keys::LAST_ACTIVITY_AT)?) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| Some(value.with_timezone(&Utc)))
        .map_err(|err| KeystoreError::Corrupted {
            message: format!("last_activity_at: {err}"),
        })
}

pub fn touch(store: &dyn CredentialStore, now: DateTime<Utc>) -> Result<(), KeystoreError> {
    store.set(keys::LAST_ACTIVITY_AT, &now.to_rfc3339())
}

/// Writes a fresh login. On failure the store may hold a partial session;
/// callers clear it.
pub fn persist_login(
    store: &dyn CredentialStore,
    response: &LoginResponse,
    now: DateTime<Utc>,
) -> Result<(), KeystoreError> {
    store.set(keys::ACCESS_TOKEN, &response.token)?;
    store.set(keys::REFRESH_TOKEN, &response.refresh_token)?;
    store.set(keys::SESSION_ID, &response.session.session_id)?;
    touch(store, now)
}

/// The refresh token is written first: once the server rotated it, the old one
/// is useless.
pub fn persist_refresh(
    store: &dyn CredentialStore,
    response: &RefreshResponse,
    now: DateTime<Utc>,
) -> Result<(), KeystoreError> {
    store.set(keys::REFRESH_TOKEN, &response.refresh_token)?;
    store.set(keys::ACCESS_TOKEN, &response.access_token)?;
    if let Some(session) = response.session.as_ref() {
        store.set(keys::SESSION_ID, &session.session_id)?;
    }
    touch(store, now)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
