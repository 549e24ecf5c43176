//! Durable storage for session credentials.
//!
//! Backends hold plain string values under the keys in [`keys`]. They know
//! nothing about tokens or networking.

mod file;
mod os_keyring;
mod memory;

pub use crate::file::FileStore;
pub use crate::os_keyring::KeyringStore;
pub use crate::memory::MemoryStore;

pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const SESSION_ID: &str = "session_id";
    pub const LAST_ACTIVITY_AT: &str = "last_activity_at";
    pub const DEVICE_ID: &str = "device_id";

    /// Everything `clear` removes. `DEVICE_ID` is deliberately absent.
    pub const SESSION: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, SESSION_ID, LAST_ACTIVITY_AT];
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("credential store unavailable: {message}")]
    Unavailable { message: String },
    #[error("credential store corrupted: {message}")]
    Corrupted { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, KeystoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), KeystoreError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), KeystoreError>;

    /// Drops every session credential; the device id survives.
    fn clear(&self) -> Result<(), KeystoreError> {
        let mut first_error = None;
        for key in keys::SESSION {
            if let Err(err) = self.remove(key) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Keyring,
    File,
    Memory,
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown credential store: {other}")),
        }
    }
}
