use ::keyring::Entry;

use crate::{CredentialStore, KeystoreError};

/// OS credential manager backend (macOS Keychain, Windows Credential Manager,
/// Secret Service).
pub struct KeyringStore {
    service: String,
    namespace: String,
}

impl KeyringStore {
    /// `namespace` separates several API endpoints sharing one keychain.
    pub fn new(service: &str, namespace: &str) -> Self {
        Self {
            service: service.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, KeystoreError> {
        let account = format!("{}::{}", self.namespace, key);
        Entry::new(&self.service, &account).map_err(|err| KeystoreError::Unavailable {
            message: format!("failed to access keyring: {err}"),
        })
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeystoreError> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeystoreError::Internal {
                message: format!("failed to load {key} from keyring: {err}"),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeystoreError> {
        let entry = self.entry(key)?;
        entry
            .set_password(value)
            .map_err(|err| KeystoreError::Internal {
                message: format!("failed to store {key} in keyring: {err}"),
            })
    }

    fn remove(&self, key: &str) -> Result<(), KeystoreError> {
        let entry = self.entry(key)?;
        match entry.delete_password() {
            Ok(()) | Err(::keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeystoreError::Internal {
                message: format!("failed to delete {key} from keyring: {err}"),
            }),
        }
    }
}
