use std::collections::HashMap;
use std::sync::Mutex;

use crate::{CredentialStore, KeystoreError};

/// Process-local store used by tests and by clients that must not persist.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, KeystoreError> {
        self.values.lock().map_err(|_| KeystoreError::Internal {
            message: "failed to lock memory store".to_string(),
        })
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeystoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeystoreError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KeystoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
