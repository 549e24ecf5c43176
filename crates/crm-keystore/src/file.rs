use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{CredentialStore, KeystoreError};

/// JSON file backend for headless machines without a keyring daemon.
///
/// The whole map is rewritten on every change; the file is created with
/// owner-only permissions on unix.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>, KeystoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(|err| KeystoreError::Unavailable {
            message: format!("{}: {err}", self.path.display()),
        })?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|err| KeystoreError::Corrupted {
            message: format!("{}: {err}", self.path.display()),
        })
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), KeystoreError> {
        let unavailable = |err: std::io::Error| KeystoreError::Unavailable {
            message: format!("{}: {err}", self.path.display()),
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(unavailable)?;
        }
        let contents = serde_json::to_string_pretty(values).map_err(|err| {
            KeystoreError::Internal {
                message: err.to_string(),
            }
        })?;
        fs::write(&self.path, contents).map_err(unavailable)?;
        restrict_permissions(&self.path).map_err(unavailable)
    }

    fn update<F>(&self, change: F) -> Result<(), KeystoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.lock.lock().map_err(|_| KeystoreError::Internal {
            message: "failed to lock file store".to_string(),
        })?;
        let mut values = self.read()?;
        if change(&mut values) {
            self.write(&values)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeystoreError> {
        let _guard = self.lock.lock().map_err(|_| KeystoreError::Internal {
            message: "failed to lock file store".to_string(),
        })?;
        Ok(self.read()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeystoreError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), KeystoreError> {
        self.update(|values| values.remove(key).is_some())
    }

    fn clear(&self) -> Result<(), KeystoreError> {
        self.update(|values| {
            let before = values.len();
            values.retain(|key, _| !crate::keys::SESSION.contains(&key.as_str()));
            values.len() != before
        })
    }
}
