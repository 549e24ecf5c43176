use std::sync::{Arc, Mutex, PoisonError};

use crm_core::DeviceIdentity;
use crm_keystore::{keys, CredentialStore};
use tracing::{debug, info};

use crate::error::AuthError;

pub trait DeviceIdentityProvider: Send + Sync {
    fn identity(&self) -> Result<DeviceIdentity, AuthError>;
}

/// Device id persisted next to the session credentials.
///
/// The id is created on first use and survives logout; only the fingerprint
/// is recomputed per process.
pub struct StoredDeviceIdentity {
    store: Arc<dyn CredentialStore>,
    fingerprint: String,
    cached: Mutex<Option<String>>,
}

impl StoredDeviceIdentity {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_fingerprint(store, environment_fingerprint())
    }

    pub fn with_fingerprint(store: Arc<dyn CredentialStore>, fingerprint: String) -> Self {
        Self {
            store,
            fingerprint,
            cached: Mutex::new(None),
        }
    }

    fn device_id(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(device_id) = cached.as_ref() {
            return Ok(device_id.clone());
        }
        let device_id = match self.store.get(keys::DEVICE_ID)? {
            Some(existing) if !existing.trim().is_empty() => {
                debug!(event = "device_id_loaded");
                existing
            }
            _ => {
                let created = uuid::Uuid::now_v7().to_string();
                self.store.set(keys::DEVICE_ID, &created)?;
                info!(event = "device_id_created", device_id = %created);
                created
            }
        };
        *cached = Some(device_id.clone());
        Ok(device_id)
    }
}

impl DeviceIdentityProvider for StoredDeviceIdentity {
    fn identity(&self) -> Result<DeviceIdentity, AuthError> {
        Ok(DeviceIdentity {
            device_id: self.device_id()?,
            fingerprint: self.fingerprint.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FixedDeviceIdentity(pub DeviceIdentity);

impl FixedDeviceIdentity {
    pub fn new(device_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self(DeviceIdentity {
            device_id: device_id.into(),
            fingerprint: fingerprint.into(),
        })
    }
}

impl DeviceIdentityProvider for FixedDeviceIdentity {
    fn identity(&self) -> Result<DeviceIdentity, AuthError> {
        Ok(self.0.clone())
    }
}

/// Stable digest of the host environment.
pub fn environment_fingerprint() -> String {
    let mut parts = vec![
        format!("os={}", std::env::consts::OS),
        format!("arch={}", std::env::consts::ARCH),
        format!("family={}", std::env::consts::FAMILY),
        format!("app={}", env!("CARGO_PKG_VERSION")),
    ];
    for var in ["HOSTNAME", "COMPUTERNAME", "USER", "USERNAME", "LANG"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                parts.push(format!("{}={value}", var.to_ascii_lowercase()));
            }
        }
    }
    if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
        parts.push(format!("machine={}", machine_id.trim()));
    }
    fingerprint_of(&parts)
}

fn fingerprint_of(parts: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    format!("b3:{}", hasher.finalize().to_hex())
}
