use std::path::{Path, PathBuf};
use std::sync::Arc;

use crm_keystore::{CredentialStore, FileStore, KeyringStore, MemoryStore, StoreKind};
use tracing::debug;

const KEYRING_SERVICE: &str = "crm-cli";

fn credentials_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".crm").join("credentials.json"))
}

/// Credentials are namespaced by API URL so that two deployments never share
/// a session.
pub(crate) fn build_store(kind: StoreKind, api_url: &str) -> anyhow::Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match kind {
        StoreKind::Keyring => Arc::new(KeyringStore::new(KEYRING_SERVICE, api_url)),
        StoreKind::File => {
            let path = credentials_path()?;
            debug!(path = %path.display(), "using file credential store");
            Arc::new(FileStore::new(path))
        }
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
