use std::env;
use std::time::Duration;

use crm_core::constants::{
    REFRESH_LEAD_TIME_SECONDS, REFRESH_RETRY_BACKOFF_SECONDS, SESSION_VALIDATION_INTERVAL_SECONDS,
};
use crm_core::ClientType;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scheduler::RefreshPolicy;

mod env_config;

pub const CONFIG_PATH_ENV: &str = "CRM_SESSION_CONFIG";
const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";
const MAX_REFRESH_LEAD_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub api_url: String,
    pub client_type: ClientType,
    pub refresh_lead_seconds: u64,
    pub retry_backoff_seconds: u64,
    pub retry_backoff_max_seconds: u64,
    pub validation_interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            client_type: ClientType::Web,
            refresh_lead_seconds: REFRESH_LEAD_TIME_SECONDS.unsigned_abs(),
            retry_backoff_seconds: REFRESH_RETRY_BACKOFF_SECONDS,
            retry_backoff_max_seconds: REFRESH_RETRY_BACKOFF_SECONDS,
            validation_interval_seconds: SESSION_VALIDATION_INTERVAL_SECONDS,
            request_timeout_seconds: 30,
        }
    }
}

impl SessionSettings {
    /// Defaults, then the YAML file named by `CRM_SESSION_CONFIG`, then
    /// `CRM_*` variables. Invalid values are logged and skipped.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => env_config::load_config(path.trim()),
            _ => Self::default(),
        };
        env_config::apply_env_overrides(&mut settings);
        settings.normalize();
        settings
    }

    fn normalize(&mut self) {
        self.api_url = self.api_url.trim().trim_end_matches('/').to_string();
        if self.refresh_lead_seconds > MAX_REFRESH_LEAD_SECONDS {
            warn!(
                event = "config_invalid",
                field = "refresh_lead_seconds",
                value = self.refresh_lead_seconds,
                clamped_to = MAX_REFRESH_LEAD_SECONDS
            );
            self.refresh_lead_seconds = MAX_REFRESH_LEAD_SECONDS;
        }
        if self.retry_backoff_seconds == 0 {
            self.retry_backoff_seconds = REFRESH_RETRY_BACKOFF_SECONDS;
        }
        if self.retry_backoff_max_seconds < self.retry_backoff_seconds {
            self.retry_backoff_max_seconds = self.retry_backoff_seconds;
        }
        if self.validation_interval_seconds == 0 {
            self.validation_interval_seconds = SESSION_VALIDATION_INTERVAL_SECONDS;
        }
    }

    #[must_use]
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            lead_time: Duration::from_secs(self.refresh_lead_seconds),
            retry_backoff: Duration::from_secs(self.retry_backoff_seconds),
            retry_backoff_max: Duration::from_secs(self.retry_backoff_max_seconds),
        }
    }

    #[must_use]
    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_seconds)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}
