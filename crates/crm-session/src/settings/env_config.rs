use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crm_core::ClientType;
use tracing::warn;

use super::SessionSettings;

pub(super) fn load_config(path: &str) -> SessionSettings {
    if !Path::new(path).exists() {
        warn!(event = "config_missing", path);
        return SessionSettings::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(event = "config_read_failed", path, error = %err);
            return SessionSettings::default();
        }
    };
    match serde_yaml::from_str(&contents) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(event = "config_parse_failed", path, error = %err);
            SessionSettings::default()
        }
    }
}

pub(super) fn apply_env_overrides(settings: &mut SessionSettings) {
    if let Ok(value) = env::var("CRM_API_URL") {
        if value.trim().is_empty() {
            warn!(event = "config_invalid", field = "CRM_API_URL", value = %value);
        } else {
            settings.api_url = value;
        }
    }
    if let Ok(value) = env::var("CRM_CLIENT_TYPE") {
        match ClientType::from_str(&value) {
            Ok(client_type) => settings.client_type = client_type,
            Err(_) => warn!(event = "config_invalid", field = "CRM_CLIENT_TYPE", value = %value),
        }
    }
    override_seconds("CRM_REFRESH_LEAD_SECONDS", &mut settings.refresh_lead_seconds);
    override_seconds("CRM_RETRY_BACKOFF_SECONDS", &mut settings.retry_backoff_seconds);
    override_seconds(
        "CRM_RETRY_BACKOFF_MAX_SECONDS",
        &mut settings.retry_backoff_max_seconds,
    );
    override_seconds(
        "CRM_VALIDATION_INTERVAL_SECONDS",
        &mut settings.validation_interval_seconds,
    );
    override_seconds(
        "CRM_REQUEST_TIMEOUT_SECONDS",
        &mut settings.request_timeout_seconds,
    );
}

fn override_seconds(field: &'static str, target: &mut u64) {
    let Ok(value) = env::var(field) else {
        return;
    };
    match value.trim().parse::<u64>() {
        Ok(seconds) => *target = seconds,
        Err(_) => warn!(event = "config_invalid", field, value = %value),
    }
}
