pub mod headers {
    pub const DEVICE_ID: &str = "x-device-id";
    pub const MANAGEMENT_TOKEN: &str = "x-management-token";
}

pub mod error_codes {
    pub const SESSION_LIMIT_EXCEEDED: &str = "SESSION_LIMIT_EXCEEDED";
    pub const INVALID_REFRESH_TOKEN: &str = "INVALID_REFRESH_TOKEN";
    pub const DEVICE_MISMATCH: &str = "DEVICE_MISMATCH";
    pub const FINGERPRINT_MISMATCH: &str = "FINGERPRINT_MISMATCH";
}

pub const REFRESH_LEAD_TIME_SECONDS: i64 = 5 * 60;
pub const REFRESH_RETRY_BACKOFF_SECONDS: u64 = 60;
pub const SESSION_VALIDATION_INTERVAL_SECONDS: u64 = 60;

pub const REVOKED_BY_USER: &str = "user";
pub const REVOKE_REASON_LOGOUT: &str = "logout";
pub const REVOKE_REASON_SESSION_LIMIT: &str = "session_limit";
pub const REVOKE_REASON_MANUAL: &str = "manual";
