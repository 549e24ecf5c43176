use serde::{Deserialize, Serialize};

use crate::SessionRecord;

/// `GET /sessions/active` answers either with the bare record or wrapped in
/// a `session` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ActiveSessionResponse {
    Wrapped { session: SessionRecord },
    Bare(SessionRecord),
}

impl ActiveSessionResponse {
    #[must_use]
    pub fn into_record(self) -> SessionRecord {
        match self {
            Self::Wrapped { session } | Self::Bare(session) => session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeSessionRequest {
    pub device_id: String,
    pub reason: String,
    pub revoked_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeOtherSessionsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub keep_device_id: String,
    pub reason: String,
    pub revoked_by: String,
}
