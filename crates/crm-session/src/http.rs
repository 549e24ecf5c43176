use std::time::Duration;

use async_trait::async_trait;
use crm_core::constants::{error_codes, headers};
use crm_core::{
    ActiveSessionResponse, ApiErrorBody, LoginRequest, LoginResponse, RefreshRequest,
    RefreshResponse, RevokeOtherSessionsRequest, RevokeSessionRequest, SessionRecord,
};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AuthError;
use crate::transport::{AuthTransport, Authorization};

/// [`AuthTransport`] over the CRM REST API.
#[derive(Debug, Clone)]
pub struct HttpAuthTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crm-session/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .header(headers::DEVICE_ID, &request.device_id)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        debug!(event = "login_response", status = %status);
        if status.is_success() {
            return decode_json(response).await;
        }
        let body = read_error(response).await;
        Err(classify_login_error(status, &body))
    }

    async fn refresh_token(&self, request: &RefreshRequest) -> Result<RefreshResponse, AuthError> {
        let response = self
            .client
            .post(self.url("/auth/refresh-token"))
            .header(headers::DEVICE_ID, &request.device_id)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        debug!(event = "refresh_response", status = %status);
        if status.is_success() {
            return decode_json(response).await;
        }
        let body = read_error(response).await;
        Err(classify_refresh_error(status, &body))
    }

    async fn active_session(
        &self,
        auth: &Authorization,
        device_id: &str,
    ) -> Result<Option<SessionRecord>, AuthError> {
        let builder = self
            .client
            .get(self.url("/sessions/active"))
            .header(headers::DEVICE_ID, device_id);
        let response = authorize(builder, auth).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_success() {
            let session: ActiveSessionResponse = decode_json(response).await?;
            return Ok(Some(session.into_record()));
        }
        let body = read_error(response).await;
        Err(classify_error(status, &body))
    }

    async fn revoke_session(
        &self,
        auth: &Authorization,
        session_id: &str,
        request: &RevokeSessionRequest,
    ) -> Result<(), AuthError> {
        let builder = self
            .client
            .delete(self.url(&format!("/sessions/{session_id}")))
            .header(headers::DEVICE_ID, &request.device_id)
            .json(request);
        let response = authorize(builder, auth).send().await?;
        let status = response.status();
        debug!(event = "revoke_session_response", status = %status);
        if status.is_success() {
            return Ok(());
        }
        let body = read_error(response).await;
        Err(classify_error(status, &body))
    }

    async fn revoke_other_sessions(
        &self,
        auth: &Authorization,
        request: &RevokeOtherSessionsRequest,
    ) -> Result<(), AuthError> {
        let builder = self
            .client
            .post(self.url("/sessions/revoke-others"))
            .header(headers::DEVICE_ID, &request.keep_device_id)
            .json(request);
        let response = authorize(builder, auth).send().await?;
        let status = response.status();
        debug!(event = "revoke_other_sessions_response", status = %status);
        if status.is_success() {
            return Ok(());
        }
        let body = read_error(response).await;
        Err(classify_error(status, &body))
    }
}

fn authorize(builder: reqwest::RequestBuilder, auth: &Authorization) -> reqwest::RequestBuilder {
    match auth {
        Authorization::Bearer(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
        Authorization::Management(token) => builder.header(headers::MANAGEMENT_TOKEN, token),
        Authorization::Anonymous => builder,
    }
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AuthError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| {
        let snippet = String::from_utf8_lossy(&bytes[..bytes.len().min(200)]).to_string();
        AuthError::Validation(format!("unexpected response body ({err}): {snippet}"))
    })
}

async fn read_error(response: reqwest::Response) -> ApiErrorBody {
    let body = response.text().await.unwrap_or_default();
    ApiErrorBody::parse(&body)
}

fn classify_login_error(status: StatusCode, body: &ApiErrorBody) -> AuthError {
    if body.has_code(error_codes::SESSION_LIMIT_EXCEEDED)
        && matches!(status, StatusCode::CONFLICT | StatusCode::FORBIDDEN)
    {
        return match body.session_limit() {
            Ok(limit) => AuthError::SessionLimitExceeded(Box::new(limit)),
            Err(err) => AuthError::Validation(format!("malformed session limit payload: {err}")),
        };
    }
    if status == StatusCode::UNAUTHORIZED {
        return AuthError::InvalidCredentials;
    }
    classify_error(status, body)
}

fn classify_refresh_error(status: StatusCode, body: &ApiErrorBody) -> AuthError {
    if body.has_code(error_codes::DEVICE_MISMATCH) {
        return AuthError::DeviceMismatch;
    }
    if body.has_code(error_codes::FINGERPRINT_MISMATCH) {
        return AuthError::FingerprintMismatch;
    }
    if status == StatusCode::UNAUTHORIZED || body.has_code(error_codes::INVALID_REFRESH_TOKEN) {
        return AuthError::InvalidRefreshToken;
    }
    classify_error(status, body)
}

fn classify_error(status: StatusCode, body: &ApiErrorBody) -> AuthError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return AuthError::Server {
            status: status.as_u16(),
        };
    }
    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        return AuthError::Validation(body.describe());
    }
    AuthError::Rejected {
        status: status.as_u16(),
        code: body.code.clone(),
        message: body.describe(),
    }
}
