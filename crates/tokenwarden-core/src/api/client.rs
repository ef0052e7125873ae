//! HTTP client for the authentication endpoints.
//!
//! `AuthBackend` is the seam between the session state machine and the
//! transport; `HttpAuthBackend` is the reqwest implementation. Responses
//! are returned as raw JSON so the session layer owns shape normalization.

use std::future::Future;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::AuthHeader;
use crate::config::SessionConfig;

use super::ApiError;

/// Sign-in form payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// The authentication endpoints consumed by the session service.
pub trait AuthBackend: Send + Sync + 'static {
    /// `POST /auth/login`
    fn login(&self, request: &LoginRequest) -> impl Future<Output = Result<Value, ApiError>> + Send;

    /// `POST /auth/logout`
    fn logout(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// `POST /auth/refresh-token`
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<Value, ApiError>> + Send;

    /// `GET /auth/me`
    fn current_user(&self) -> impl Future<Output = Result<Value, ApiError>> + Send;
}

/// reqwest-backed auth client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    config: SessionConfig,
    auth_header: AuthHeader,
}

impl HttpAuthBackend {
    /// Create a new client reading the default authorization header from
    /// `auth_header` at request time.
    pub fn new(config: SessionConfig, auth_header: AuthHeader) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            auth_header,
        })
    }

    fn default_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(value) = self.auth_header.get() {
            headers.insert(header::AUTHORIZATION, value);
        }
        headers
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn read_json(response: reqwest::Response, url: &str) -> Result<Value, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::MalformedResponse(format!("invalid JSON from {}: {}", url, e))
        })
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
        let url = self.config.url(path);
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .json(body)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::read_json(response, &url).await
    }
}

impl AuthBackend for HttpAuthBackend {
    async fn login(&self, request: &LoginRequest) -> Result<Value, ApiError> {
        self.post_json(&self.config.login_path, request).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let url = self.config.url(&self.config.logout_path);
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(&url)
            .headers(self.default_headers())
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Value, ApiError> {
        self.post_json(&self.config.refresh_path, &RefreshRequest { refresh_token })
            .await
    }

    async fn current_user(&self) -> Result<Value, ApiError> {
        let url = self.config.url(&self.config.me_path);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .headers(self.default_headers())
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::read_json(response, &url).await
    }
}
