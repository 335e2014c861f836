//! Authentication middleware for Axum
//!
//! HTTP Basic authentication against the configured credentials. Provides
//! the `RequireAuth` extractor for handlers, including the WebSocket upgrade.

use crate::server::config::AuthConfig;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Realm announced in the Basic challenge
pub const REALM: &str = "WebTop Login";

/// Configured Basic credentials
#[derive(Debug)]
pub struct BasicAuth {
    enabled: bool,
    username: String,
    password: SecretString,
}

impl BasicAuth {
    /// Enabled authenticator accepting exactly `username`/`password`
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            enabled: true,
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Authenticator that accepts every request
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            username: String::new(),
            password: SecretString::from(String::new()),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let password = config
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();
        Self::new(config.username.clone(), password)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Constant-time credential check
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let pass_ok = self
            .password
            .expose_secret()
            .as_bytes()
            .ct_eq(password.as_bytes());
        bool::from(user_ok & pass_ok)
    }
}

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    success: bool,
    message: String,
    code: String,
}

impl AuthErrorResponse {
    fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Why a request was not authenticated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    MissingCredentials,
    InvalidCredentials,
    Internal(String),
}

/// Auth rejection type
pub struct AuthRejection {
    status: StatusCode,
    body: AuthErrorResponse,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            let challenge = format!("Basic realm=\"{}\"", REALM);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

impl From<AuthError> for AuthRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Authentication required", "UNAUTHORIZED"),
            },
            AuthError::InvalidCredentials => AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                body: AuthErrorResponse::new("Invalid username or password", "INVALID_CREDENTIALS"),
            },
            AuthError::Internal(msg) => AuthRejection {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: AuthErrorResponse::new(msg, "INTERNAL_ERROR"),
            },
        }
    }
}

// ============================================================================
// RequireAuth Extractor
// ============================================================================

/// Axum extractor that requires Basic authentication.
///
/// Holds the authenticated user name (`anonymous` when auth is disabled).
pub struct RequireAuth(pub String);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<Arc<BasicAuth>>()
            .ok_or_else(|| AuthError::Internal("Authentication not configured".to_string()))?;

        if !auth.is_enabled() {
            return Ok(RequireAuth("anonymous".to_string()));
        }

        let (username, password) = extract_basic(parts)?;
        if !auth.verify(&username, &password) {
            debug!(user = %username, "Rejected Basic credentials");
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(RequireAuth(username))
    }
}

/// Decode `Authorization: Basic <base64(user:pass)>`
fn extract_basic(parts: &Parts) -> std::result::Result<(String, String), AuthError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(AuthError::MissingCredentials)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidCredentials)?;

    decoded
        .split_once(':')
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .ok_or(AuthError::InvalidCredentials)
}
