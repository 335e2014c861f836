//! JSON envelopes and error mapping for the file API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

/// Body of every successful mutation
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    pub success: bool,
    pub message: String,
    pub path: String,
}

impl MutationResponse {
    pub fn ok(message: impl Into<String>, path: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            path: path.into(),
        })
    }
}

/// Body of every failed request
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    code: &'static str,
}

/// Handler error carrying a core error
#[derive(Debug)]
pub struct ApiError(pub webtop_core::Error);

impl From<webtop_core::Error> for ApiError {
    fn from(err: webtop_core::Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use webtop_core::Error;
        match &self.0 {
            Error::SessionUnavailable | Error::Connection(_) | Error::Channel(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidOperation(_)
            | Error::InvalidInput(_)
            | Error::DirectoryNotEmpty(_)
            | Error::NoValidPaths => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            warn!(code = self.0.code(), error = %self.0, "Request rejected");
        }
        let body = ErrorBody {
            success: false,
            message: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for file API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use webtop_core::Error;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::SessionUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (Error::Channel("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::NotFound("/a".into()), StatusCode::NOT_FOUND),
            (Error::InvalidOperation("/".into()), StatusCode::BAD_REQUEST),
            (Error::DirectoryNotEmpty("/d".into()), StatusCode::BAD_REQUEST),
            (Error::NoValidPaths, StatusCode::BAD_REQUEST),
            (Error::Remote("denied".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = ApiError(Error::NotFound("/missing".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "NOT_FOUND");
        assert!(json["message"].as_str().unwrap().contains("/missing"));
    }
}
