//! Health check endpoints with component-level diagnostics.
//!
//! Provides:
//! - `/health`: simple "healthy" + version (for load balancers)
//! - `/health/detailed`: SSH connection state and SFTP availability

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use webtop_core::{ConnectionState, ConnectionSupervisor};

use crate::middleware::auth::RequireAuth;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health response with per-component checks
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

/// All component health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub ssh: ComponentHealth,
    pub sftp: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn healthy_with_details(details: serde_json::Value) -> Self {
        Self {
            status: "healthy",
            error: None,
            details: Some(details),
        }
    }

    fn unhealthy(error: String, details: Option<serde_json::Value>) -> Self {
        Self {
            status: "unhealthy",
            error: Some(error),
            details,
        }
    }
}

/// Simple health check (for load balancers)
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Detailed health check (requires authentication)
async fn detailed_health_check(
    RequireAuth(_user): RequireAuth,
    Extension(supervisor): Extension<Arc<ConnectionSupervisor>>,
) -> Json<DetailedHealthResponse> {
    let ssh = check_ssh(&supervisor);
    let sftp = check_sftp(&supervisor);

    let status = match (ssh.status, sftp.status) {
        ("healthy", "healthy") => "healthy",
        ("healthy", _) => "degraded",
        _ => "unhealthy",
    };

    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks { ssh, sftp },
    })
}

/// Check the supervised SSH session
fn check_ssh(supervisor: &ConnectionSupervisor) -> ComponentHealth {
    let state = supervisor.state();
    let details = serde_json::json!({
        "state": state.as_str(),
        "attempts": supervisor.attempts(),
    });
    if state == ConnectionState::Ready {
        ComponentHealth::healthy_with_details(details)
    } else {
        ComponentHealth::unhealthy(format!("session is {}", state), Some(details))
    }
}

/// Check the SFTP sub-channel
fn check_sftp(supervisor: &ConnectionSupervisor) -> ComponentHealth {
    if supervisor.filesystem().is_some() {
        ComponentHealth::healthy_with_details(serde_json::json!({ "available": true }))
    } else {
        ComponentHealth::unhealthy("filesystem channel unavailable".to_string(), None)
    }
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{body_json, test_app, TestApp};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_component_health_unhealthy() {
        let h = ComponentHealth::unhealthy("connection refused".to_string(), None);
        assert_eq!(h.status, "unhealthy");
        assert_eq!(h.error.as_deref(), Some("connection refused"));
        assert!(h.details.is_none());
    }

    #[test]
    fn test_health_response_serialization() {
        let resp = HealthResponse {
            status: "healthy",
            version: "0.1.0",
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("0.1.0"));
    }

    #[tokio::test]
    async fn test_detailed_health_ready() {
        let TestApp { router, .. } = test_app().await;
        let response = router
            .oneshot(Request::get("/health/detailed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"]["ssh"]["details"]["state"], "ready");
        assert_eq!(json["checks"]["sftp"]["details"]["available"], true);
    }

    #[tokio::test]
    async fn test_detailed_health_after_disconnect() {
        let TestApp { router, session, .. } = test_app().await;
        session.close();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let response = router
            .oneshot(Request::get("/health/detailed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["checks"]["sftp"]["status"], "unhealthy");
    }
}
