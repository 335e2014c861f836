//! Web API module for WebTop
//!
//! Provides REST API endpoints for:
//! - Remote file management (list, read, write, transfer, archive)
//! - Health checks

pub mod files;
pub mod health;
pub mod response;

use axum::Router;

pub use files::{files_routes, UploadDir};
pub use health::health_routes;

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new().merge(files_routes())
}
