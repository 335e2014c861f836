//! Middleware module for WebTop HTTP server
//!
//! Provides:
//! - HTTP Basic authentication extractor

pub mod auth;
