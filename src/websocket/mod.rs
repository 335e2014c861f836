//! WebSocket module for WebTop
//!
//! Provides real-time communication endpoints:
//! - /ws/terminal - Interactive shell with periodic host statistics

pub mod terminal;

pub use terminal::{terminal_handler, TerminalSettings};

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new().route("/ws/terminal", get(terminal_handler))
}
