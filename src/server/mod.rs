//! Server module for WebTop
//!
//! Contains the main server initialization and runtime logic.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Startup and production configuration checks
//! - `shutdown`: Signal handling
//! - `init`: Main server initialization and run loop

pub mod config;
pub(crate) mod init;
mod loader;
mod shutdown;
mod validation;

// Re-export public API
pub use init::run;
pub use loader::load_config;
pub use validation::validate_config;
