//! # stepwise-core
//!
//! Configuration and logging shared by the stepwise engine and CLI.

pub mod config;
pub mod logging;

pub use config::{
    ConfigError, ConfigSource, ConfigValidator, DatabaseConfig, IdentifierValidator,
    PortValidator, SslMode,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get crate version
pub fn version() -> &'static str {
    VERSION
}
