//! Error types for the webhook gateway
//!
//! Per-delivery failures are [`WebhookError`]s and never leave the HTTP
//! handler; this top-level type covers startup and serving.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::webhooks::WebhookError;

/// The main error type for gateway startup and serving
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (binding, serving)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;
