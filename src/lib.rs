//! HR Webhooks - Inbound Webhook Gateway for the HR Platform
//!
//! This crate receives status-change notifications from the platform's
//! external providers (Keka, Plum, Springverify, Zoho Sign), authenticates
//! them, deduplicates redelivered events and applies each event at most once.
//!
//! # Features
//!
//! - **Signature Verification**: HMAC-SHA256 over the raw body, constant-time
//! - **Payload Parsing**: Per-provider envelopes with required-field checks
//! - **Idempotency**: Atomic claims with a lease so crashed deliveries recover
//! - **Response Policy**: One table deciding which failures providers retry
//! - **Observability**: `/health`, `/status` and Prometheus `/metrics`
//!
//! # Architecture
//!
//! ```text
//! Provider ──▶ POST /api/webhooks/{provider}
//!                  │
//!                  ▼
//!          ┌───────────────┐   ┌──────────────┐   ┌──────────────────┐
//!          │ Signature     │──▶│ Payload      │──▶│ Idempotency      │
//!          │ Verifier      │   │ Parser       │   │ Guard            │
//!          └───────────────┘   └──────────────┘   └────────┬─────────┘
//!                                                          │
//!                                                          ▼
//!                             Response Policy ◀── Event Processor
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> hr_webhooks::Result<()> {
//!     // Secrets and tunables come from the environment
//!     hr_webhooks::server::run(None).await
//! }
//! ```
//!
//! [`server::build_gateway`] wires the same router from an explicit
//! [`GatewayConfig`] for embedding or tests.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod time;
pub mod webhooks;

// Re-exports for convenience
pub use config::{ConfigError, GatewayConfig};
pub use error::{Error, Result};
pub use webhooks::{
    EventProcessor, IdempotencyGuard, ProcessingOutcome, ProviderId, ProviderRegistry,
    WebhookError, WebhookState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
