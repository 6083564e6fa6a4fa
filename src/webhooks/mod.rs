//! Inbound Webhook Gateway
//!
//! Receives status-change notifications from the HR platform's providers:
//!
//! - **Keka** (HRMS): employee lifecycle, leave, payroll
//! - **Plum** (insurance): member enrolment, policies, claims
//! - **Springverify** (background verification): verification results
//! - **Zoho Sign** (e-signature): signature request status
//!
//! Each delivery is authenticated against the provider's shared secret,
//! parsed, deduplicated by the provider's event id and handed to that
//! provider's [`EventProcessor`] at most once.
//!
//! # Architecture
//!
//! ```text
//! Request -> Signature Verify -> Parse -> Idempotency Claim -> Process -> Respond
//!                   |              |              |               |
//!                   v              v              v               v
//!                401/500          400      200/202 (duplicate)   200/500
//! ```
//!
//! # Security
//!
//! - Secrets loaded from environment; a provider without one fails closed
//! - HMAC-SHA256 over the raw body, constant-time comparison
//! - Secrets and signatures never appear in logs or responses
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use hr_webhooks::handlers::AppState;
//! use hr_webhooks::time::SystemClock;
//! use hr_webhooks::webhooks::{
//!     webhook_router, IdempotencyGuard, InMemoryIdempotencyStore, LoggingProcessor,
//!     ProviderRegistry, WebhookState, DEFAULT_CLAIM_LEASE,
//! };
//!
//! let registry = ProviderRegistry::from_secrets(&HashMap::new(), |_| Arc::new(LoggingProcessor));
//! let guard = IdempotencyGuard::new(
//!     Arc::new(InMemoryIdempotencyStore::default()),
//!     Arc::new(SystemClock),
//!     DEFAULT_CLAIM_LEASE,
//! );
//! let state = WebhookState::new(registry, guard, Arc::new(AppState::new()));
//! let app = webhook_router(Arc::new(state));
//! ```

pub mod error;
pub mod events;
pub mod handler;
pub mod idempotency;
pub mod processor;
pub mod provider;
pub mod response;
pub mod signature;

// Re-export commonly used items
pub use error::{WebhookError, WebhookResult};
pub use events::{
    body_fingerprint, EventKind, IncomingWebhookRequest, ParseError, ParseErrorKind, ParsedEvent,
    PayloadParser,
};
pub use handler::{
    handle_delivery, receive_webhook, webhook_liveness, webhook_router, WebhookState,
    DEFAULT_PROCESSING_TIMEOUT,
};
pub use idempotency::{
    ClaimHandle, ClaimOutcome, IdempotencyGuard, IdempotencyKey, IdempotencyRecord,
    IdempotencyStore, InMemoryIdempotencyStore, RecordState, ReleaseOutcome, DEFAULT_CLAIM_LEASE,
    DEFAULT_MAX_RECORDS, DEFAULT_RETENTION,
};
pub use processor::{
    process_with_timeout, EventProcessor, LoggingProcessor, NoOpProcessor, ProcessingOutcome,
};
pub use provider::{
    ProviderConfig, ProviderId, ProviderRegistry, SignatureAlgorithm, UnknownProvider,
    WebhookSecret, GENERIC_SIGNATURE_HEADER,
};
pub use response::{Outcome, ResponseBody, ResponsePolicy, Stage, WebhookResponse};
pub use signature::{compute_signature, verify_with_secret, SignatureVerifier, VerificationResult};
