//! Webhook gateway error taxonomy.
//!
//! Every variant is resolved into an HTTP response by
//! [`ResponsePolicy`](crate::webhooks::response::ResponsePolicy); none of
//! them escape the endpoint.

use thiserror::Error;

use crate::webhooks::provider::ProviderId;

/// Errors produced while handling a single webhook delivery
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// The provider has no shared secret, so the request cannot be authenticated
    #[error("webhook secret not configured for {provider}")]
    Configuration {
        /// Provider without a secret
        provider: ProviderId,
    },

    /// The received signature is missing or does not match
    #[error("invalid webhook signature for {provider}")]
    Authentication {
        /// Provider whose signature failed
        provider: ProviderId,
    },

    /// The body is not well-formed JSON
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The body is well-formed but misses a required field
    #[error("payload failed validation: {0}")]
    SemanticValidation(String),

    /// The event was already claimed by another delivery
    #[error("duplicate delivery of event {event_id} (in flight: {in_flight})")]
    DuplicateEvent {
        /// External event id
        event_id: String,
        /// Whether the other delivery is still processing
        in_flight: bool,
    },

    /// Processing failed in a way a provider retry may fix
    #[error("recoverable processing failure: {0}")]
    RecoverableProcessing(String),

    /// Processing failed in a way no retry will fix
    #[error("permanent processing failure: {0}")]
    PermanentProcessing(String),

    /// The idempotency store could not be reached
    #[error("idempotency store error: {0}")]
    Storage(String),
}

impl WebhookError {
    /// Name used as the `error_type` label in metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Authentication { .. } => "authentication",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::SemanticValidation(_) => "semantic_validation",
            Self::DuplicateEvent { .. } => "duplicate_event",
            Self::RecoverableProcessing(_) => "recoverable_processing",
            Self::PermanentProcessing(_) => "permanent_processing",
            Self::Storage(_) => "storage",
        }
    }
}

/// Result type for webhook operations
pub type WebhookResult<T> = std::result::Result<T, WebhookError>;
