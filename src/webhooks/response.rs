//! Response Policy
//!
//! Maps where a delivery stopped, and why, onto the status code the
//! provider sees. Providers retry on non-2xx, so the table decides which
//! failures get retried:
//!
//! | Stage       | Outcome             | Status |
//! |-------------|---------------------|--------|
//! | Signature   | Unconfigured        | 500    |
//! | Signature   | InvalidSignature    | 401    |
//! | Parse       | Malformed           | 400    |
//! | Parse       | InvalidPayload      | 400    |
//! | Idempotency | AlreadyProcessed    | 200    |
//! | Idempotency | AlreadyInFlight     | 202    |
//! | Idempotency | StoreUnavailable    | 500    |
//! | Processing  | Success             | 200    |
//! | Processing  | RecoverableFailure  | 500    |
//! | Processing  | PermanentFailure    | 200    |

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::webhooks::error::WebhookError;

/// Pipeline stage a delivery reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Signature verification
    Signature,
    /// Payload parsing
    Parse,
    /// Idempotency claim
    Idempotency,
    /// Processor invocation
    Processing,
}

impl Stage {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Parse => "parse",
            Self::Idempotency => "idempotency",
            Self::Processing => "processing",
        }
    }
}

/// Terminal outcome of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// No secret configured for the provider
    Unconfigured,
    /// Signature missing or wrong
    InvalidSignature,
    /// Body is not a JSON object
    Malformed,
    /// Required field missing
    InvalidPayload,
    /// Event already completed
    AlreadyProcessed,
    /// Event claimed by a concurrent delivery
    AlreadyInFlight,
    /// Idempotency store failed
    StoreUnavailable,
    /// Event applied
    Success,
    /// Processor failed; retry may succeed
    RecoverableFailure,
    /// Processor failed; retry will not help
    PermanentFailure,
}

impl Outcome {
    /// Stage that produced this outcome.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Unconfigured | Self::InvalidSignature => Stage::Signature,
            Self::Malformed | Self::InvalidPayload => Stage::Parse,
            Self::AlreadyProcessed | Self::AlreadyInFlight | Self::StoreUnavailable => {
                Stage::Idempotency
            }
            Self::Success | Self::RecoverableFailure | Self::PermanentFailure => {
                Stage::Processing
            }
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::InvalidSignature => "invalid_signature",
            Self::Malformed => "malformed",
            Self::InvalidPayload => "invalid_payload",
            Self::AlreadyProcessed => "already_processed",
            Self::AlreadyInFlight => "already_in_flight",
            Self::StoreUnavailable => "store_unavailable",
            Self::Success => "success",
            Self::RecoverableFailure => "recoverable_failure",
            Self::PermanentFailure => "permanent_failure",
        }
    }

    /// Whether the event was suppressed as a duplicate.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::AlreadyProcessed | Self::AlreadyInFlight)
    }
}

impl From<&WebhookError> for Outcome {
    fn from(err: &WebhookError) -> Self {
        match err {
            WebhookError::Configuration { .. } => Self::Unconfigured,
            WebhookError::Authentication { .. } => Self::InvalidSignature,
            WebhookError::MalformedPayload(_) => Self::Malformed,
            WebhookError::SemanticValidation(_) => Self::InvalidPayload,
            WebhookError::DuplicateEvent { in_flight: true, .. } => Self::AlreadyInFlight,
            WebhookError::DuplicateEvent { in_flight: false, .. } => Self::AlreadyProcessed,
            WebhookError::RecoverableProcessing(_) => Self::RecoverableFailure,
            WebhookError::PermanentProcessing(_) => Self::PermanentFailure,
            WebhookError::Storage(_) => Self::StoreUnavailable,
        }
    }
}

/// JSON body returned to providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    /// Present on 2xx responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Present when the delivery was a duplicate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    /// Client-safe error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseBody {
    /// `{"success":true}`
    pub fn success() -> Self {
        Self {
            success: Some(true),
            ..Self::default()
        }
    }

    /// `{"success":true,"duplicate":true}`
    pub fn duplicate() -> Self {
        Self {
            success: Some(true),
            duplicate: Some(true),
            error: None,
        }
    }

    /// `{"error":"<message>"}`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Status code and body for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    /// HTTP status
    pub status: StatusCode,
    /// JSON body
    pub body: ResponseBody,
    /// Outcome the response was chosen for
    pub outcome: Outcome,
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Stateless mapping from outcome to response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsePolicy;

impl ResponsePolicy {
    /// Creates the policy.
    pub fn new() -> Self {
        Self
    }

    /// Chooses the response for `outcome`.
    pub fn decide(&self, outcome: Outcome) -> WebhookResponse {
        let (status, body) = match outcome {
            Outcome::Unconfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ResponseBody::error("Webhook not configured"),
            ),
            Outcome::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, ResponseBody::error("Invalid signature"))
            }
            Outcome::Malformed => {
                (StatusCode::BAD_REQUEST, ResponseBody::error("Invalid JSON payload"))
            }
            Outcome::InvalidPayload => {
                (StatusCode::BAD_REQUEST, ResponseBody::error("Invalid payload"))
            }
            Outcome::AlreadyProcessed => (StatusCode::OK, ResponseBody::duplicate()),
            Outcome::AlreadyInFlight => (StatusCode::ACCEPTED, ResponseBody::duplicate()),
            Outcome::StoreUnavailable | Outcome::RecoverableFailure => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ResponseBody::error("Webhook processing failed"),
            ),
            Outcome::Success | Outcome::PermanentFailure => {
                (StatusCode::OK, ResponseBody::success())
            }
        };

        WebhookResponse {
            status,
            body,
            outcome,
        }
    }

    /// Chooses the response for an error raised by a pipeline stage.
    pub fn decide_error(&self, err: &WebhookError) -> WebhookResponse {
        self.decide(Outcome::from(err))
    }
}
