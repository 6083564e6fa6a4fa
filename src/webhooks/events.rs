//! Webhook Event Types
//!
//! The captured request, the provider envelopes and the uniform
//! [`ParsedEvent`] handed to processors.
//!
//! Parsing happens in two steps. The body must first be a well-formed JSON
//! object ([`ParseErrorKind::Malformed`] otherwise); the provider envelope is
//! then checked for its required fields ([`ParseErrorKind::Invalid`]).

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::webhooks::error::WebhookError;
use crate::webhooks::provider::ProviderId;

// ============================================================================
// Incoming request
// ============================================================================

/// A webhook request exactly as received. Immutable once captured.
#[derive(Debug, Clone)]
pub struct IncomingWebhookRequest {
    provider: ProviderId,
    body: Bytes,
    signature: String,
    received_at: DateTime<Utc>,
}

impl IncomingWebhookRequest {
    /// Captures a request.
    pub fn new(
        provider: ProviderId,
        body: Bytes,
        signature: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            body,
            signature: signature.into(),
            received_at,
        }
    }

    /// Target provider.
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Raw body bytes, never re-encoded.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Received signature; empty when no header was present.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// When the gateway received the request.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

// ============================================================================
// Event catalogue
// ============================================================================

/// Known provider event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Keka
    EmployeeCreated,
    EmployeeUpdated,
    EmployeeTerminated,
    LeaveApproved,
    LeaveRejected,
    PayrollProcessed,

    // Plum
    MemberEnrolled,
    MemberUpdated,
    PolicyActivated,
    PolicyRenewed,
    ClaimSubmitted,
    ClaimProcessed,

    // Springverify
    VerificationCompleted,
    VerificationFailed,
    CandidateUpdated,

    // Zoho Sign reports every change as a request status update
    SignatureStatusChanged,

    /// Anything we do not recognise
    Unknown,
}

impl EventKind {
    /// Maps a provider's event type string onto the catalogue.
    pub fn classify(provider: ProviderId, event_type: &str) -> Self {
        match (provider, event_type) {
            (ProviderId::Keka, "employee.created") => Self::EmployeeCreated,
            (ProviderId::Keka, "employee.updated") => Self::EmployeeUpdated,
            (ProviderId::Keka, "employee.terminated") => Self::EmployeeTerminated,
            (ProviderId::Keka, "leave.approved") => Self::LeaveApproved,
            (ProviderId::Keka, "leave.rejected") => Self::LeaveRejected,
            (ProviderId::Keka, "payroll.processed") => Self::PayrollProcessed,
            (ProviderId::Plum, "member.enrolled") => Self::MemberEnrolled,
            (ProviderId::Plum, "member.updated") => Self::MemberUpdated,
            (ProviderId::Plum, "policy.activated") => Self::PolicyActivated,
            (ProviderId::Plum, "policy.renewed") => Self::PolicyRenewed,
            (ProviderId::Plum, "claim.submitted") => Self::ClaimSubmitted,
            (ProviderId::Plum, "claim.processed") => Self::ClaimProcessed,
            (ProviderId::Springverify, "verification.completed") => Self::VerificationCompleted,
            (ProviderId::Springverify, "verification.failed") => Self::VerificationFailed,
            (ProviderId::Springverify, "candidate.updated") => Self::CandidateUpdated,
            (ProviderId::ZohoSign, _) => Self::SignatureStatusChanged,
            _ => Self::Unknown,
        }
    }

    /// Check if this is a known event type
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

// ============================================================================
// Parsed event
// ============================================================================

/// A verified, parsed event in provider-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedEvent {
    /// Sending provider
    pub provider: ProviderId,
    /// Provider event type, e.g. `employee.terminated`
    pub event_type: String,
    /// Employee, member, candidate or signature-request id, when supplied
    pub entity_id: Option<String>,
    /// Deduplication key; a body hash when the provider sends no id
    pub event_id: String,
    /// Provider timestamp, verbatim
    pub occurred_at: Option<String>,
    /// The full payload
    pub data: Value,
}

impl ParsedEvent {
    /// Catalogue entry for this event.
    pub fn kind(&self) -> EventKind {
        EventKind::classify(self.provider, &self.event_type)
    }
}

// ============================================================================
// Parse errors
// ============================================================================

/// Distinguishes syntax failures from missing fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Not well-formed structured text
    Malformed,
    /// Well-formed but semantically incomplete
    Invalid,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

/// Payload parsing failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} payload: {detail}")]
pub struct ParseError {
    /// Failure class
    pub kind: ParseErrorKind,
    /// Diagnostic detail; logged, never returned to the caller
    pub detail: String,
}

impl ParseError {
    fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::Malformed,
            detail: detail.into(),
        }
    }

    fn invalid(detail: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::Invalid,
            detail: detail.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::invalid(format!("missing required field `{field}`"))
    }
}

impl From<ParseError> for WebhookError {
    fn from(err: ParseError) -> Self {
        match err.kind {
            ParseErrorKind::Malformed => WebhookError::MalformedPayload(err.detail),
            ParseErrorKind::Invalid => WebhookError::SemanticValidation(err.detail),
        }
    }
}

// ============================================================================
// Provider envelopes
// ============================================================================

#[derive(Debug, Deserialize)]
struct KekaEnvelope {
    #[serde(default)]
    id: Scalar,
    #[serde(default, rename = "eventId")]
    event_id_camel: Scalar,
    #[serde(default)]
    event_id: Scalar,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    timestamp: Scalar,
    #[serde(default, deserialize_with = "lenient")]
    data: Option<KekaData>,
}

#[derive(Debug, Deserialize)]
struct KekaData {
    #[serde(default, rename = "employeeId")]
    employee_id: Scalar,
    #[serde(default, deserialize_with = "lenient")]
    employee: Option<KekaEmployeeRef>,
}

#[derive(Debug, Deserialize)]
struct KekaEmployeeRef {
    #[serde(default)]
    id: Scalar,
}

#[derive(Debug, Deserialize)]
struct PlumEnvelope {
    #[serde(default)]
    event_id: Scalar,
    #[serde(default)]
    id: Scalar,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    member_id: Scalar,
    #[serde(default)]
    timestamp: Scalar,
}

#[derive(Debug, Deserialize)]
struct SpringverifyEnvelope {
    #[serde(default)]
    event_id: Scalar,
    #[serde(default)]
    id: Scalar,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    candidate_id: Scalar,
    #[serde(default)]
    timestamp: Scalar,
}

#[derive(Debug, Deserialize)]
struct ZohoEnvelope {
    #[serde(default)]
    requests: Option<ZohoRequests>,
    #[serde(default, deserialize_with = "lenient")]
    notifications: Option<ZohoNotifications>,
}

#[derive(Debug, Deserialize)]
struct ZohoRequests {
    #[serde(default)]
    request_id: Scalar,
    #[serde(default)]
    request_status: Scalar,
}

#[derive(Debug, Deserialize)]
struct ZohoNotifications {
    #[serde(default)]
    notification_id: Scalar,
    #[serde(default)]
    operation_type: Scalar,
    #[serde(default)]
    performed_at: Scalar,
}

/// Identifier or metadata field. Strings and numbers become text; any other
/// JSON type is treated as absent.
#[derive(Debug, Default)]
struct Scalar(Option<String>);

impl Scalar {
    fn present(self) -> Option<String> {
        present(self.0)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(match Value::deserialize(deserializer)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }))
    }
}

/// Optional nested object; a value of the wrong shape is treated as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Drops empty and whitespace-only strings.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// First non-empty candidate, in order.
fn first_present<const N: usize>(candidates: [Scalar; N]) -> Option<String> {
    candidates.into_iter().find_map(Scalar::present)
}

// ============================================================================
// Parser
// ============================================================================

/// Turns verified raw bodies into [`ParsedEvent`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadParser;

impl PayloadParser {
    /// Creates a parser.
    pub fn new() -> Self {
        Self
    }

    /// Parses `raw_body` as an event from `provider`.
    pub fn parse(&self, provider: ProviderId, raw_body: &[u8]) -> Result<ParsedEvent, ParseError> {
        let value: Value =
            serde_json::from_slice(raw_body).map_err(|e| ParseError::malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ParseError::malformed("payload is not a JSON object"));
        }

        let fields = match provider {
            ProviderId::Keka => parse_keka(&value)?,
            ProviderId::Plum => parse_plum(&value)?,
            ProviderId::Springverify => parse_springverify(&value)?,
            ProviderId::ZohoSign => parse_zoho(&value)?,
        };

        Ok(ParsedEvent {
            provider,
            event_type: fields.event_type,
            entity_id: fields.entity_id,
            event_id: fields
                .event_id
                .unwrap_or_else(|| body_fingerprint(raw_body)),
            occurred_at: fields.occurred_at,
            data: value,
        })
    }
}

/// Stable substitute event id: `sha256:<hex of the raw body>`.
pub fn body_fingerprint(raw_body: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(raw_body)))
}

struct EnvelopeFields {
    event_type: String,
    entity_id: Option<String>,
    event_id: Option<String>,
    occurred_at: Option<String>,
}

fn envelope<T: for<'de> Deserialize<'de>>(value: &Value) -> Result<T, ParseError> {
    T::deserialize(value).map_err(|e| ParseError::invalid(e.to_string()))
}

fn parse_keka(value: &Value) -> Result<EnvelopeFields, ParseError> {
    let env: KekaEnvelope = envelope(value)?;
    let event_type = present(env.event).ok_or_else(|| ParseError::missing("event"))?;
    let entity_id = env.data.and_then(|data| {
        data.employee_id
            .present()
            .or_else(|| data.employee.and_then(|e| e.id.present()))
    });

    Ok(EnvelopeFields {
        event_type,
        entity_id,
        event_id: first_present([env.id, env.event_id_camel, env.event_id]),
        occurred_at: env.timestamp.present(),
    })
}

fn parse_plum(value: &Value) -> Result<EnvelopeFields, ParseError> {
    let env: PlumEnvelope = envelope(value)?;
    let event_type = present(env.event).ok_or_else(|| ParseError::missing("event"))?;
    let member_id = env.member_id.present().ok_or_else(|| ParseError::missing("member_id"))?;

    Ok(EnvelopeFields {
        event_type,
        entity_id: Some(member_id),
        event_id: first_present([env.event_id, env.id]),
        occurred_at: env.timestamp.present(),
    })
}

fn parse_springverify(value: &Value) -> Result<EnvelopeFields, ParseError> {
    let env: SpringverifyEnvelope = envelope(value)?;
    let event_type = present(env.event).ok_or_else(|| ParseError::missing("event"))?;
    let candidate_id =
        env.candidate_id.present().ok_or_else(|| ParseError::missing("candidate_id"))?;

    Ok(EnvelopeFields {
        event_type,
        entity_id: Some(candidate_id),
        event_id: first_present([env.event_id, env.id]),
        occurred_at: env.timestamp.present(),
    })
}

fn parse_zoho(value: &Value) -> Result<EnvelopeFields, ParseError> {
    let env: ZohoEnvelope = envelope(value)?;
    let requests = env.requests.ok_or_else(|| ParseError::missing("requests"))?;
    let request_id =
        requests.request_id.present().ok_or_else(|| ParseError::missing("requests.request_id"))?;

    let (notification_id, operation, performed_at) = match env.notifications {
        Some(n) => (
            n.notification_id.present(),
            n.operation_type.present(),
            n.performed_at.present(),
        ),
        None => (None, None, None),
    };
    let event_type = operation
        .or_else(|| requests.request_status.present())
        .ok_or_else(|| ParseError::missing("notifications.operation_type"))?;

    Ok(EnvelopeFields {
        event_type,
        entity_id: Some(request_id),
        event_id: notification_id,
        occurred_at: performed_at,
    })
}
