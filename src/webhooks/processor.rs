//! Event Processing
//!
//! The gateway does not know what a processor does with an event; it only
//! needs the three-way [`ProcessingOutcome`] to choose a response.
//!
//! ```text
//! ParsedEvent ──▶ EventProcessor::process ──▶ Success
//!                        │                    RecoverableFailure  (provider should retry)
//!                        │                    PermanentFailure    (retry suppressed)
//!                        ▼
//!                 timeout ──▶ RecoverableFailure
//! ```

use std::time::Duration;

use tokio::time::timeout;

use crate::webhooks::events::{EventKind, ParsedEvent};

/// Result of applying an event to domain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// The event was applied
    Success,
    /// A transient failure; a provider retry may succeed
    RecoverableFailure(String),
    /// Retrying will never succeed
    PermanentFailure(String),
}

impl ProcessingOutcome {
    /// Whether the provider should be told to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RecoverableFailure(_))
    }
}

/// Applies a provider's events to domain state.
#[async_trait::async_trait]
pub trait EventProcessor: Send + Sync + 'static {
    /// Process one authenticated, parsed, claimed event.
    async fn process(&self, event: &ParsedEvent) -> ProcessingOutcome;
}

/// Runs `processor` with an upper bound on wall time.
///
/// A processor that overruns is reported as a recoverable failure so the
/// provider retries once the claim lease has lapsed.
pub async fn process_with_timeout(
    processor: &dyn EventProcessor,
    event: &ParsedEvent,
    limit: Duration,
) -> ProcessingOutcome {
    match timeout(limit, processor.process(event)).await {
        Ok(outcome) => outcome,
        Err(_) => ProcessingOutcome::RecoverableFailure(format!(
            "processing timed out after {:?}",
            limit
        )),
    }
}

/// No-op processor for testing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProcessor;

#[async_trait::async_trait]
impl EventProcessor for NoOpProcessor {
    async fn process(&self, _event: &ParsedEvent) -> ProcessingOutcome {
        ProcessingOutcome::Success
    }
}

/// Logging processor that records every event it receives.
///
/// Used as the default route until the domain services are wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProcessor;

#[async_trait::async_trait]
impl EventProcessor for LoggingProcessor {
    async fn process(&self, event: &ParsedEvent) -> ProcessingOutcome {
        let entity_id = event.entity_id.as_deref().unwrap_or("-");

        match event.kind() {
            EventKind::EmployeeTerminated => tracing::info!(
                provider = %event.provider,
                employee_id = entity_id,
                "Employee terminated"
            ),
            EventKind::EmployeeCreated | EventKind::EmployeeUpdated => tracing::info!(
                provider = %event.provider,
                employee_id = entity_id,
                event_type = %event.event_type,
                "Employee record changed"
            ),
            EventKind::LeaveApproved | EventKind::LeaveRejected => tracing::info!(
                provider = %event.provider,
                event_type = %event.event_type,
                "Leave status updated"
            ),
            EventKind::PayrollProcessed => {
                tracing::info!(provider = %event.provider, "Payroll processed")
            }
            EventKind::MemberEnrolled
            | EventKind::MemberUpdated
            | EventKind::PolicyActivated
            | EventKind::PolicyRenewed
            | EventKind::ClaimSubmitted
            | EventKind::ClaimProcessed => tracing::info!(
                provider = %event.provider,
                member_id = entity_id,
                event_type = %event.event_type,
                "Insurance status updated"
            ),
            EventKind::VerificationCompleted
            | EventKind::VerificationFailed
            | EventKind::CandidateUpdated => tracing::info!(
                provider = %event.provider,
                candidate_id = entity_id,
                event_type = %event.event_type,
                "Verification status updated"
            ),
            EventKind::SignatureStatusChanged => tracing::info!(
                provider = %event.provider,
                request_id = entity_id,
                operation = %event.event_type,
                "Signature request updated"
            ),
            EventKind::Unknown => tracing::debug!(
                provider = %event.provider,
                event_type = %event.event_type,
                "Ignoring unknown event type"
            ),
        }

        ProcessingOutcome::Success
    }
}
