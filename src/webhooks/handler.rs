//! Webhook Endpoint
//!
//! One route per provider. A delivery moves strictly forward:
//!
//! ```text
//! Received ─▶ SignatureChecked ─▶ Parsed ─▶ Claimed ─▶ Processed ─▶ Responded
//!     │              │               │          │
//!     └──────────────┴───────────────┴──────────┴────────────────────▶ Responded
//! ```
//!
//! Every exit goes through [`ResponsePolicy`]; nothing is retried inside a
//! request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::{instrument, Span};

use crate::handlers::AppState;
use crate::webhooks::error::{WebhookError, WebhookResult};
use crate::webhooks::events::{IncomingWebhookRequest, PayloadParser};
use crate::webhooks::idempotency::{ClaimOutcome, IdempotencyGuard, ReleaseOutcome};
use crate::webhooks::processor::{process_with_timeout, ProcessingOutcome};
use crate::webhooks::provider::{ProviderId, ProviderRegistry};
use crate::webhooks::response::{Outcome, ResponseBody, ResponsePolicy, WebhookResponse};
use crate::webhooks::signature::{SignatureVerifier, VerificationResult};

/// Default upper bound on processor wall time.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the webhook routes.
#[derive(Debug, Clone)]
pub struct WebhookState {
    registry: Arc<ProviderRegistry>,
    verifier: SignatureVerifier,
    parser: PayloadParser,
    guard: IdempotencyGuard,
    policy: ResponsePolicy,
    processing_timeout: Duration,
    app: Arc<AppState>,
}

impl WebhookState {
    /// Creates state over `registry`, with the default processing timeout.
    pub fn new(registry: ProviderRegistry, guard: IdempotencyGuard, app: Arc<AppState>) -> Self {
        let registry = Arc::new(registry);
        Self {
            verifier: SignatureVerifier::new(Arc::clone(&registry)),
            registry,
            parser: PayloadParser::new(),
            guard,
            policy: ResponsePolicy::new(),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            app,
        }
    }

    /// Overrides the processing timeout.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Provider registry.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Idempotency guard.
    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Shared status state.
    pub fn app(&self) -> &Arc<AppState> {
        &self.app
    }
}

/// Liveness body for `GET /api/webhooks/{provider}`.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    /// Always "ok"
    pub status: &'static str,
    /// `<provider>-webhook`
    pub service: String,
    /// RFC 3339
    pub timestamp: String,
}

/// Routes for every provider.
///
/// - `POST /api/webhooks/:provider` - receive a delivery
/// - `GET /api/webhooks/:provider` - liveness
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(
            "/api/webhooks/:provider",
            post(receive_webhook).get(webhook_liveness),
        )
        .with_state(state)
}

fn unknown_provider() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ResponseBody::error("Unknown webhook provider")),
    )
        .into_response()
}

/// Axum handler for `POST /api/webhooks/:provider`.
pub async fn receive_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(provider) = provider.parse::<ProviderId>() else {
        tracing::debug!(path = %provider, "Delivery for unknown provider");
        return unknown_provider();
    };

    let signature = state
        .registry
        .get(provider)
        .map(|config| config.extract_signature(&headers))
        .unwrap_or_default();
    let request = IncomingWebhookRequest::new(provider, body, signature, state.guard.clock().now());

    handle_delivery(&state, request).await.into_response()
}

/// Axum handler for `GET /api/webhooks/:provider`.
pub async fn webhook_liveness(
    State(state): State<Arc<WebhookState>>,
    Path(provider): Path<String>,
) -> Response {
    let Ok(provider) = provider.parse::<ProviderId>() else {
        return unknown_provider();
    };

    Json(LivenessResponse {
        status: "ok",
        service: provider.service_name(),
        timestamp: state.guard.clock().now().to_rfc3339(),
    })
    .into_response()
}

/// Runs one delivery through the pipeline and records the result.
#[instrument(
    name = "webhook_delivery",
    skip_all,
    fields(
        provider = %request.provider(),
        event_id = tracing::field::Empty,
        event_type = tracing::field::Empty,
        status = tracing::field::Empty,
    )
)]
pub async fn handle_delivery(state: &WebhookState, request: IncomingWebhookRequest) -> WebhookResponse {
    let started = Instant::now();
    let provider = request.provider();

    let response = match run_pipeline(state, &request).await {
        Ok(outcome) => state.policy.decide(outcome),
        Err(err) => {
            log_failure(&err);
            state.policy.decide_error(&err)
        }
    };

    Span::current().record("status", response.status.as_u16());
    tracing::info!(
        outcome = response.outcome.as_str(),
        stage = response.outcome.stage().as_str(),
        elapsed_ms = saturating_millis(started.elapsed()),
        "Webhook delivery handled"
    );
    state.app.record_delivery(
        provider.as_str(),
        response.status.as_u16(),
        response.outcome,
        started.elapsed(),
    );

    response
}

async fn run_pipeline(state: &WebhookState, request: &IncomingWebhookRequest) -> WebhookResult<Outcome> {
    let provider = request.provider();
    let config = state
        .registry
        .get(provider)
        .ok_or(WebhookError::Configuration { provider })?;

    // Signature
    match state
        .verifier
        .verify(provider, request.body(), request.signature())
    {
        VerificationResult::Valid => {}
        VerificationResult::Invalid => return Err(WebhookError::Authentication { provider }),
        VerificationResult::Unconfigured => return Err(WebhookError::Configuration { provider }),
    }

    // Parse
    let event = state.parser.parse(provider, request.body())?;
    let span = Span::current();
    span.record("event_id", event.event_id.as_str());
    span.record("event_type", event.event_type.as_str());

    // Claim
    let handle = match state.guard.claim(provider, &event.event_id).await? {
        ClaimOutcome::Claimed(handle) => handle,
        ClaimOutcome::AlreadyProcessed => {
            return Err(WebhookError::DuplicateEvent {
                event_id: event.event_id,
                in_flight: false,
            })
        }
        ClaimOutcome::AlreadyInFlight => {
            return Err(WebhookError::DuplicateEvent {
                event_id: event.event_id,
                in_flight: true,
            })
        }
    };
    if handle.attempt() > 1 {
        tracing::debug!(attempt = handle.attempt(), "Reprocessing previously claimed event");
    }

    // Process
    state.app.record_processor_invocation();
    let outcome =
        process_with_timeout(config.processor().as_ref(), &event, state.processing_timeout).await;

    let release = if outcome.is_retryable() {
        ReleaseOutcome::Failed
    } else {
        ReleaseOutcome::Completed
    };
    if let Err(e) = state.guard.release(handle, release).await {
        tracing::error!(error = %e, ?release, "Failed to release idempotency claim");
    }

    match outcome {
        ProcessingOutcome::Success => Ok(Outcome::Success),
        ProcessingOutcome::RecoverableFailure(reason) => {
            Err(WebhookError::RecoverableProcessing(reason))
        }
        ProcessingOutcome::PermanentFailure(reason) => Err(WebhookError::PermanentProcessing(reason)),
    }
}

fn log_failure(err: &WebhookError) {
    let kind = err.kind();
    match err {
        WebhookError::Configuration { .. } => {
            tracing::error!(error_type = kind, "Webhook secret not configured")
        }
        WebhookError::Authentication { .. } => {
            tracing::warn!(error_type = kind, "Rejected delivery with invalid signature")
        }
        WebhookError::MalformedPayload(_) => {
            tracing::warn!(error_type = kind, "Rejected malformed payload")
        }
        WebhookError::SemanticValidation(detail) => {
            tracing::warn!(error_type = kind, detail = %detail, "Rejected invalid payload")
        }
        WebhookError::DuplicateEvent { in_flight, .. } => {
            tracing::info!(in_flight = *in_flight, "Suppressed duplicate delivery")
        }
        WebhookError::RecoverableProcessing(reason) => {
            tracing::warn!(error_type = kind, reason = %reason, "Processing failed; provider will retry")
        }
        WebhookError::PermanentProcessing(reason) => {
            tracing::error!(error_type = kind, reason = %reason, "Processing failed permanently")
        }
        WebhookError::Storage(reason) => {
            tracing::error!(error_type = kind, reason = %reason, "Idempotency store unavailable")
        }
    }
}

fn saturating_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
