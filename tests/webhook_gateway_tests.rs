//! End-to-end tests for the webhook gateway router.
//!
//! Each test builds the full router (webhooks, status, metrics, body limit)
//! and drives it with `tower::ServiceExt::oneshot`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use http::{Request, StatusCode};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use hr_webhooks::handlers::AppState;
use hr_webhooks::server::create_router;
use hr_webhooks::time::ManualClock;
use hr_webhooks::webhooks::{
    compute_signature, EventProcessor, IdempotencyGuard, InMemoryIdempotencyStore, ParsedEvent,
    ProcessingOutcome, ProviderId, ProviderRegistry, SignatureAlgorithm, WebhookSecret,
    WebhookState, DEFAULT_CLAIM_LEASE,
};

const KEKA_SECRET: &str = "keka-shared-secret";
const PLUM_SECRET: &str = "plum-shared-secret";
const ZOHO_SECRET: &str = "zoho-shared-secret";
const SPRINGVERIFY_SECRET: &str = "springverify-shared-secret";

const KEKA_TERMINATION: &str = r#"{"id":"evt_keka_001","event":"employee.terminated","timestamp":"2026-03-01T10:00:00Z","data":{"employeeId":"EMP-42","lastWorkingDay":"2026-03-31"}}"#;

// ============================================================================
// Fixtures
// ============================================================================

/// Processor that counts invocations and replays scripted outcomes.
#[derive(Default)]
struct CountingProcessor {
    calls: AtomicUsize,
    script: Mutex<VecDeque<ProcessingOutcome>>,
    delay: Option<Duration>,
    seen: Mutex<Vec<String>>,
}

impl CountingProcessor {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn scripted(outcomes: impl IntoIterator<Item = ProcessingOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventProcessor for CountingProcessor {
    async fn process(&self, event: &ParsedEvent) -> ProcessingOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(event.event_type.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or(ProcessingOutcome::Success)
    }
}

struct Gateway {
    app: Router,
    processor: Arc<CountingProcessor>,
    guard: IdempotencyGuard,
    clock: ManualClock,
}

impl Gateway {
    fn new(processor: Arc<CountingProcessor>) -> Self {
        Self::with(
            processor,
            &[
                (ProviderId::Keka, KEKA_SECRET),
                (ProviderId::Plum, PLUM_SECRET),
                (ProviderId::ZohoSign, ZOHO_SECRET),
            ],
            1024 * 1024,
        )
    }

    fn with(
        processor: Arc<CountingProcessor>,
        secrets: &[(ProviderId, &str)],
        max_body_bytes: usize,
    ) -> Self {
        let secrets: HashMap<_, _> = secrets
            .iter()
            .map(|(id, s)| (*id, WebhookSecret::new(*s)))
            .collect();
        let shared: Arc<dyn EventProcessor> = processor.clone();
        let registry = ProviderRegistry::from_secrets(&secrets, |_| Arc::clone(&shared));

        let clock = ManualClock::new();
        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryIdempotencyStore::default()),
            Arc::new(clock.clone()),
            DEFAULT_CLAIM_LEASE,
        );
        let app_state = Arc::new(AppState::new().with_idempotency(guard.clone()));
        let state = WebhookState::new(registry, guard.clone(), Arc::clone(&app_state))
            .with_processing_timeout(Duration::from_secs(5));

        Self {
            app: create_router(Arc::new(state), app_state, max_body_bytes),
            processor,
            guard,
            clock,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn get_text(&self, uri: &str) -> String {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn records(&self) -> usize {
        self.guard.len().await.unwrap()
    }
}

fn sign(secret: &str, body: &str) -> String {
    compute_signature(
        &WebhookSecret::new(secret),
        SignatureAlgorithm::HmacSha256Hex,
        body.as_bytes(),
    )
    .unwrap()
}

fn delivery(provider: &str, header: Option<(&str, String)>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{provider}"))
        .header("content-type", "application/json");
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn delivery_with_headers(provider: &str, headers: &[(&str, String)], body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/webhooks/{provider}"))
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, value.as_str());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn keka(body: &str) -> Request<Body> {
    delivery("keka", Some(("x-keka-signature", sign(KEKA_SECRET, body))), body)
}

// ============================================================================
// Happy path and duplicates
// ============================================================================

#[tokio::test]
async fn test_signed_keka_termination_is_processed_once() {
    let gateway = Gateway::new(CountingProcessor::new());

    let (status, body) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    assert_eq!(gateway.processor.calls(), 1);
    assert_eq!(*gateway.processor.seen.lock(), vec!["employee.terminated".to_string()]);

    let (status, body) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "duplicate": true}));
    assert_eq!(gateway.processor.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_invoke_processor_once() {
    let gateway = Gateway::new(CountingProcessor::slow(Duration::from_millis(50)));

    let requests = (0..8).map(|_| gateway.send(keka(KEKA_TERMINATION)));
    let results = futures::future::join_all(requests).await;

    assert_eq!(gateway.processor.calls(), 1);
    for (status, _) in &results {
        assert!(status.is_success(), "unexpected status {status}");
    }
    assert_eq!(
        results.iter().filter(|(_, b)| b.get("duplicate").is_none()).count(),
        1
    );
}

#[tokio::test]
async fn test_generic_signature_header_is_accepted() {
    let gateway = Gateway::new(CountingProcessor::new());
    let body = r#"{"event_id":"plum_9","event":"member.enrolled","member_id":"M-1"}"#;

    let (status, _) = gateway
        .send(delivery(
            "plum",
            Some(("x-webhook-signature", sign(PLUM_SECRET, body))),
            body,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway.processor.calls(), 1);
}

#[tokio::test]
async fn test_zoho_sign_notification() {
    let gateway = Gateway::new(CountingProcessor::new());
    let body = r#"{"requests":{"request_id":"REQ-7","request_status":"completed"},"notifications":{"notification_id":"N-1","operation_type":"RequestCompleted"}}"#;

    let (status, _) = gateway
        .send(delivery(
            "zoho-sign",
            Some(("x-zoho-signature", sign(ZOHO_SECRET, body))),
            body,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(gateway
        .guard
        .record(ProviderId::ZohoSign, "N-1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_signed_springverify_round_trip() {
    let gateway = Gateway::with(
        CountingProcessor::new(),
        &[(ProviderId::Springverify, SPRINGVERIFY_SECRET)],
        1024 * 1024,
    );
    let body = r#"{"event_id":"sv_1","event":"verification.completed","candidate_id":"C-9","status":"verified","timestamp":1700000000}"#;
    let signed = || {
        delivery(
            "springverify",
            Some(("x-springverify-signature", sign(SPRINGVERIFY_SECRET, body))),
            body,
        )
    };

    let (status, response) = gateway.send(signed()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({"success": true}));
    assert_eq!(*gateway.processor.seen.lock(), vec!["verification.completed".to_string()]);
    assert!(gateway
        .guard
        .record(ProviderId::Springverify, "sv_1")
        .await
        .unwrap()
        .is_some());

    let (status, response) = gateway.send(signed()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({"success": true, "duplicate": true}));
    assert_eq!(gateway.processor.calls(), 1);
}

#[tokio::test]
async fn test_provider_header_takes_precedence_over_generic_header() {
    let gateway = Gateway::new(CountingProcessor::new());

    let (status, _) = gateway
        .send(delivery_with_headers(
            "keka",
            &[
                ("x-keka-signature", sign(KEKA_SECRET, KEKA_TERMINATION)),
                ("x-webhook-signature", "deadbeef".to_string()),
            ],
            KEKA_TERMINATION,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    // A valid generic signature does not rescue a wrong provider signature
    let body = r#"{"id":"evt_keka_002","event":"employee.updated","data":{"employeeId":"EMP-1"}}"#;
    let (status, _) = gateway
        .send(delivery_with_headers(
            "keka",
            &[
                ("x-keka-signature", "deadbeef".to_string()),
                ("x-webhook-signature", sign(KEKA_SECRET, body)),
            ],
            body,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.processor.calls(), 1);
}

#[tokio::test]
async fn test_numeric_metadata_fields_are_processed() {
    let gateway = Gateway::new(CountingProcessor::new());
    let body = r#"{"requests":{"request_id":"REQ-8","request_status":"completed"},"notifications":{"notification_id":987654,"operation_type":"RequestSigned","performed_at":1555062604837}}"#;

    let (status, _) = gateway
        .send(delivery(
            "zoho-sign",
            Some(("x-zoho-signature", sign(ZOHO_SECRET, body))),
            body,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway.processor.calls(), 1);
    assert!(gateway
        .guard
        .record(ProviderId::ZohoSign, "987654")
        .await
        .unwrap()
        .is_some());

    let keka_body = r#"{"id":"evt_keka_003","event":"leave.approved","timestamp":1700000000,"data":{"employeeId":"EMP-5"}}"#;
    let (status, _) = gateway.send(keka(keka_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway.processor.calls(), 2);
}

#[tokio::test]
async fn test_repeated_event_id_keys_use_first_present() {
    let gateway = Gateway::new(CountingProcessor::new());
    let body = r#"{"id":"e1","event_id":"e1","event":"employee.updated","data":{"employeeId":"EMP-2"}}"#;

    let (status, _) = gateway.send(keka(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(gateway
        .guard
        .record(ProviderId::Keka, "e1")
        .await
        .unwrap()
        .is_some());

    // Same id under a different key is the same event
    let replay = r#"{"eventId":"e1","event":"employee.updated","data":{"employeeId":"EMP-2"}}"#;
    let (status, response) = gateway.send(keka(replay)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({"success": true, "duplicate": true}));
    assert_eq!(gateway.processor.calls(), 1);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_unsigned_delivery_is_rejected_without_side_effects() {
    let gateway = Gateway::new(CountingProcessor::new());

    let (status, body) = gateway
        .send(delivery("keka", None, KEKA_TERMINATION))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Invalid signature"}));
    assert_eq!(gateway.processor.calls(), 0);
    assert_eq!(gateway.records().await, 0);
}

#[tokio::test]
async fn test_signature_over_different_body_is_rejected() {
    let gateway = Gateway::new(CountingProcessor::new());
    let tampered = KEKA_TERMINATION.replace("EMP-42", "EMP-43");

    let (status, _) = gateway
        .send(delivery(
            "keka",
            Some(("x-keka-signature", sign(KEKA_SECRET, KEKA_TERMINATION))),
            &tampered,
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.processor.calls(), 0);
}

#[tokio::test]
async fn test_unconfigured_provider_fails_closed_before_parsing() {
    let gateway = Gateway::new(CountingProcessor::new());

    // Springverify has no secret; a malformed body would be 400 if parsed
    let (status, body) = gateway
        .send(delivery(
            "springverify",
            Some(("x-springverify-signature", "deadbeef".to_string())),
            "{not json",
        ))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Webhook not configured"}));
    assert_eq!(gateway.processor.calls(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_400() {
    let gateway = Gateway::new(CountingProcessor::new());

    let (status, body) = gateway.send(keka("{\"event\": ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid JSON payload"}));
    assert_eq!(gateway.records().await, 0);
}

#[tokio::test]
async fn test_missing_required_field_is_400() {
    let gateway = Gateway::new(CountingProcessor::new());

    let (status, body) = gateway.send(keka(r#"{"data":{"employeeId":"E-1"}}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid payload"}));
    assert_eq!(gateway.processor.calls(), 0);
}

#[tokio::test]
async fn test_unknown_provider_is_404() {
    let gateway = Gateway::new(CountingProcessor::new());

    let (status, body) = gateway
        .send(delivery("workday", None, KEKA_TERMINATION))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "Unknown webhook provider"}));
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let gateway = Gateway::with(
        CountingProcessor::new(),
        &[(ProviderId::Keka, KEKA_SECRET)],
        64,
    );
    let body = format!(r#"{{"event":"employee.updated","padding":"{}"}}"#, "x".repeat(256));
    let request = Request::builder()
        .method("POST")
        .uri("/api/webhooks/keka")
        .header("content-length", body.len())
        .header("x-keka-signature", sign(KEKA_SECRET, &body))
        .body(Body::from(body))
        .unwrap();

    let response = gateway.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(gateway.processor.calls(), 0);
}

// ============================================================================
// Failure recovery
// ============================================================================

#[tokio::test]
async fn test_recoverable_failure_is_retried_by_provider() {
    let gateway = Gateway::new(CountingProcessor::scripted([
        ProcessingOutcome::RecoverableFailure("payroll service unavailable".into()),
    ]));

    let (status, body) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Webhook processing failed"}));

    let (status, _) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway.processor.calls(), 2);

    let (_, body) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(body["duplicate"], json!(true));
    assert_eq!(gateway.processor.calls(), 2);
}

#[tokio::test]
async fn test_permanent_failure_is_acknowledged_and_not_retried() {
    let gateway = Gateway::new(CountingProcessor::scripted([
        ProcessingOutcome::PermanentFailure("employee does not exist".into()),
    ]));

    let (status, _) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["duplicate"], json!(true));
    assert_eq!(gateway.processor.calls(), 1);
}

#[tokio::test]
async fn test_abandoned_claim_is_reprocessed_after_lease() {
    let gateway = Gateway::new(CountingProcessor::new());

    // A worker claimed the event and crashed before releasing
    gateway
        .guard
        .claim(ProviderId::Keka, "evt_keka_001")
        .await
        .unwrap();

    let (status, body) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["duplicate"], json!(true));
    assert_eq!(gateway.processor.calls(), 0);

    gateway.clock.advance(DEFAULT_CLAIM_LEASE);

    let (status, _) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway.processor.calls(), 1);

    let (status, _) = gateway.send(keka(KEKA_TERMINATION)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gateway.processor.calls(), 1);
}

// ============================================================================
// Liveness, status and metrics
// ============================================================================

#[tokio::test]
async fn test_liveness_endpoint() {
    let gateway = Gateway::new(CountingProcessor::new());
    let request = Request::builder()
        .uri("/api/webhooks/zoho-sign")
        .body(Body::empty())
        .unwrap();

    let (status, body) = gateway.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["service"], json!("zoho-sign-webhook"));
    assert!(body["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn test_status_and_metrics_reflect_deliveries() {
    let gateway = Gateway::new(CountingProcessor::new());
    gateway.send(keka(KEKA_TERMINATION)).await;
    gateway.send(keka(KEKA_TERMINATION)).await;
    gateway.send(delivery("keka", None, KEKA_TERMINATION)).await;

    let status: Value = serde_json::from_str(&gateway.get_text("/status").await).unwrap();
    assert_eq!(status["deliveries_received"], json!(3));
    assert_eq!(status["processor_invocations"], json!(1));
    assert_eq!(status["duplicates_suppressed"], json!(1));
    assert_eq!(status["error_count"], json!(1));
    assert_eq!(status["idempotency_records"], json!(1));

    let metrics = gateway.get_text("/metrics").await;
    assert!(metrics.contains(r#"hr_webhooks_deliveries{provider="keka",status="200"} 2"#));
    assert!(metrics.contains(r#"hr_webhooks_deliveries{provider="keka",status="401"} 1"#));
    assert!(metrics.contains("hr_webhooks_processor_invocations_total 1"));
}
