//! Property-based tests for signature verification and payload parsing.
//!
//! Uses proptest to check that correctly signed bodies always verify, that
//! any single-byte change breaks verification, and that the parser never
//! panics on arbitrary input.

use proptest::prelude::*;

use hr_webhooks::webhooks::{
    compute_signature, verify_with_secret, ParseErrorKind, PayloadParser, ProviderId,
    SignatureAlgorithm, VerificationResult, WebhookSecret,
};

const ALGORITHM: SignatureAlgorithm = SignatureAlgorithm::HmacSha256Hex;

// ============================================================================
// Strategies
// ============================================================================

fn arb_provider() -> impl Strategy<Value = ProviderId> {
    prop_oneof![
        Just(ProviderId::Keka),
        Just(ProviderId::Plum),
        Just(ProviderId::Springverify),
        Just(ProviderId::ZohoSign),
    ]
}

fn arb_secret() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

fn arb_body() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..2048)
}

/// Bodies that look like provider envelopes with random field values.
fn arb_envelope() -> impl Strategy<Value = String> {
    (
        prop::option::of("[a-z]{1,12}\\.[a-z]{1,12}"),
        prop::option::of("[A-Z0-9-]{0,16}"),
        prop::option::of("[a-z0-9_]{0,24}"),
    )
        .prop_map(|(event, entity, id)| {
            let mut map = serde_json::Map::new();
            if let Some(event) = event {
                map.insert("event".into(), event.into());
            }
            if let Some(entity) = entity {
                map.insert("member_id".into(), entity.clone().into());
                map.insert("candidate_id".into(), entity.clone().into());
                map.insert(
                    "data".into(),
                    serde_json::json!({ "employeeId": entity }),
                );
            }
            if let Some(id) = id {
                map.insert("id".into(), id.into());
            }
            serde_json::Value::Object(map).to_string()
        })
}

// ============================================================================
// Signature invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_correct_signature_verifies(secret in arb_secret(), body in arb_body()) {
        let secret = WebhookSecret::new(secret);
        let signature = compute_signature(&secret, ALGORITHM, &body).unwrap();

        prop_assert_eq!(
            verify_with_secret(Some(&secret), ALGORITHM, &body, &signature),
            VerificationResult::Valid
        );
    }

    #[test]
    fn prop_single_byte_mutation_fails(
        secret in arb_secret(),
        body in arb_body(),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let secret = WebhookSecret::new(secret);
        let signature = compute_signature(&secret, ALGORITHM, &body).unwrap();

        let mut tampered = body.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= flip;

        prop_assert_eq!(
            verify_with_secret(Some(&secret), ALGORITHM, &tampered, &signature),
            VerificationResult::Invalid
        );
    }

    #[test]
    fn prop_wrong_secret_fails(
        secret in arb_secret(),
        other in arb_secret(),
        body in arb_body(),
    ) {
        prop_assume!(secret != other);
        let signature = compute_signature(&WebhookSecret::new(other), ALGORITHM, &body).unwrap();

        prop_assert_eq!(
            verify_with_secret(Some(&WebhookSecret::new(secret)), ALGORITHM, &body, &signature),
            VerificationResult::Invalid
        );
    }

    #[test]
    fn prop_no_secret_is_always_unconfigured(body in arb_body(), signature in ".{0,80}") {
        prop_assert_eq!(
            verify_with_secret(None, ALGORITHM, &body, &signature),
            VerificationResult::Unconfigured
        );
    }
}

// ============================================================================
// Parser invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn prop_parser_never_panics(provider in arb_provider(), body in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = PayloadParser::new().parse(provider, &body);
    }

    #[test]
    fn prop_non_json_is_malformed(provider in arb_provider(), text in "[^\\[{\"0-9tfn \\t\\r\\n-][^\\x00]{0,64}") {
        let err = PayloadParser::new().parse(provider, text.as_bytes()).unwrap_err();
        prop_assert_eq!(err.kind, ParseErrorKind::Malformed);
    }

    #[test]
    fn prop_envelopes_parse_or_report_invalid(provider in arb_provider(), body in arb_envelope()) {
        match PayloadParser::new().parse(provider, body.as_bytes()) {
            Ok(event) => {
                prop_assert!(!event.event_id.is_empty());
                prop_assert_eq!(event.provider, provider);
            }
            Err(err) => prop_assert_eq!(err.kind, ParseErrorKind::Invalid),
        }
    }

    #[test]
    fn prop_event_id_is_stable_for_identical_bodies(provider in arb_provider(), body in arb_envelope()) {
        let parser = PayloadParser::new();
        if let (Ok(a), Ok(b)) = (parser.parse(provider, body.as_bytes()), parser.parse(provider, body.as_bytes())) {
            prop_assert_eq!(a.event_id, b.event_id);
        }
    }
}
