//! Webhook Signature Verification
//!
//! HMAC-SHA256 over the exact raw request bytes, compared in constant time.
//!
//! # Security
//!
//! - A provider without a secret yields [`VerificationResult::Unconfigured`]
//!   before any HMAC is computed.
//! - Comparison uses [`subtle::ConstantTimeEq`].
//! - Neither the secret nor the signature values are logged.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::webhooks::provider::{ProviderId, ProviderRegistry, SignatureAlgorithm, WebhookSecret};

type HmacSha256 = Hmac<Sha256>;

/// Result of checking a received signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    /// Signature matches the body
    Valid,
    /// Signature is missing or does not match
    Invalid,
    /// No secret is configured; nothing was compared
    Unconfigured,
}

impl VerificationResult {
    /// Whether the request may proceed to parsing.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Verifies signatures against the secrets held in a [`ProviderRegistry`].
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    registry: Arc<ProviderRegistry>,
}

impl SignatureVerifier {
    /// Creates a verifier over `registry`.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Checks `received_signature` against `raw_body` for `provider`.
    ///
    /// Unknown providers are treated like unconfigured ones.
    pub fn verify(
        &self,
        provider: ProviderId,
        raw_body: &[u8],
        received_signature: &str,
    ) -> VerificationResult {
        match self.registry.get(provider) {
            Some(config) => verify_with_secret(
                config.secret(),
                config.algorithm(),
                raw_body,
                received_signature,
            ),
            None => VerificationResult::Unconfigured,
        }
    }
}

/// Verification against an explicit secret.
pub fn verify_with_secret(
    secret: Option<&WebhookSecret>,
    algorithm: SignatureAlgorithm,
    raw_body: &[u8],
    received_signature: &str,
) -> VerificationResult {
    let secret = match secret {
        Some(secret) if !secret.is_empty() => secret,
        _ => return VerificationResult::Unconfigured,
    };

    let received = normalize_signature(received_signature);
    if received.is_empty() {
        return VerificationResult::Invalid;
    }

    let expected = match compute_signature(secret, algorithm, raw_body) {
        Some(expected) => expected,
        None => return VerificationResult::Invalid,
    };

    if bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        VerificationResult::Valid
    } else {
        VerificationResult::Invalid
    }
}

/// Computes the signature a provider would send for `raw_body`.
///
/// Returns `None` only if the MAC cannot be keyed.
pub fn compute_signature(
    secret: &WebhookSecret,
    algorithm: SignatureAlgorithm,
    raw_body: &[u8],
) -> Option<String> {
    match algorithm {
        SignatureAlgorithm::HmacSha256Hex => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
            mac.update(raw_body);
            Some(hex::encode(mac.finalize().into_bytes()))
        }
    }
}

/// Accepts bare hex or `sha256=<hex>`, any case.
fn normalize_signature(signature: &str) -> String {
    let trimmed = signature.trim();
    let hex = trimmed.strip_prefix("sha256=").unwrap_or(trimmed);
    hex.to_ascii_lowercase()
}
