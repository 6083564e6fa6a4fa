//! Provider Registry
//!
//! Static per-provider configuration: shared secret, accepted signature
//! headers, signature algorithm and the [`EventProcessor`] that applies the
//! provider's events. The registry is built once at startup and shared
//! read-only by every request.
//!
//! # URL Structure
//!
//! ```text
//! POST /api/webhooks/{provider}
//! GET  /api/webhooks/{provider}
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::webhooks::processor::EventProcessor;

/// Header every provider may fall back to when its own header is absent.
pub const GENERIC_SIGNATURE_HEADER: &str = "x-webhook-signature";

// ============================================================================
// ProviderId
// ============================================================================

/// The external systems that send webhooks to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderId {
    /// Keka HRMS / payroll
    #[serde(rename = "keka")]
    Keka,
    /// Plum health insurance
    #[serde(rename = "plum")]
    Plum,
    /// Springverify identity and background verification
    #[serde(rename = "springverify")]
    Springverify,
    /// Zoho Sign e-signature
    #[serde(rename = "zoho-sign")]
    ZohoSign,
}

impl ProviderId {
    /// Every known provider, in routing order.
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Keka,
        ProviderId::Plum,
        ProviderId::Springverify,
        ProviderId::ZohoSign,
    ];

    /// URL path segment and log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keka => "keka",
            Self::Plum => "plum",
            Self::Springverify => "springverify",
            Self::ZohoSign => "zoho-sign",
        }
    }

    /// Service name reported by the liveness endpoint, e.g. `keka-webhook`.
    pub fn service_name(&self) -> String {
        format!("{}-webhook", self.as_str())
    }

    /// Provider-specific signature header.
    pub fn signature_header(&self) -> &'static str {
        match self {
            Self::Keka => "x-keka-signature",
            Self::Plum => "x-plum-signature",
            Self::Springverify => "x-springverify-signature",
            Self::ZohoSign => "x-zoho-signature",
        }
    }

    /// Environment variable holding the provider's shared secret.
    pub fn secret_env_var(&self) -> &'static str {
        match self {
            Self::Keka => "KEKA_WEBHOOK_SECRET",
            Self::Plum => "PLUM_WEBHOOK_SECRET",
            Self::Springverify => "SPRINGVERIFY_WEBHOOK_SECRET",
            Self::ZohoSign => "ZOHO_SIGN_WEBHOOK_SECRET",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a path segment names no known provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown webhook provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderId {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keka" => Ok(Self::Keka),
            "plum" => Ok(Self::Plum),
            "springverify" => Ok(Self::Springverify),
            "zoho-sign" => Ok(Self::ZohoSign),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

// ============================================================================
// Secrets and algorithms
// ============================================================================

/// Opaque shared secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    /// Wraps raw secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }

    /// Secret bytes used as the HMAC key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An empty secret counts as unconfigured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret([REDACTED])")
    }
}

/// Signature schemes understood by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Lowercase hex HMAC-SHA256 of the raw body
    #[default]
    #[serde(rename = "hmac-sha256-hex")]
    HmacSha256Hex,
}

impl SignatureAlgorithm {
    /// Configuration identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha256Hex => "hmac-sha256-hex",
        }
    }
}

// ============================================================================
// ProviderConfig
// ============================================================================

/// Everything the gateway needs to know about one provider.
#[derive(Clone)]
pub struct ProviderConfig {
    id: ProviderId,
    secret: Option<WebhookSecret>,
    signature_headers: Vec<String>,
    algorithm: SignatureAlgorithm,
    processor: Arc<dyn EventProcessor>,
}

impl ProviderConfig {
    /// Creates a config with the provider's default header order:
    /// its own header first, then [`GENERIC_SIGNATURE_HEADER`].
    pub fn new(
        id: ProviderId,
        secret: Option<WebhookSecret>,
        processor: Arc<dyn EventProcessor>,
    ) -> Self {
        Self {
            id,
            secret,
            signature_headers: vec![
                id.signature_header().to_string(),
                GENERIC_SIGNATURE_HEADER.to_string(),
            ],
            algorithm: SignatureAlgorithm::default(),
            processor,
        }
    }

    /// Replaces the accepted signature headers. Order matters.
    pub fn with_signature_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signature_headers = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Overrides the signature algorithm.
    pub fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Provider identifier.
    pub fn id(&self) -> ProviderId {
        self.id
    }

    /// The secret, or `None` when it is absent or empty.
    pub fn secret(&self) -> Option<&WebhookSecret> {
        self.secret.as_ref().filter(|s| !s.is_empty())
    }

    /// Whether requests for this provider can be authenticated at all.
    pub fn is_configured(&self) -> bool {
        self.secret().is_some()
    }

    /// Accepted signature headers in priority order.
    pub fn signature_headers(&self) -> &[String] {
        &self.signature_headers
    }

    /// Signature algorithm.
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Processor that applies this provider's events.
    pub fn processor(&self) -> &Arc<dyn EventProcessor> {
        &self.processor
    }

    /// Picks the received signature from the request headers.
    ///
    /// The first configured header carrying a non-empty value wins. Returns
    /// an empty string when none is present.
    pub fn extract_signature(&self, headers: &HeaderMap) -> String {
        self.signature_headers
            .iter()
            .filter_map(|name| headers.get(name.as_str()))
            .filter_map(|value| value.to_str().ok())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("configured", &self.is_configured())
            .field("signature_headers", &self.signature_headers)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ProviderRegistry
// ============================================================================

/// Immutable map from provider id to its configuration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, ProviderConfig>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry covering every provider from a secret table.
    ///
    /// Providers missing from `secrets` are still registered, unconfigured,
    /// so their endpoints fail closed instead of returning 404.
    pub fn from_secrets<F>(secrets: &HashMap<ProviderId, WebhookSecret>, mut processor_for: F) -> Self
    where
        F: FnMut(ProviderId) -> Arc<dyn EventProcessor>,
    {
        ProviderId::ALL
            .into_iter()
            .fold(Self::new(), |registry, id| {
                registry.with_provider(ProviderConfig::new(
                    id,
                    secrets.get(&id).cloned(),
                    processor_for(id),
                ))
            })
    }

    /// Adds or replaces a provider.
    pub fn with_provider(mut self, config: ProviderConfig) -> Self {
        self.providers.insert(config.id(), config);
        self
    }

    /// Looks up a provider.
    pub fn get(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(&id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.contains_key(&id)
    }

    /// Registered providers without a usable secret, sorted.
    pub fn unconfigured(&self) -> Vec<ProviderId> {
        let mut missing: Vec<_> = self
            .providers
            .values()
            .filter(|p| !p.is_configured())
            .map(ProviderConfig::id)
            .collect();
        missing.sort();
        missing
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.providers.values()).finish()
    }
}
