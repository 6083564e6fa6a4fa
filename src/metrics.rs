//! Delivery Metrics
//!
//! Counters for the webhook pipeline:
//! - Atomic totals for deliveries, processor invocations, duplicates, errors
//! - Labeled breakdowns by (provider, status) and (stage, outcome)
//! - Prometheus-compatible text format export served at `/metrics`
//!
//! # Example
//!
//! ```rust,no_run
//! use hr_webhooks::metrics::Metrics;
//! use hr_webhooks::webhooks::Outcome;
//!
//! let metrics = Metrics::new();
//! metrics.record_delivery("keka", 200, Outcome::Success);
//! let output = metrics.to_prometheus_format();
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::webhooks::Outcome;

/// Metric name prefix
const PREFIX: &str = "hr_webhooks";

/// Delivery counters.
///
/// Thread-safe; totals are lock-free and breakdowns sit behind `RwLock`s.
#[derive(Debug, Default)]
pub struct Metrics {
    // === Counters ===
    /// Deliveries that reached the pipeline
    pub deliveries_total: AtomicU64,
    /// Times a processor was actually invoked
    pub processor_invocations_total: AtomicU64,
    /// Deliveries short-circuited by the idempotency guard
    pub duplicates_total: AtomicU64,
    /// Deliveries that ended in anything other than success or duplicate
    pub errors_total: AtomicU64,

    // === Labeled counters ===
    /// Deliveries by provider and status code
    deliveries_by_provider_status: RwLock<HashMap<(String, u16), u64>>,
    /// Outcomes by stage and outcome name
    outcomes_by_stage: RwLock<HashMap<(&'static str, &'static str), u64>>,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished delivery.
    pub fn record_delivery(&self, provider: &str, status_code: u16, outcome: Outcome) {
        self.deliveries_total.fetch_add(1, Ordering::Relaxed);

        if outcome.is_duplicate() {
            self.duplicates_total.fetch_add(1, Ordering::Relaxed);
        } else if outcome != Outcome::Success {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut breakdown) = self.deliveries_by_provider_status.write() {
            *breakdown
                .entry((provider.to_string(), status_code))
                .or_insert(0) += 1;
        }

        if let Ok(mut breakdown) = self.outcomes_by_stage.write() {
            *breakdown
                .entry((outcome.stage().as_str(), outcome.as_str()))
                .or_insert(0) += 1;
        }
    }

    /// Record a processor invocation
    pub fn record_processor_invocation(&self) {
        self.processor_invocations_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Deliveries seen for `provider` with `status_code`.
    pub fn deliveries_for(&self, provider: &str, status_code: u16) -> u64 {
        self.deliveries_by_provider_status
            .read()
            .ok()
            .and_then(|b| b.get(&(provider.to_string(), status_code)).copied())
            .unwrap_or(0)
    }

    /// Times `outcome` was recorded.
    pub fn outcome_count(&self, outcome: Outcome) -> u64 {
        self.outcomes_by_stage
            .read()
            .ok()
            .and_then(|b| b.get(&(outcome.stage().as_str(), outcome.as_str())).copied())
            .unwrap_or(0)
    }

    /// Convert metrics to Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();

        // Counters
        for (name, value) in [
            ("deliveries_total", &self.deliveries_total),
            ("processor_invocations_total", &self.processor_invocations_total),
            ("duplicates_total", &self.duplicates_total),
            ("errors_total", &self.errors_total),
        ] {
            let _ = writeln!(output, "# TYPE {PREFIX}_{name} counter");
            let _ = writeln!(output, "{PREFIX}_{name} {}", value.load(Ordering::Relaxed));
        }

        // Sorted so scrapes are stable
        if let Ok(breakdown) = self.deliveries_by_provider_status.read() {
            let sorted: BTreeMap<_, _> = breakdown.iter().collect();
            let _ = writeln!(output, "# TYPE {PREFIX}_deliveries counter");
            for ((provider, status), count) in sorted {
                let _ = writeln!(
                    output,
                    "{PREFIX}_deliveries{{provider=\"{provider}\",status=\"{status}\"}} {count}"
                );
            }
        }

        if let Ok(breakdown) = self.outcomes_by_stage.read() {
            let sorted: BTreeMap<_, _> = breakdown.iter().collect();
            let _ = writeln!(output, "# TYPE {PREFIX}_outcomes counter");
            for ((stage, outcome), count) in sorted {
                let _ = writeln!(
                    output,
                    "{PREFIX}_outcomes{{stage=\"{stage}\",outcome=\"{outcome}\"}} {count}"
                );
            }
        }

        output
    }
}
