//! Idempotency Guard
//!
//! Claims an external event id before its processor runs, so at-least-once
//! delivery from a provider turns into at-most-once processing.
//!
//! # Record lifecycle
//!
//! ```text
//!            claim                 release(Completed)
//!   (none) ────────▶ Claimed ──────────────────────────▶ Completed
//!                     │   ▲
//!   release(Failed)   │   │ claim (failed, or lease expired)
//!                     ▼   │
//!                     Failed
//! ```
//!
//! `claim` is a single check-and-set under one lock, so of any number of
//! simultaneous deliveries exactly one receives [`ClaimOutcome::Claimed`].
//! A claim older than the lease is treated as abandoned and may be taken
//! over; releases carry the claim token, so a stalled worker cannot
//! overwrite the state written by the delivery that replaced it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::time::Clock;
use crate::webhooks::error::WebhookResult;
use crate::webhooks::provider::ProviderId;

/// Default lease before an unfinished claim may be taken over.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(30);

/// Default retention for finished records.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default capacity of the in-memory store.
pub const DEFAULT_MAX_RECORDS: usize = 100_000;

// ============================================================================
// Records
// ============================================================================

/// (provider, external event id)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// Sending provider
    pub provider: ProviderId,
    /// Provider event id or body fingerprint
    pub event_id: String,
}

impl IdempotencyKey {
    /// Creates a key.
    pub fn new(provider: ProviderId, event_id: impl Into<String>) -> Self {
        Self {
            provider,
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.event_id)
    }
}

/// Where a record is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// A worker is processing the event
    Claimed,
    /// Processing finished; duplicates short-circuit to success
    Completed,
    /// Processing failed; the next delivery may claim again
    Failed,
}

/// Stored state for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    /// Record key
    pub key: IdempotencyKey,
    /// Lifecycle state
    pub state: RecordState,
    /// When the current claim was taken
    pub claimed_at: DateTime<Utc>,
    /// When processing completed or failed
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of claims taken so far
    pub attempts: u32,
    token: Uuid,
}

impl IdempotencyRecord {
    fn lease_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        elapsed(self.claimed_at, now) >= lease
    }

    fn last_touched(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.claimed_at)
    }
}

/// Time between two instants; zero if `now` is earlier.
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Proof of a successful claim, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimHandle {
    key: IdempotencyKey,
    token: Uuid,
    attempt: u32,
}

impl ClaimHandle {
    /// Key this handle claims.
    pub fn key(&self) -> &IdempotencyKey {
        &self.key
    }

    /// 1 for the first claim, higher after failures or expired leases.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the event and must release it
    Claimed(ClaimHandle),
    /// A previous delivery already completed the event
    AlreadyProcessed,
    /// Another delivery holds an unexpired claim
    AlreadyInFlight,
}

/// How a claim ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Event applied; future deliveries are duplicates
    Completed,
    /// Event not applied; the next delivery may claim it
    Failed,
}

// ============================================================================
// Store
// ============================================================================

/// Storage backing the guard.
///
/// Implementations must make `try_claim` atomic: a plain read followed by
/// a write is not enough. Database-backed stores should use a unique
/// constraint or compare-and-swap.
#[async_trait::async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Atomically claims `key` unless it is completed or held under lease.
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> WebhookResult<ClaimOutcome>;

    /// Finishes a claim. Returns `false` when the handle no longer owns the
    /// record because its lease was taken over.
    async fn release(
        &self,
        handle: &ClaimHandle,
        outcome: ReleaseOutcome,
        now: DateTime<Utc>,
    ) -> WebhookResult<bool>;

    /// Reads a record.
    async fn get(&self, key: &IdempotencyKey) -> WebhookResult<Option<IdempotencyRecord>>;

    /// Drops finished records older than the store's retention. Returns the
    /// number removed.
    async fn prune(&self, now: DateTime<Utc>) -> WebhookResult<usize>;

    /// Number of records held.
    async fn len(&self) -> WebhookResult<usize>;
}

/// Share of capacity freed when a full store needs room.
const EVICTION_BATCH_DIVISOR: usize = 10;

/// In-process store. Suitable for a single gateway instance.
#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
    retention: Duration,
    max_entries: usize,
}

impl InMemoryIdempotencyStore {
    /// Creates a store keeping finished records for `retention`, holding at
    /// most `max_entries` records.
    pub fn new(retention: Duration, max_entries: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            retention,
            max_entries: max_entries.max(1),
        }
    }

    fn prune_locked(
        records: &mut HashMap<IdempotencyKey, IdempotencyRecord>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> usize {
        let before = records.len();
        records.retain(|_, r| {
            r.state == RecordState::Claimed || elapsed(r.last_touched(), now) < retention
        });
        before - records.len()
    }

    /// Makes room for one record. Active claims are never evicted; the
    /// store may exceed capacity if every record is in flight.
    ///
    /// Evicts a batch of the oldest finished records at once so the scan
    /// runs once per batch rather than once per new claim.
    fn make_room(&self, records: &mut HashMap<IdempotencyKey, IdempotencyRecord>, now: DateTime<Utc>) {
        if records.len() < self.max_entries {
            return;
        }
        let pruned = Self::prune_locked(records, now, self.retention);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired idempotency records");
        }
        if records.len() < self.max_entries {
            return;
        }

        let mut finished: Vec<_> = records
            .values()
            .filter(|r| r.state != RecordState::Claimed)
            .map(|r| (r.last_touched(), r.key.clone()))
            .collect();

        let excess = records.len() + 1 - self.max_entries;
        let batch = excess.max(self.eviction_batch()).min(finished.len());
        if batch == 0 {
            return;
        }
        if batch < finished.len() {
            finished.select_nth_unstable_by_key(batch - 1, |(touched, _)| *touched);
        }
        for (_, key) in finished.into_iter().take(batch) {
            records.remove(&key);
        }
        tracing::debug!(evicted = batch, "Evicted oldest idempotency records at capacity");
    }

    fn eviction_batch(&self) -> usize {
        (self.max_entries / EVICTION_BATCH_DIVISOR).max(1)
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, DEFAULT_MAX_RECORDS)
    }
}

#[async_trait::async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> WebhookResult<ClaimOutcome> {
        let mut records = self.records.lock();

        let attempt = match records.get(key) {
            Some(record) => match record.state {
                RecordState::Completed => return Ok(ClaimOutcome::AlreadyProcessed),
                RecordState::Claimed if !record.lease_expired(now, lease) => {
                    return Ok(ClaimOutcome::AlreadyInFlight)
                }
                RecordState::Claimed => {
                    tracing::warn!(
                        key = %key,
                        claimed_at = %record.claimed_at,
                        "Reclaiming abandoned idempotency claim"
                    );
                    record.attempts + 1
                }
                RecordState::Failed => record.attempts + 1,
            },
            None => {
                self.make_room(&mut records, now);
                1
            }
        };

        let token = Uuid::new_v4();
        records.insert(
            key.clone(),
            IdempotencyRecord {
                key: key.clone(),
                state: RecordState::Claimed,
                claimed_at: now,
                completed_at: None,
                attempts: attempt,
                token,
            },
        );

        Ok(ClaimOutcome::Claimed(ClaimHandle {
            key: key.clone(),
            token,
            attempt,
        }))
    }

    async fn release(
        &self,
        handle: &ClaimHandle,
        outcome: ReleaseOutcome,
        now: DateTime<Utc>,
    ) -> WebhookResult<bool> {
        let mut records = self.records.lock();

        match records.get_mut(&handle.key) {
            Some(record) if record.token == handle.token && record.state == RecordState::Claimed => {
                record.state = match outcome {
                    ReleaseOutcome::Completed => RecordState::Completed,
                    ReleaseOutcome::Failed => RecordState::Failed,
                };
                record.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &IdempotencyKey) -> WebhookResult<Option<IdempotencyRecord>> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn prune(&self, now: DateTime<Utc>) -> WebhookResult<usize> {
        let mut records = self.records.lock();
        Ok(Self::prune_locked(&mut records, now, self.retention))
    }

    async fn len(&self) -> WebhookResult<usize> {
        Ok(self.records.lock().len())
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Owns the idempotency store and the lease policy.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl IdempotencyGuard {
    /// Creates a guard over `store`.
    pub fn new(store: Arc<dyn IdempotencyStore>, clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self { store, clock, lease }
    }

    /// Claim lease.
    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Clock used to stamp claims.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Attempts to claim `(provider, event_id)` for processing.
    pub async fn claim(&self, provider: ProviderId, event_id: &str) -> WebhookResult<ClaimOutcome> {
        let key = IdempotencyKey::new(provider, event_id);
        self.store.try_claim(&key, self.clock.now(), self.lease).await
    }

    /// Releases a claim taken by [`claim`](Self::claim).
    ///
    /// Releasing a claim that was taken over after its lease expired is
    /// logged and otherwise ignored.
    pub async fn release(&self, handle: ClaimHandle, outcome: ReleaseOutcome) -> WebhookResult<()> {
        let owned = self.store.release(&handle, outcome, self.clock.now()).await?;
        if !owned {
            tracing::warn!(
                key = %handle.key,
                attempt = handle.attempt,
                ?outcome,
                "Claim was taken over before release; release ignored"
            );
        }
        Ok(())
    }

    /// Reads the record for `(provider, event_id)`.
    pub async fn record(
        &self,
        provider: ProviderId,
        event_id: &str,
    ) -> WebhookResult<Option<IdempotencyRecord>> {
        self.store.get(&IdempotencyKey::new(provider, event_id)).await
    }

    /// Drops expired finished records.
    pub async fn prune(&self) -> WebhookResult<usize> {
        self.store.prune(self.clock.now()).await
    }

    /// Number of records held.
    pub async fn len(&self) -> WebhookResult<usize> {
        self.store.len().await
    }
}

impl fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("lease", &self.lease)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
