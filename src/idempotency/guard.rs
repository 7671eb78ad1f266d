//! Idempotency Guard
//!
//! Wraps a mutating operation so that, for a given key, it is dispatched at
//! most once per logical request.
//!
//! # Record Lifecycle
//!
//! ```text
//! (absent) → IN_FLIGHT → COMPLETED          replayed on reuse
//!                 ↓
//!              FAILED → IN_FLIGHT (re-dispatch under the same key)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Single writer per key**: the IN_FLIGHT claim happens inside the map's
//!    entry lock, so two concurrent submissions cannot both claim a key.
//! 2. **No lock across await**: the entry lock is released before the
//!    operation runs.
//! 3. **Re-dispatch only after FAILED**: a FAILED record may be dispatched
//!    again because the ledger deduplicates by the same key; a COMPLETED
//!    record is only ever replayed.
//! 4. **Dropped callers**: if the submitting future is dropped mid-flight the
//!    record is settled as FAILED/status-unknown rather than left IN_FLIGHT.
//! 5. **Owner scope**: records are keyed by `(owner, key)`; two owners using
//!    the same key never see each other's records.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::key::{Fingerprint, IdempotencyKey};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::ledger::OwnerId;

type RecordId = (OwnerId, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    InFlight,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::InFlight => "IN_FLIGHT",
            RecordStatus::Completed => "COMPLETED",
            RecordStatus::Failed => "FAILED",
        }
    }
}

/// Stored outcome of a keyed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState<T> {
    InFlight,
    Completed(T),
    Failed(EngineError),
}

impl<T> RecordState<T> {
    pub fn status(&self) -> RecordStatus {
        match self {
            RecordState::InFlight => RecordStatus::InFlight,
            RecordState::Completed(_) => RecordStatus::Completed,
            RecordState::Failed(_) => RecordStatus::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyRecord<T> {
    pub owner: OwnerId,
    pub key: IdempotencyKey,
    pub fingerprint: Fingerprint,
    pub state: RecordState<T>,
    /// Number of dispatches under this key
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> IdempotencyRecord<T> {
    fn in_flight(
        owner: OwnerId,
        key: IdempotencyKey,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            owner,
            key,
            fingerprint,
            state: RecordState::InFlight,
            attempts: 1,
            created_at: now,
            updated_at: now,
            expires_at: now + retention,
        }
    }

    #[inline]
    pub fn status(&self) -> RecordStatus {
        self.state.status()
    }

    /// Past retention and not running; safe to forget
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at && self.status() != RecordStatus::InFlight
    }
}

/// Settles the record if the submitting future is dropped mid-flight
struct PendingClaim<'a, T> {
    records: &'a DashMap<RecordId, IdempotencyRecord<T>>,
    clock: &'a dyn Clock,
    owner: OwnerId,
    key: &'a IdempotencyKey,
    settled: bool,
}

impl<T> PendingClaim<'_, T> {
    fn settle(&mut self, state: RecordState<T>) {
        if let Some(mut record) = self.records.get_mut(&(self.owner, self.key.to_string())) {
            record.state = state;
            record.updated_at = self.clock.now();
        }
        self.settled = true;
    }
}

impl<T> Drop for PendingClaim<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(key = %self.key, "Submission abandoned mid-flight, outcome unknown");
            self.settle(RecordState::Failed(EngineError::StatusUnknown {
                idempotency_key: self.key.to_string(),
            }));
        }
    }
}

pub struct IdempotencyGuard<T> {
    records: DashMap<RecordId, IdempotencyRecord<T>>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    timeout: Duration,
    dispatches: AtomicU64,
}

impl<T> IdempotencyGuard<T>
where
    T: Clone + Send + Sync,
{
    /// * `retention` - how long a record is kept for replay
    /// * `timeout` - bound on one dispatch of the operation
    pub fn new(clock: Arc<dyn Clock>, retention: chrono::Duration, timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            retention,
            timeout,
            dispatches: AtomicU64::new(0),
        }
    }

    /// Run `operation` at most once for `owner`'s `key`
    ///
    /// - first use: claim IN_FLIGHT, dispatch, store the result
    /// - COMPLETED with same fingerprint: replay stored value, no dispatch
    /// - IN_FLIGHT: `RequestInFlight`
    /// - FAILED with same fingerprint: dispatch again under the same key
    /// - different fingerprint: `KeyReuse`
    ///
    /// A dispatch exceeding the timeout resolves as `StatusUnknown`.
    pub async fn submit<F, Fut>(
        &self,
        owner: OwnerId,
        key: &IdempotencyKey,
        fingerprint: Fingerprint,
        operation: F,
    ) -> Result<T, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        if let Some(replayed) = self.claim(owner, key, fingerprint)? {
            return Ok(replayed);
        }

        let mut pending = PendingClaim {
            records: &self.records,
            clock: self.clock.as_ref(),
            owner,
            key,
            settled: false,
        };
        self.dispatches.fetch_add(1, Ordering::SeqCst);

        let result = match tokio::time::timeout(self.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Dispatch timed out"
                );
                Err(EngineError::StatusUnknown {
                    idempotency_key: key.to_string(),
                })
            }
        };

        match &result {
            Ok(value) => {
                pending.settle(RecordState::Completed(value.clone()));
                debug!(key = %key, "Idempotency record completed");
            }
            Err(e) => {
                pending.settle(RecordState::Failed(e.clone()));
                debug!(key = %key, error = %e, "Idempotency record failed");
            }
        }

        result
    }

    /// Claim the key, or return the value to replay
    fn claim(
        &self,
        owner: OwnerId,
        key: &IdempotencyKey,
        fingerprint: Fingerprint,
    ) -> Result<Option<T>, EngineError> {
        let now = self.clock.now();

        match self.records.entry((owner, key.to_string())) {
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyRecord::in_flight(
                    owner,
                    key.clone(),
                    fingerprint,
                    now,
                    self.retention,
                ));
                Ok(None)
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();

                if record.is_expired(now) {
                    debug!(key = %key, "Expired idempotency record replaced");
                    *record = IdempotencyRecord::in_flight(
                        owner,
                        key.clone(),
                        fingerprint,
                        now,
                        self.retention,
                    );
                    return Ok(None);
                }

                if record.fingerprint != fingerprint {
                    warn!(key = %key, "Idempotency key reused with different payload");
                    return Err(EngineError::KeyReuse);
                }

                match &record.state {
                    RecordState::InFlight => {
                        warn!(key = %key, "Concurrent duplicate rejected");
                        Err(EngineError::RequestInFlight)
                    }
                    RecordState::Completed(value) => {
                        info!(key = %key, "Idempotent replay");
                        Ok(Some(value.clone()))
                    }
                    RecordState::Failed(_) => {
                        record.state = RecordState::InFlight;
                        record.attempts += 1;
                        record.updated_at = now;
                        info!(
                            key = %key,
                            attempts = record.attempts,
                            "Re-dispatching failed request"
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Current record for `owner`'s key (the "check status" query)
    pub fn status(&self, owner: OwnerId, key: &IdempotencyKey) -> Option<IdempotencyRecord<T>> {
        let now = self.clock.now();
        self.records
            .get(&(owner, key.to_string()))
            .filter(|r| !r.is_expired(now))
            .map(|r| r.value().clone())
    }

    /// Drop records past retention; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Total number of operation dispatches (replays excluded)
    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
