//! Concurrent quote store
//!
//! One independently locked history per (exchange, symbol). The DashMap only
//! hands out the per-key handle; its shard guard is released before the
//! history lock is taken, so no two locks are ever held together and writers
//! to unrelated keys never contend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use arb_core::{ExchangeId, QuoteSnapshot, Symbol, HISTORY_CAPACITY};

use crate::history::QuoteHistory;

/// Key for history lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub exchange_id: ExchangeId,
    pub symbol: Symbol,
}

impl QuoteKey {
    pub fn new(exchange_id: ExchangeId, symbol: Symbol) -> Self {
        Self { exchange_id, symbol }
    }
}

type HistoryHandle = Arc<RwLock<QuoteHistory>>;

/// Bounded recent-history store shared by ingestion workers and the detector
#[derive(Debug)]
pub struct QuoteStore {
    histories: DashMap<QuoteKey, HistoryHandle>,
    capacity: usize,

    /// Stats
    record_count: AtomicU64,
    last_update_ms: AtomicI64,
}

impl QuoteStore {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            histories: DashMap::new(),
            capacity,
            record_count: AtomicU64::new(0),
            last_update_ms: AtomicI64::new(0),
        }
    }

    fn handle(&self, key: &QuoteKey) -> Option<HistoryHandle> {
        self.histories.get(key).map(|h| Arc::clone(h.value()))
    }

    fn handle_or_create(&self, key: QuoteKey) -> HistoryHandle {
        if let Some(handle) = self.handle(&key) {
            return handle;
        }
        let capacity = self.capacity;
        let entry = self
            .histories
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(QuoteHistory::with_capacity(capacity))));
        Arc::clone(entry.value())
    }

    /// Append a validated snapshot, evicting the oldest at capacity
    pub fn record(&self, snapshot: QuoteSnapshot) {
        debug_assert!(
            !snapshot.bid_volume.is_sign_negative() && !snapshot.ask_volume.is_sign_negative(),
            "negative volume reached the store"
        );
        debug_assert!(snapshot.bid > rust_decimal::Decimal::ZERO && snapshot.ask >= snapshot.bid);

        let key = QuoteKey::new(snapshot.exchange_id.clone(), snapshot.symbol.clone());
        let handle = self.handle_or_create(key);
        handle.write().push(snapshot);

        self.record_count.fetch_add(1, Ordering::Relaxed);
        self.last_update_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Newest snapshot regardless of age or liquidity
    pub fn latest(&self, exchange_id: &ExchangeId, symbol: &Symbol) -> Option<QuoteSnapshot> {
        let key = QuoteKey::new(exchange_id.clone(), symbol.clone());
        let handle = self.handle(&key)?;
        let history = handle.read();
        history.latest().cloned()
    }

    /// Newest snapshot if it is still fresh and liquid enough right now
    pub fn latest_tradeable(
        &self,
        exchange_id: &ExchangeId,
        symbol: &Symbol,
        max_age: Duration,
        min_volume_usd: f64,
    ) -> Option<QuoteSnapshot> {
        self.latest_tradeable_at(exchange_id, symbol, max_age, min_volume_usd, Utc::now())
    }

    /// Same as [`latest_tradeable`](Self::latest_tradeable) as of `now`.
    ///
    /// Only the newest entry is considered; if it has gone stale or
    /// illiquid, older entries are not consulted. Liquidity is the smaller
    /// side's USD notional compared against `min_volume_usd`; the volume
    /// score saturates and is never used as a gate.
    pub fn latest_tradeable_at(
        &self,
        exchange_id: &ExchangeId,
        symbol: &Symbol,
        max_age: Duration,
        min_volume_usd: f64,
        now: DateTime<Utc>,
    ) -> Option<QuoteSnapshot> {
        let snapshot = self.latest(exchange_id, symbol)?;

        if snapshot.is_stale(max_age, now) {
            trace!(
                exchange = %exchange_id,
                symbol = %symbol,
                age_ms = snapshot.age_ms(now),
                "Stale quote at detection time"
            );
            return None;
        }

        let available_usd = snapshot.min_notional_usd();
        if available_usd < min_volume_usd {
            trace!(
                exchange = %exchange_id,
                symbol = %symbol,
                available_usd,
                min_volume_usd,
                "Illiquid quote at detection time"
            );
            return None;
        }

        Some(snapshot)
    }

    /// Copy of a history, oldest first
    pub fn history(&self, exchange_id: &ExchangeId, symbol: &Symbol) -> Option<Vec<QuoteSnapshot>> {
        let key = QuoteKey::new(exchange_id.clone(), symbol.clone());
        let handle = self.handle(&key)?;
        let history = handle.read();
        Some(history.to_vec())
    }

    /// Symbols with at least one recorded snapshot on an exchange
    pub fn symbols_for(&self, exchange_id: &ExchangeId) -> BTreeSet<Symbol> {
        self.histories
            .iter()
            .filter(|e| &e.key().exchange_id == exchange_id)
            .map(|e| e.key().symbol.clone())
            .collect()
    }

    /// Exchanges with at least one recorded snapshot
    pub fn exchanges(&self) -> BTreeSet<ExchangeId> {
        self.histories
            .iter()
            .map(|e| e.key().exchange_id.clone())
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stats
    pub fn stats(&self) -> QuoteStoreStats {
        let handles: Vec<HistoryHandle> = self
            .histories
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let snapshot_count = handles.iter().map(|h| h.read().len()).sum();

        let last_ms = self.last_update_ms.load(Ordering::Relaxed);
        let last_update_age = (last_ms > 0).then(|| {
            let age_ms = (Utc::now().timestamp_millis() - last_ms).max(0);
            Duration::from_millis(age_ms as u64)
        });

        QuoteStoreStats {
            key_count: handles.len(),
            snapshot_count,
            record_count: self.record_count.load(Ordering::Relaxed),
            last_update_age,
        }
    }
}

impl Default for QuoteStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the quote store
#[derive(Debug, Clone)]
pub struct QuoteStoreStats {
    pub key_count: usize,
    pub snapshot_count: usize,
    pub record_count: u64,
    pub last_update_age: Option<Duration>,
}
