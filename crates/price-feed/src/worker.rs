//! Ingestion worker: one per exchange
//!
//! Pulls raw quotes from a [`QuoteSource`], validates them and records the
//! survivors in the shared [`QuoteStore`]. Connection failures go through the
//! [`ConnectionManager`]; backoff sleeps are cancellable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arb_core::{ExchangeId, FeedError, RawQuote, RejectionKind};

use crate::events::EventReporter;
use crate::feeds::QuoteSource;
use crate::resilience::{ConnectionManager, RetryDecision};
use crate::state::QuoteStore;
use crate::validator::Validator;

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    PermanentlyFailed,
}

/// Per-worker counters
#[derive(Debug, Default)]
pub struct IngestionStats {
    accepted: AtomicU64,
    rejected: [AtomicU64; 4],
}

impl IngestionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self, kind: RejectionKind) {
        self.rejected[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self, kind: RejectionKind) -> u64 {
        self.rejected[kind.index()].load(Ordering::Relaxed)
    }

    pub fn rejected_total(&self) -> u64 {
        RejectionKind::ALL.iter().map(|k| self.rejected(*k)).sum()
    }
}

enum PumpEnd {
    Shutdown,
    Closed,
    Failed(FeedError),
}

pub struct IngestionWorker<S> {
    source: S,
    validator: Validator,
    min_volume_usd: f64,
    store: Arc<QuoteStore>,
    connection: ConnectionManager,
    events: EventReporter,
    stats: Arc<IngestionStats>,
}

impl<S: QuoteSource> IngestionWorker<S> {
    pub fn new(
        source: S,
        validator: Validator,
        min_volume_usd: f64,
        store: Arc<QuoteStore>,
        connection: ConnectionManager,
    ) -> Self {
        Self {
            source,
            validator,
            min_volume_usd,
            store,
            connection,
            events: EventReporter::new(),
            stats: Arc::new(IngestionStats::new()),
        }
    }

    /// Reporter for rejections; connection transitions report through the manager
    pub fn with_events(mut self, events: EventReporter) -> Self {
        self.events = events;
        self
    }

    pub fn stats(&self) -> Arc<IngestionStats> {
        Arc::clone(&self.stats)
    }

    pub fn exchange_id(&self) -> &ExchangeId {
        self.source.exchange_id()
    }

    /// Validate one raw quote and record it when it passes
    pub fn ingest(&self, raw: RawQuote) -> bool {
        match self.validator.validate(&raw, self.min_volume_usd) {
            Ok(snapshot) => {
                self.store.record(snapshot);
                self.stats.record_accepted();
                true
            }
            Err(reason) => {
                self.stats.record_rejection(reason.kind());
                self.events.rejected(&raw.exchange_id, raw.symbol.as_ref(), &reason);
                false
            }
        }
    }

    /// Run until shutdown or until the retry policy gives up
    pub async fn run(mut self, shutdown: CancellationToken) -> WorkerExit {
        info!(exchange = %self.exchange_id(), "Starting ingestion worker");

        loop {
            let connected = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.finish(WorkerExit::Shutdown).await,
                res = self.source.connect() => res,
            };

            let failure = match connected {
                Ok(()) => {
                    self.connection.on_connected();
                    match self.pump(&shutdown).await {
                        PumpEnd::Shutdown => return self.finish(WorkerExit::Shutdown).await,
                        PumpEnd::Closed => {
                            self.connection.on_disconnected();
                            FeedError::Disconnected
                        }
                        PumpEnd::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.source.disconnect().await;

            match self.connection.on_failure(&failure) {
                RetryDecision::RetryAfter(delay) => {
                    info!(
                        exchange = %self.exchange_id(),
                        attempt = self.connection.attempts(),
                        "Reconnecting in {:?}",
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return self.finish(WorkerExit::Shutdown).await,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(
                        exchange = %self.exchange_id(),
                        attempts = self.connection.attempts(),
                        "Giving up on exchange; detection continues without it"
                    );
                    return WorkerExit::PermanentlyFailed;
                }
            }
        }
    }

    async fn pump(&mut self, shutdown: &CancellationToken) -> PumpEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return PumpEnd::Shutdown,
                next = self.source.next_quote() => next,
            };

            match next {
                Ok(Some(raw)) => {
                    self.ingest(raw);
                }
                Ok(None) => return PumpEnd::Closed,
                Err(e) => return PumpEnd::Failed(e),
            }
        }
    }

    async fn finish(&mut self, exit: WorkerExit) -> WorkerExit {
        self.source.disconnect().await;
        info!(
            exchange = %self.exchange_id(),
            accepted = self.stats.accepted(),
            rejected = self.stats.rejected_total(),
            "Ingestion worker stopped"
        );
        exit
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::FeedEvent;
    use crate::resilience::{ConnectionState, ExchangeHealth};
    use arb_core::{FeedResult, RetryConfig, Symbol};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Source that replays a fixed script, then idles
    pub(crate) struct ScriptedSource {
        pub exchange_id: ExchangeId,
        pub connects: VecDeque<FeedResult<()>>,
        pub frames: VecDeque<FeedResult<Option<RawQuote>>>,
    }

    impl ScriptedSource {
        pub fn new(exchange: &str) -> Self {
            Self {
                exchange_id: exchange.into(),
                connects: VecDeque::new(),
                frames: VecDeque::new(),
            }
        }
    }

    #[async_trait]
    impl QuoteSource for ScriptedSource {
        fn exchange_id(&self) -> &ExchangeId {
            &self.exchange_id
        }

        async fn connect(&mut self) -> FeedResult<()> {
            self.connects
                .pop_front()
                .unwrap_or_else(|| Err(FeedError::ConnectionFailed("script exhausted".into())))
        }

        async fn next_quote(&mut self) -> FeedResult<Option<RawQuote>> {
            match self.frames.pop_front() {
                Some(frame) => frame,
                None => std::future::pending().await,
            }
        }

        async fn disconnect(&mut self) {}
    }

    pub(crate) fn quote(exchange: &str, symbol: &str, bid: i64, ask: i64, volume: i64) -> RawQuote {
        RawQuote {
            exchange_id: exchange.into(),
            symbol: Some(Symbol::from(symbol)),
            bid: Some(Decimal::from(bid)),
            ask: Some(Decimal::from(ask)),
            bid_volume: Some(Decimal::from(volume)),
            ask_volume: Some(Decimal::from(volume)),
            timestamp: Some(Utc::now()),
        }
    }

    fn worker(source: ScriptedSource, retry: &RetryConfig) -> IngestionWorker<ScriptedSource> {
        let store = Arc::new(QuoteStore::new());
        let connection = ConnectionManager::new(source.exchange_id.clone(), retry);
        IngestionWorker::new(source, Validator::new(Duration::from_secs(5), 1000.0), 5000.0, store, connection)
    }

    #[test]
    fn test_ingest_accepts_and_rejects() {
        let (events, mut rx) = EventReporter::channel();
        let w = worker(ScriptedSource::new("binance"), &RetryConfig::default()).with_events(events);

        assert!(w.ingest(quote("binance", "BTC/USDT", 60_000, 60_010, 1)));
        assert!(!w.ingest(quote("binance", "BTC/USDT", 60_010, 60_000, 1)));
        assert!(!w.ingest(quote("binance", "DOGE/USDT", 1, 1, 10)));

        let stats = w.stats();
        assert_eq!(stats.accepted(), 1);
        assert_eq!(stats.rejected(RejectionKind::InvalidPrice), 1);
        assert_eq!(stats.rejected(RejectionKind::InsufficientVolume), 1);
        assert_eq!(w.store.stats().snapshot_count, 1);

        let first = tokio_test::block_on(rx.recv()).unwrap();
        assert!(matches!(first, FeedEvent::Rejected { ref symbol, .. } if symbol.as_ref().unwrap().as_str() == "BTC/USDT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_shutdown() {
        let mut source = ScriptedSource::new("kraken");
        source.connects.push_back(Ok(()));
        source.frames.push_back(Ok(Some(quote("kraken", "BTC/USDT", 60_000, 60_010, 1))));
        source.frames.push_back(Ok(Some(quote("kraken", "ETH/USDT", 3_000, 3_001, 10))));

        let w = worker(source, &RetryConfig::default());
        let store = Arc::clone(&w.store);
        let token = CancellationToken::new();
        let handle = tokio::spawn(w.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert_eq!(handle.await.unwrap(), WorkerExit::Shutdown);
        assert_eq!(store.stats().key_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let source = ScriptedSource::new("okx");
        let health = Arc::new(ExchangeHealth::new());
        let retry = RetryConfig::default();

        let store = Arc::new(QuoteStore::new());
        let connection = ConnectionManager::new("okx".into(), &retry).with_health(Arc::clone(&health));
        let w = IngestionWorker::new(source, Validator::default(), 5000.0, store, connection);

        let started = tokio::time::Instant::now();
        let exit = w.run(CancellationToken::new()).await;

        assert_eq!(exit, WorkerExit::PermanentlyFailed);
        assert_eq!(started.elapsed(), Duration::from_secs(10 + 20 + 40 + 80));
        assert_eq!(health.state(&"okx".into()), Some(ConnectionState::PermanentlyFailed));
        assert!(!health.is_active(&"okx".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_error() {
        let mut source = ScriptedSource::new("bybit");
        source.connects.push_back(Ok(()));
        source.connects.push_back(Ok(()));
        source.frames.push_back(Err(FeedError::Timeout("read".into())));
        source.frames.push_back(Ok(Some(quote("bybit", "BTC/USDT", 60_000, 60_010, 1))));

        let (events, mut rx) = EventReporter::channel();
        let retry = RetryConfig::default();
        let store = Arc::new(QuoteStore::new());
        let connection = ConnectionManager::new("bybit".into(), &retry).with_events(events.clone());
        let w = IngestionWorker::new(source, Validator::default(), 5000.0, Arc::clone(&store), connection)
            .with_events(events);

        let token = CancellationToken::new();
        let handle = tokio::spawn(w.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(11)).await;
        token.cancel();
        assert_eq!(handle.await.unwrap(), WorkerExit::Shutdown);

        assert!(store.latest(&"bybit".into(), &"BTC/USDT".into()).is_some());

        let mut states = Vec::new();
        while let Ok(FeedEvent::StateChanged { to, .. }) = rx.try_recv() {
            states.push(to);
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Retrying { attempt: 1 },
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let w = worker(ScriptedSource::new("kucoin"), &RetryConfig::default());
        let token = CancellationToken::new();
        let handle = tokio::spawn(w.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = tokio::time::Instant::now();
        token.cancel();

        assert_eq!(handle.await.unwrap(), WorkerExit::Shutdown);
        assert!(before.elapsed() < Duration::from_secs(1));
    }
}
