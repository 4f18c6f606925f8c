//! Feed aggregator - coordinates one ingestion worker per exchange

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use arb_core::{ExchangeFeedConfig, ExchangeId, FeedTransport, RetryConfig, ValidationConfig};

use crate::events::EventReporter;
use crate::feeds::{FeedConfig, QuoteSource, WsQuoteSource};
use crate::resilience::{ConnectionManager, ExchangeHealth};
use crate::rest::{RestFeedConfig, RestQuoteSource};
use crate::state::QuoteStore;
use crate::validator::Validator;
use crate::worker::{IngestionStats, IngestionWorker, WorkerExit};

/// Aggregator configuration
#[derive(Debug, Clone, Default)]
pub struct AggregatorConfig {
    pub validation: ValidationConfig,
    pub retry: RetryConfig,
    pub connect_timeout: Option<Duration>,
}

/// Owns the quote store and the ingestion workers feeding it
pub struct FeedAggregator {
    config: AggregatorConfig,
    store: Arc<QuoteStore>,
    health: Arc<ExchangeHealth>,
    events: EventReporter,
    shutdown: CancellationToken,
    handles: Vec<(ExchangeId, JoinHandle<WorkerExit>)>,
    ingestion: BTreeMap<ExchangeId, Arc<IngestionStats>>,
}

impl FeedAggregator {
    /// Workers stop when `shutdown` (or a parent of it) is cancelled
    pub fn new(config: AggregatorConfig, shutdown: CancellationToken) -> Self {
        Self {
            config,
            store: Arc::new(QuoteStore::new()),
            health: Arc::new(ExchangeHealth::new()),
            events: EventReporter::new(),
            shutdown,
            handles: vec![],
            ingestion: BTreeMap::new(),
        }
    }

    pub fn with_events(mut self, events: EventReporter) -> Self {
        self.events = events;
        self
    }

    /// Get shared store reference
    pub fn store(&self) -> Arc<QuoteStore> {
        Arc::clone(&self.store)
    }

    pub fn health(&self) -> Arc<ExchangeHealth> {
        Arc::clone(&self.health)
    }

    /// Spawn a worker for `source`
    pub fn spawn<S>(&mut self, source: S)
    where
        S: QuoteSource + 'static,
    {
        let exchange_id = source.exchange_id().clone();

        let connection = ConnectionManager::new(exchange_id.clone(), &self.config.retry)
            .with_health(Arc::clone(&self.health))
            .with_events(self.events.clone());
        let worker = IngestionWorker::new(
            source,
            Validator::from_config(&self.config.validation),
            self.config.validation.ingestion_min_volume_usd(),
            Arc::clone(&self.store),
            connection,
        )
        .with_events(self.events.clone());

        self.ingestion.insert(exchange_id.clone(), worker.stats());

        let token = self.shutdown.child_token();
        let handle = tokio::spawn(worker.run(token));
        self.handles.push((exchange_id.clone(), handle));
        info!(exchange = %exchange_id, "Started ingestion worker");
    }

    /// Start a worker per configured exchange: streaming when it has a
    /// `ws_url`, polling its `rest_url` otherwise
    pub fn start(&mut self, exchanges: &BTreeMap<ExchangeId, ExchangeFeedConfig>) {
        info!(exchanges = exchanges.len(), "Starting feed aggregator");

        for (exchange_id, feed) in exchanges {
            match feed.transport() {
                Some(FeedTransport::WebSocket(url)) => {
                    let mut config = FeedConfig::new(exchange_id.clone(), url, feed.symbols.clone());
                    if let Some(timeout) = self.config.connect_timeout {
                        config.connect_timeout = timeout;
                    }
                    self.spawn(WsQuoteSource::new(config));
                }
                Some(FeedTransport::RestPolling(url)) => {
                    let mut config = RestFeedConfig::new(exchange_id.clone(), url, feed.symbols.clone())
                        .with_poll_interval(feed.poll_interval());
                    if let Some(timeout) = self.config.connect_timeout {
                        config.request_timeout = timeout;
                    }
                    self.spawn(RestQuoteSource::new(config));
                }
                None => warn!(exchange = %exchange_id, "No ws_url or rest_url; exchange skipped"),
            }
        }
    }

    /// Wait for every worker to finish; returns how each one ended
    pub async fn join(&mut self) -> Vec<(ExchangeId, WorkerExit)> {
        let (ids, handles): (Vec<_>, Vec<_>) = self.handles.drain(..).unzip();
        let results = futures::future::join_all(handles).await;

        ids.into_iter()
            .zip(results)
            .filter_map(|(id, res)| match res {
                Ok(exit) => Some((id, exit)),
                Err(e) => {
                    error!(exchange = %id, "Ingestion worker panicked: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Cancel every worker and wait for it to stop
    pub async fn stop(&mut self) -> Vec<(ExchangeId, WorkerExit)> {
        info!("Stopping feed aggregator");
        self.shutdown.cancel();
        self.join().await
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && self.handles.iter().any(|(_, h)| !h.is_finished())
    }

    /// Get statistics
    pub fn stats(&self) -> AggregatorStats {
        let store = self.store.stats();

        AggregatorStats {
            feed_count: self.handles.len(),
            key_count: store.key_count,
            snapshot_count: store.snapshot_count,
            record_count: store.record_count,
            last_update_age: store.last_update_age,
            accepted: self.ingestion.values().map(|s| s.accepted()).sum(),
            rejected: self.ingestion.values().map(|s| s.rejected_total()).sum(),
            failed_exchanges: self.health.failed_exchanges().into_iter().collect(),
        }
    }

    pub fn ingestion_stats(&self, exchange_id: &ExchangeId) -> Option<Arc<IngestionStats>> {
        self.ingestion.get(exchange_id).cloned()
    }
}

/// Aggregator statistics
#[derive(Debug, Clone)]
pub struct AggregatorStats {
    pub feed_count: usize,
    pub key_count: usize,
    pub snapshot_count: usize,
    pub record_count: u64,
    pub last_update_age: Option<Duration>,
    pub accepted: u64,
    pub rejected: u64,
    pub failed_exchanges: Vec<ExchangeId>,
}
