//! Main arbitrage scanner

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use arb_core::{CoreResult, DetectionConfig, Opportunity, ValidationConfig};
use arb_price_feed::{ExchangeHealth, QuoteStore};

use crate::sink::OpportunitySink;
use crate::strategies::{DetectionContext, SpatialStrategy, Strategy, TriangularStrategy};

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub tick_interval: Duration,
    pub max_age: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(50),
            max_age: Duration::from_secs(5),
        }
    }
}

/// Main arbitrage scanner
pub struct ArbitrageScanner {
    config: ScannerConfig,
    store: Arc<QuoteStore>,
    health: Arc<ExchangeHealth>,
    strategies: Vec<Box<dyn Strategy>>,
    sink: Arc<OpportunitySink>,
    ticks: AtomicU64,
    emitted: AtomicU64,
}

impl ArbitrageScanner {
    pub fn new(
        config: ScannerConfig,
        store: Arc<QuoteStore>,
        health: Arc<ExchangeHealth>,
        sink: Arc<OpportunitySink>,
    ) -> Self {
        Self {
            config,
            store,
            health,
            strategies: vec![],
            sink,
            ticks: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
        }
    }

    /// Scanner with the triangular and spatial strategies the config asks for
    pub fn from_config(
        detection: &DetectionConfig,
        validation: &ValidationConfig,
        store: Arc<QuoteStore>,
        health: Arc<ExchangeHealth>,
        sink: Arc<OpportunitySink>,
    ) -> CoreResult<Self> {
        let config = ScannerConfig {
            tick_interval: detection.tick_interval(),
            max_age: validation.max_age(),
        };
        let mut scanner = Self::new(config, store, health, sink);

        if !detection.triangles.is_empty() || detection.auto_discover_triangles {
            scanner.add_strategy(Box::new(TriangularStrategy::from_config(detection, validation)?));
        }
        if !detection.spatial_pairs.is_empty() {
            scanner.add_strategy(Box::new(SpatialStrategy::from_config(detection, validation)));
        }

        Ok(scanner)
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        info!(strategy = strategy.name(), "Registered strategy");
        self.strategies.push(strategy);
    }

    pub fn sink(&self) -> Arc<OpportunitySink> {
        Arc::clone(&self.sink)
    }

    /// Run detection ticks until shutdown, then close the sink
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            strategies = self.strategies.len(),
            "Starting arbitrage scanner, tick every {:?}",
            self.config.tick_interval
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Scanner shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        self.sink.close();
        info!(
            ticks = self.ticks.load(Ordering::Relaxed),
            emitted = self.emitted.load(Ordering::Relaxed),
            "Scanner stopped"
        );
    }

    /// One detection pass; opportunities go to the sink
    pub fn tick(&self) -> usize {
        let start = Instant::now();
        let opportunities = self.scan_at(Utc::now());
        let count = opportunities.len();

        for opp in opportunities {
            self.sink.push(opp);
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.emitted.fetch_add(count as u64, Ordering::Relaxed);

        if count > 0 {
            info!("Found {} opportunities in {:?}", count, start.elapsed());
        } else {
            debug!("Scan completed in {:?}, no opportunities", start.elapsed());
        }
        count
    }

    /// Evaluate every strategy as of `now`, best profit first
    pub fn scan_at(&self, now: DateTime<Utc>) -> Vec<Opportunity> {
        let ctx = DetectionContext {
            store: &self.store,
            health: &self.health,
            max_age: self.config.max_age,
            now,
        };

        let mut opportunities: Vec<Opportunity> = self
            .strategies
            .par_iter()
            .flat_map(|strategy| strategy.find_opportunities(&ctx))
            .collect();

        opportunities.sort_by(|a, b| b.estimated_profit_pct.cmp(&a.estimated_profit_pct));
        opportunities
    }

    /// Get current stats
    pub fn stats(&self) -> ScannerStats {
        ScannerStats {
            strategy_count: self.strategies.len(),
            ticks: self.ticks.load(Ordering::Relaxed),
            opportunities_emitted: self.emitted.load(Ordering::Relaxed),
            sink_len: self.sink.len(),
            sink_dropped: self.sink.dropped(),
            failed_exchanges: self.health.failed_exchanges().len(),
        }
    }
}

/// Scanner statistics
#[derive(Debug, Clone)]
pub struct ScannerStats {
    pub strategy_count: usize,
    pub ticks: u64,
    pub opportunities_emitted: u64,
    pub sink_len: usize,
    pub sink_dropped: u64,
    pub failed_exchanges: usize,
}
