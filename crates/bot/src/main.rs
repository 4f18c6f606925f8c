//! Arbitrage bot
//!
//! Ingests quotes from every configured exchange and reports triangular and
//! spatial opportunities until Ctrl+C / SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use arb_bot::{init_logging, settings, LogFormat, ShutdownController};
use arb_detector::{ArbitrageScanner, OpportunitySink};
use arb_price_feed::{AggregatorConfig, FeedAggregator, QuoteStore, WorkerExit};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_logging(LogFormat::from_env())?;
    info!("Starting arbitrage bot v{}", env!("CARGO_PKG_VERSION"));

    let config = settings::load(settings::config_path())?;
    info!(
        exchanges = config.exchanges.len(),
        symbols = config.all_symbols().len(),
        triangles = config.detection.triangles.len(),
        spatial_pairs = config.detection.spatial_pairs.len(),
        "Configuration loaded"
    );

    let shutdown = ShutdownController::with_signals();

    let mut aggregator = FeedAggregator::new(
        AggregatorConfig {
            validation: config.validation.clone(),
            retry: config.retry.clone(),
            connect_timeout: None,
        },
        shutdown.child_token(),
    );
    aggregator.start(&config.exchanges);

    let sink = Arc::new(OpportunitySink::new(config.detection.sink_capacity));
    let scanner = Arc::new(ArbitrageScanner::from_config(
        &config.detection,
        &config.validation,
        aggregator.store(),
        aggregator.health(),
        Arc::clone(&sink),
    )?);

    let scanner_task = {
        let scanner = Arc::clone(&scanner);
        let token = shutdown.child_token();
        tokio::spawn(async move { scanner.run(token).await })
    };
    let consumer_task = tokio::spawn(consume_opportunities(Arc::clone(&sink)));
    let stats_task = spawn_stats_reporter(aggregator.store(), Arc::clone(&scanner), shutdown.child_token());

    info!("Press Ctrl+C to shutdown");
    shutdown.wait_for_shutdown().await;
    info!("Shutting down");

    for (exchange, exit) in aggregator.stop().await {
        if exit == WorkerExit::PermanentlyFailed {
            warn!(exchange = %exchange, "Exchange was permanently failed at shutdown");
        }
    }

    if let Err(e) = scanner_task.await {
        error!("Scanner task failed: {}", e);
        // The scanner closes the sink on a clean exit only
        sink.close();
    }
    match consumer_task.await {
        Ok(consumed) => info!(consumed, "Opportunity sink drained"),
        Err(e) => error!("Opportunity consumer failed: {}", e),
    }
    let _ = stats_task.await;

    let stats = scanner.stats();
    info!(
        ticks = stats.ticks,
        opportunities = stats.opportunities_emitted,
        dropped = stats.sink_dropped,
        "Shutdown complete"
    );
    Ok(())
}

/// Stand-in for the execution layer: report every opportunity
async fn consume_opportunities(sink: Arc<OpportunitySink>) -> u64 {
    let mut consumed = 0;

    while let Some(opp) = sink.recv().await {
        consumed += 1;
        warn!(
            target: "arb::opportunity",
            kind = %opp.kind,
            profit_pct = %opp.estimated_profit_pct.round_dp(4),
            volume_score = opp.involved_volume_score,
            "ARBITRAGE OPPORTUNITY: {}",
            opp.path()
        );
        for leg in &opp.legs {
            warn!(target: "arb::opportunity", id = %opp.id, "  {}", leg);
        }
    }

    consumed
}

fn spawn_stats_reporter(
    store: Arc<QuoteStore>,
    scanner: Arc<ArbitrageScanner>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let store_stats = store.stats();
                    let scanner_stats = scanner.stats();
                    info!(
                        keys = store_stats.key_count,
                        snapshots = store_stats.snapshot_count,
                        records = store_stats.record_count,
                        last_update_age = ?store_stats.last_update_age,
                        ticks = scanner_stats.ticks,
                        opportunities = scanner_stats.opportunities_emitted,
                        dropped = scanner_stats.sink_dropped,
                        failed_exchanges = scanner_stats.failed_exchanges,
                        "Quote store stats"
                    );
                }
            }
        }
    })
}
