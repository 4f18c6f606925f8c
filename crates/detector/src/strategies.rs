//! Arbitrage detection strategies

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::trace;

use arb_core::{
    discover_triangles, CoreResult, DetectionConfig, ExchangeId, Opportunity,
    OpportunityBuilder, OpportunityKind, Side, Symbol, TriangularCycle, ValidationConfig,
};
use arb_price_feed::{ExchangeHealth, QuoteStore};

/// Read-only view of market state for one detection tick
pub struct DetectionContext<'a> {
    pub store: &'a QuoteStore,
    pub health: &'a ExchangeHealth,
    pub max_age: Duration,
    pub now: DateTime<Utc>,
}

impl<'a> DetectionContext<'a> {
    /// Exchanges that have data and are not permanently failed
    fn active_exchanges(&self) -> BTreeSet<ExchangeId> {
        self.store
            .exchanges()
            .into_iter()
            .filter(|e| self.health.is_active(e))
            .collect()
    }
}

/// Strategy trait for different arbitrage types
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn find_opportunities(&self, ctx: &DetectionContext<'_>) -> Vec<Opportunity>;
}

fn min_profit(pct: f64) -> Decimal {
    Decimal::try_from(pct).unwrap_or(Decimal::ZERO)
}

/// A cycle pinned to one exchange, or evaluated on every exchange listing it
#[derive(Debug, Clone)]
pub struct TriangleTarget {
    pub exchange: Option<ExchangeId>,
    pub cycle: TriangularCycle,
}

/// Triangular arbitrage: three pairs on one exchange
pub struct TriangularStrategy {
    targets: Vec<TriangleTarget>,
    auto_discover: bool,
    min_volume_usd: f64,
    min_profit_pct: Decimal,
}

impl TriangularStrategy {
    pub fn new(targets: Vec<TriangleTarget>, min_volume_usd: f64, min_profit_pct: Decimal) -> Self {
        Self {
            targets,
            auto_discover: false,
            min_volume_usd,
            min_profit_pct,
        }
    }

    pub fn from_config(detection: &DetectionConfig, validation: &ValidationConfig) -> CoreResult<Self> {
        let targets = detection
            .triangles
            .iter()
            .map(|t| {
                Ok(TriangleTarget {
                    exchange: t.exchange.clone(),
                    cycle: TriangularCycle::new(t.legs.clone())?,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let mut strategy = Self::new(
            targets,
            validation.min_volume_usd.triangular,
            min_profit(detection.min_profit_pct),
        );
        strategy.auto_discover = detection.auto_discover_triangles;
        Ok(strategy)
    }

    /// Discover cycles per exchange each tick when nothing is configured
    pub fn with_auto_discover(mut self, enabled: bool) -> Self {
        self.auto_discover = enabled;
        self
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Walk one cycle on one exchange using executable prices
    pub fn evaluate(
        &self,
        ctx: &DetectionContext<'_>,
        exchange: &ExchangeId,
        cycle: &TriangularCycle,
    ) -> Option<Opportunity> {
        let mut prices = [Decimal::ZERO; 3];
        let mut builder = OpportunityBuilder::new().kind(OpportunityKind::Triangular);

        for (i, (symbol, side)) in cycle.legs().iter().zip(cycle.sides()).enumerate() {
            let quote = ctx.store.latest_tradeable_at(
                exchange,
                symbol,
                ctx.max_age,
                self.min_volume_usd,
                ctx.now,
            )?;
            prices[i] = quote.price_for(*side);
            builder = builder
                .leg(exchange.clone(), symbol.clone(), *side, prices[i])
                .volume_score(quote.volume_score);
        }

        let final_amount = cycle.final_amount(&prices)?;
        let profit_pct = final_amount
            .checked_sub(Decimal::ONE)?
            .checked_mul(Decimal::ONE_HUNDRED)?;

        if profit_pct <= self.min_profit_pct {
            trace!(exchange = %exchange, path = %cycle.path(), %profit_pct, "Triangle not profitable");
            return None;
        }

        builder.profit_pct(profit_pct).detected_at(ctx.now).build()
    }

    fn candidates(&self, ctx: &DetectionContext<'_>) -> Vec<(ExchangeId, TriangularCycle)> {
        let active = ctx.active_exchanges();
        let mut out = Vec::new();

        if self.targets.is_empty() && self.auto_discover {
            for exchange in active {
                let symbols: Vec<Symbol> = ctx.store.symbols_for(&exchange).into_iter().collect();
                out.extend(discover_triangles(&symbols).into_iter().map(|c| (exchange.clone(), c)));
            }
            return out;
        }

        for target in &self.targets {
            match &target.exchange {
                Some(exchange) => {
                    if ctx.health.is_active(exchange) {
                        out.push((exchange.clone(), target.cycle.clone()));
                    }
                }
                None => {
                    for exchange in &active {
                        let symbols = ctx.store.symbols_for(exchange);
                        if target.cycle.legs().iter().all(|l| symbols.contains(l)) {
                            out.push((exchange.clone(), target.cycle.clone()));
                        }
                    }
                }
            }
        }
        out
    }
}

impl Strategy for TriangularStrategy {
    fn name(&self) -> &'static str {
        "Triangular"
    }

    fn find_opportunities(&self, ctx: &DetectionContext<'_>) -> Vec<Opportunity> {
        self.candidates(ctx)
            .iter()
            .filter_map(|(exchange, cycle)| self.evaluate(ctx, exchange, cycle))
            .collect()
    }
}

/// A symbol compared across exchanges; empty means every exchange listing it
#[derive(Debug, Clone)]
pub struct SpatialTarget {
    pub symbol: Symbol,
    pub exchanges: Vec<ExchangeId>,
}

/// Spatial arbitrage: buy on one exchange, sell on another
pub struct SpatialStrategy {
    targets: Vec<SpatialTarget>,
    min_volume_usd: f64,
    min_profit_pct: Decimal,
}

impl SpatialStrategy {
    pub fn new(targets: Vec<SpatialTarget>, min_volume_usd: f64, min_profit_pct: Decimal) -> Self {
        Self {
            targets,
            min_volume_usd,
            min_profit_pct,
        }
    }

    pub fn from_config(detection: &DetectionConfig, validation: &ValidationConfig) -> Self {
        let targets = detection
            .spatial_pairs
            .iter()
            .map(|p| SpatialTarget {
                symbol: p.symbol.clone(),
                exchanges: p.exchanges.clone(),
            })
            .collect();

        Self::new(
            targets,
            validation.min_volume_usd.spatial,
            min_profit(detection.min_profit_pct),
        )
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Better of the two directions between `a` and `b`, if profitable
    pub fn evaluate(
        &self,
        ctx: &DetectionContext<'_>,
        symbol: &Symbol,
        a: &ExchangeId,
        b: &ExchangeId,
    ) -> Option<Opportunity> {
        let quote_a = ctx.store.latest_tradeable_at(a, symbol, ctx.max_age, self.min_volume_usd, ctx.now)?;
        let quote_b = ctx.store.latest_tradeable_at(b, symbol, ctx.max_age, self.min_volume_usd, ctx.now)?;

        let forward = cross_profit_pct(quote_a.ask, quote_b.bid);
        let reverse = cross_profit_pct(quote_b.ask, quote_a.bid);

        let (buy, sell, profit_pct) = match (forward, reverse) {
            (Some(f), Some(r)) if r > f => (&quote_b, &quote_a, r),
            (Some(f), _) => (&quote_a, &quote_b, f),
            (None, Some(r)) => (&quote_b, &quote_a, r),
            (None, None) => return None,
        };

        if profit_pct <= self.min_profit_pct {
            return None;
        }

        OpportunityBuilder::new()
            .kind(OpportunityKind::Spatial)
            .leg(buy.exchange_id.clone(), symbol.clone(), Side::Buy, buy.ask)
            .leg(sell.exchange_id.clone(), symbol.clone(), Side::Sell, sell.bid)
            .volume_score(buy.volume_score)
            .volume_score(sell.volume_score)
            .profit_pct(profit_pct)
            .detected_at(ctx.now)
            .build()
    }

    fn venues(&self, ctx: &DetectionContext<'_>, target: &SpatialTarget) -> Vec<ExchangeId> {
        let listed: BTreeSet<ExchangeId> = if target.exchanges.is_empty() {
            ctx.store
                .exchanges()
                .into_iter()
                .filter(|e| ctx.store.symbols_for(e).contains(&target.symbol))
                .collect()
        } else {
            target.exchanges.iter().cloned().collect()
        };

        listed.into_iter().filter(|e| ctx.health.is_active(e)).collect()
    }
}

/// `(bid_sell - ask_buy) / ask_buy * 100`, `None` on a zero ask or overflow
fn cross_profit_pct(ask_buy: Decimal, bid_sell: Decimal) -> Option<Decimal> {
    bid_sell
        .checked_sub(ask_buy)?
        .checked_div(ask_buy)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

impl Strategy for SpatialStrategy {
    fn name(&self) -> &'static str {
        "Spatial"
    }

    fn find_opportunities(&self, ctx: &DetectionContext<'_>) -> Vec<Opportunity> {
        let mut opportunities = Vec::new();

        for target in &self.targets {
            let venues = self.venues(ctx, target);
            for i in 0..venues.len() {
                for j in (i + 1)..venues.len() {
                    if let Some(opp) = self.evaluate(ctx, &target.symbol, &venues[i], &venues[j]) {
                        opportunities.push(opp);
                    }
                }
            }
        }

        opportunities
    }
}
