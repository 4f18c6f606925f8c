//! Arbitrage opportunity types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ExchangeId, Side, Symbol};

/// Type of arbitrage opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityKind {
    /// A -> B -> C -> A within one exchange
    Triangular,
    /// Buy on exchange A, sell on exchange B
    Spatial,
}

impl OpportunityKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpportunityKind::Triangular => "triangular",
            OpportunityKind::Spatial => "spatial",
        }
    }
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One trade of an opportunity, priced at its execution side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityLeg {
    pub exchange_id: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
}

impl fmt::Display for OpportunityLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {} @ {}", self.side, self.symbol, self.exchange_id, self.price)
    }
}

/// Detected, not-yet-executed arbitrage opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub kind: OpportunityKind,
    pub legs: Vec<OpportunityLeg>,
    /// Profit before fees, in percent
    pub estimated_profit_pct: Decimal,
    pub detected_at: DateTime<Utc>,
    /// Minimum volume score across legs
    pub involved_volume_score: f64,
}

impl Opportunity {
    /// `BTC/USDT -> ETH/BTC -> ETH/USDT`, or `kraken -> bitfinex` for spatial
    pub fn path(&self) -> String {
        match self.kind {
            OpportunityKind::Triangular => self
                .legs
                .iter()
                .map(|l| l.symbol.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
            OpportunityKind::Spatial => self
                .legs
                .iter()
                .map(|l| l.exchange_id.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
        }
    }

    /// Distinct exchanges touched by this opportunity
    pub fn exchanges(&self) -> Vec<&ExchangeId> {
        let mut ids: Vec<&ExchangeId> = self.legs.iter().map(|l| &l.exchange_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn is_profitable(&self, min_profit_pct: Decimal) -> bool {
        self.estimated_profit_pct > min_profit_pct
    }
}

/// Builder for Opportunity
#[derive(Debug, Default)]
pub struct OpportunityBuilder {
    kind: Option<OpportunityKind>,
    legs: Vec<OpportunityLeg>,
    estimated_profit_pct: Option<Decimal>,
    detected_at: Option<DateTime<Utc>>,
    involved_volume_score: Option<f64>,
}

impl OpportunityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: OpportunityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn leg(mut self, exchange_id: ExchangeId, symbol: Symbol, side: Side, price: Decimal) -> Self {
        self.legs.push(OpportunityLeg {
            exchange_id,
            symbol,
            side,
            price,
        });
        self
    }

    pub fn profit_pct(mut self, pct: Decimal) -> Self {
        self.estimated_profit_pct = Some(pct);
        self
    }

    /// Record a leg's volume score; the builder keeps the minimum
    pub fn volume_score(mut self, score: f64) -> Self {
        self.involved_volume_score = Some(match self.involved_volume_score {
            Some(current) => current.min(score),
            None => score,
        });
        self
    }

    pub fn detected_at(mut self, at: DateTime<Utc>) -> Self {
        self.detected_at = Some(at);
        self
    }

    pub fn build(self) -> Option<Opportunity> {
        let kind = self.kind?;
        let estimated_profit_pct = self.estimated_profit_pct?;
        if self.legs.is_empty() {
            return None;
        }

        Some(Opportunity {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            legs: self.legs,
            estimated_profit_pct,
            detected_at: self.detected_at.unwrap_or_else(Utc::now),
            involved_volume_score: self.involved_volume_score.unwrap_or(0.0),
        })
    }
}
