//! Raw and validated quote types

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ExchangeId, Side, Symbol};

/// Number of snapshots retained per (exchange, symbol)
pub const HISTORY_CAPACITY: usize = 100;

/// Notional (USD) that maps to a volume score of 20
pub const DEFAULT_VOLUME_SCORE_REFERENCE_USD: f64 = 1_000.0;

/// Quote tuple as delivered by the connectivity layer, before validation.
///
/// Every field except the exchange may be absent; absent or non-numeric
/// values surface as a `MissingField` rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuote {
    pub exchange_id: ExchangeId,
    pub symbol: Option<Symbol>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub bid_volume: Option<Decimal>,
    pub ask_volume: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Validated, immutable point-in-time quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub exchange_id: ExchangeId,
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    pub timestamp: DateTime<Utc>,

    // Derived at validation time
    pub spread_pct: f64,
    pub volume_score: f64,
}

impl QuoteSnapshot {
    /// Build a snapshot and derive `spread_pct` / `volume_score`.
    ///
    /// Callers are expected to have checked `0 < bid <= ask`.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        exchange_id: ExchangeId,
        symbol: Symbol,
        bid: Decimal,
        ask: Decimal,
        bid_volume: Decimal,
        ask_volume: Decimal,
        timestamp: DateTime<Utc>,
        score_reference_usd: f64,
    ) -> Self {
        let notional = min_notional_usd(bid, bid_volume, ask, ask_volume);
        Self {
            exchange_id,
            symbol,
            bid,
            ask,
            bid_volume,
            ask_volume,
            timestamp,
            spread_pct: spread_pct(bid, ask),
            volume_score: volume_score(notional, score_reference_usd),
        }
    }

    /// Smaller of bid-side and ask-side notional
    pub fn min_notional_usd(&self) -> f64 {
        min_notional_usd(self.bid, self.bid_volume, self.ask, self.ask_volume)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        self.age(now).as_millis() as u64
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }

    /// Execution price for a side: ask when buying, bid when selling
    pub fn price_for(&self, side: Side) -> Decimal {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

/// `(ask - bid) / bid * 100`, saturating at `f64::MAX` when the ratio does
/// not fit a `Decimal`
pub fn spread_pct(bid: Decimal, ask: Decimal) -> f64 {
    if bid.is_zero() {
        return 0.0;
    }
    checked_spread_pct(bid, ask).unwrap_or(f64::MAX)
}

/// `(ask - bid) / bid * 100`, or `None` on a zero bid or overflow
pub fn checked_spread_pct(bid: Decimal, ask: Decimal) -> Option<f64> {
    ask.checked_sub(bid)?
        .checked_div(bid)?
        .checked_mul(Decimal::ONE_HUNDRED)?
        .to_f64()
}

/// `min(bid * bid_volume, ask * ask_volume)` as f64
pub fn min_notional_usd(bid: Decimal, bid_volume: Decimal, ask: Decimal, ask_volume: Decimal) -> f64 {
    let bid_side = bid.checked_mul(bid_volume).unwrap_or(Decimal::MAX);
    let ask_side = ask.checked_mul(ask_volume).unwrap_or(Decimal::MAX);
    bid_side.min(ask_side).to_f64().unwrap_or(0.0)
}

/// Liquidity rating in `[0, 100]`.
///
/// Power-law scale over notional: with the default $1K reference,
/// $1K = 20, $10K ~ 40, $100K ~ 80, saturating at 100.
pub fn volume_score(min_notional_usd: f64, reference_usd: f64) -> f64 {
    if !(min_notional_usd > 0.0) || !(reference_usd > 0.0) {
        return 0.0;
    }
    (20.0 * (min_notional_usd / reference_usd).powf(0.3)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(bid: i64, ask: i64, volume: i64) -> QuoteSnapshot {
        QuoteSnapshot::derive(
            "kraken".into(),
            "BTC/USDT".into(),
            Decimal::from(bid),
            Decimal::from(ask),
            Decimal::from(volume),
            Decimal::from(volume),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            DEFAULT_VOLUME_SCORE_REFERENCE_USD,
        )
    }

    #[test]
    fn test_spread_pct() {
        let snap = snapshot(100, 101, 1);
        assert!((snap.spread_pct - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_spread_of_extreme_prices_does_not_overflow() {
        let bid = Decimal::new(1, 24);
        let ask = Decimal::from(1_000_000);
        assert_eq!(checked_spread_pct(bid, ask), None);
        assert_eq!(spread_pct(bid, ask), f64::MAX);
        assert_eq!(checked_spread_pct(Decimal::ZERO, ask), None);
        assert_eq!(checked_spread_pct(Decimal::from(100), Decimal::from(101)), Some(1.0));
    }

    #[test]
    fn test_volume_score_scale() {
        assert!((volume_score(1_000.0, 1_000.0) - 20.0).abs() < 1e-9);
        assert!((volume_score(10_000.0, 1_000.0) - 39.905).abs() < 0.01);
        assert_eq!(volume_score(1e12, 1_000.0), 100.0);
        assert_eq!(volume_score(0.0, 1_000.0), 0.0);
        assert_eq!(volume_score(-5.0, 1_000.0), 0.0);
    }

    #[test]
    fn test_min_notional_uses_smaller_side() {
        let snap = QuoteSnapshot::derive(
            "kraken".into(),
            "BTC/USDT".into(),
            Decimal::from(100),
            Decimal::from(101),
            Decimal::from(10),
            Decimal::from(2),
            Utc::now(),
            DEFAULT_VOLUME_SCORE_REFERENCE_USD,
        );
        assert!((snap.min_notional_usd() - 202.0).abs() < 1e-9);
    }

    #[test]
    fn test_staleness() {
        let snap = snapshot(100, 101, 1);
        let now = snap.timestamp + chrono::Duration::seconds(6);
        assert!(snap.is_stale(Duration::from_secs(5), now));
        assert!(!snap.is_stale(Duration::from_secs(6), now));
        assert_eq!(snap.age_ms(now), 6_000);
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let snap = snapshot(100, 101, 1);
        let now = snap.timestamp - chrono::Duration::seconds(1);
        assert_eq!(snap.age(now), Duration::ZERO);
    }

    #[test]
    fn test_price_for_side() {
        let snap = snapshot(100, 101, 1);
        assert_eq!(snap.price_for(Side::Buy), Decimal::from(101));
        assert_eq!(snap.price_for(Side::Sell), Decimal::from(100));
    }
}
