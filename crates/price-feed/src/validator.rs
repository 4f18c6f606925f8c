//! Quote validation
//!
//! Checks run in a fixed order and stop at the first failure:
//! structure, price sanity, staleness, liquidity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;

use arb_core::{checked_spread_pct, min_notional_usd, QuoteSnapshot, RawQuote, RejectionReason, ValidationConfig};

/// Gate between raw feed data and the quote store
#[derive(Debug, Clone)]
pub struct Validator {
    max_age: Duration,
    score_reference_usd: f64,
}

impl Validator {
    pub fn new(max_age: Duration, score_reference_usd: f64) -> Self {
        Self {
            max_age,
            score_reference_usd,
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.max_age(), config.volume_score_reference_usd)
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn score_reference_usd(&self) -> f64 {
        self.score_reference_usd
    }

    /// Validate against the current wall clock
    pub fn validate(&self, raw: &RawQuote, min_volume_usd: f64) -> Result<QuoteSnapshot, RejectionReason> {
        self.validate_at(raw, min_volume_usd, Utc::now())
    }

    /// Validate as of `now`
    pub fn validate_at(
        &self,
        raw: &RawQuote,
        min_volume_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<QuoteSnapshot, RejectionReason> {
        // 1. Structure
        let symbol = raw.symbol.clone().ok_or(RejectionReason::MissingField("symbol"))?;
        let bid = raw.bid.ok_or(RejectionReason::MissingField("bid"))?;
        let ask = raw.ask.ok_or(RejectionReason::MissingField("ask"))?;
        let bid_volume = raw.bid_volume.ok_or(RejectionReason::MissingField("bidVolume"))?;
        let ask_volume = raw.ask_volume.ok_or(RejectionReason::MissingField("askVolume"))?;
        let timestamp = raw.timestamp.ok_or(RejectionReason::MissingField("timestamp"))?;

        // 2. Price sanity; the spread must also be representable
        if bid <= Decimal::ZERO || ask < bid || checked_spread_pct(bid, ask).is_none() {
            return Err(RejectionReason::InvalidPrice { bid, ask });
        }

        // 3. Staleness
        let age = (now - timestamp).to_std().unwrap_or(Duration::ZERO);
        if age > self.max_age {
            return Err(RejectionReason::Stale {
                age_ms: age.as_millis() as u64,
                max_ms: self.max_age.as_millis() as u64,
            });
        }

        // 4. Liquidity; negative volumes never reach the store
        let available_usd = min_notional_usd(bid, bid_volume, ask, ask_volume);
        if bid_volume.is_sign_negative() || ask_volume.is_sign_negative() || available_usd < min_volume_usd {
            return Err(RejectionReason::InsufficientVolume {
                available_usd,
                min_usd: min_volume_usd,
            });
        }

        Ok(QuoteSnapshot::derive(
            raw.exchange_id.clone(),
            symbol,
            bid,
            ask,
            bid_volume,
            ask_volume,
            timestamp,
            self.score_reference_usd,
        ))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::from_config(&ValidationConfig::default())
    }
}
