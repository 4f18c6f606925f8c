//! Configuration types
//!
//! These are consumed, not parsed, by the core crates. Loading from files
//! and the environment happens in the binary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::{CoreError, CoreResult, ExchangeId, Symbol, TriangularCycle, DEFAULT_VOLUME_SCORE_REFERENCE_USD};

/// Per-use-case minimum USD notional
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeThresholds {
    pub triangular: f64,
    pub spatial: f64,
}

impl Default for VolumeThresholds {
    fn default() -> Self {
        Self {
            triangular: 5_000.0,
            spatial: 10_000.0,
        }
    }
}

/// Upper bound on `max_age_seconds`
pub const MAX_QUOTE_AGE_SECONDS: f64 = 86_400.0;

/// Quote validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_age_seconds: f64,
    pub min_volume_usd: VolumeThresholds,
    pub volume_score_reference_usd: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: 5.0,
            min_volume_usd: VolumeThresholds::default(),
            volume_score_reference_usd: DEFAULT_VOLUME_SCORE_REFERENCE_USD,
        }
    }
}

impl ValidationConfig {
    /// Zero for non-positive or NaN values, saturating for values too large
    /// to represent
    pub fn max_age(&self) -> Duration {
        if !(self.max_age_seconds > 0.0) {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.max_age_seconds).unwrap_or(Duration::MAX)
    }

    /// Threshold applied at ingestion; the lower of the two so a quote
    /// usable by either detector is kept.
    pub fn ingestion_min_volume_usd(&self) -> f64 {
        self.min_volume_usd.triangular.min(self.min_volume_usd.spatial)
    }
}

/// A configured triangle; without an exchange it runs on every exchange
/// carrying all three legs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleConfig {
    #[serde(default)]
    pub exchange: Option<ExchangeId>,
    pub legs: [Symbol; 3],
}

/// A symbol compared across exchanges; an empty list means every exchange
/// carrying the symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialPairConfig {
    pub symbol: Symbol,
    #[serde(default)]
    pub exchanges: Vec<ExchangeId>,
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub tick_interval_ms: u64,
    pub min_profit_pct: f64,
    pub triangles: Vec<TriangleConfig>,
    pub spatial_pairs: Vec<SpatialPairConfig>,
    pub auto_discover_triangles: bool,
    pub sink_capacity: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            min_profit_pct: 0.0,
            triangles: vec![],
            spatial_pairs: vec![],
            auto_discover_triangles: false,
            sink_capacity: 1_024,
        }
    }
}

impl DetectionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_seconds: Vec<u64>,
    /// `None` retries forever at the last backoff value
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_seconds: vec![10, 20, 40, 80, 300],
            max_attempts: Some(5),
        }
    }
}

impl RetryConfig {
    pub fn schedule(&self) -> Vec<Duration> {
        self.backoff_seconds.iter().map(|s| Duration::from_secs(*s)).collect()
    }
}

/// Upstream feed for one exchange. A streaming `ws_url` takes precedence;
/// without one the exchange is polled over `rest_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeFeedConfig {
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    pub symbols: Vec<Symbol>,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn non_empty(url: &Option<String>) -> Option<&str> {
    url.as_deref().filter(|u| !u.is_empty())
}

/// How quotes for an exchange are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedTransport<'a> {
    WebSocket(&'a str),
    RestPolling(&'a str),
}

impl ExchangeFeedConfig {
    pub fn websocket(ws_url: impl Into<String>, symbols: Vec<Symbol>) -> Self {
        Self {
            ws_url: Some(ws_url.into()),
            rest_url: None,
            poll_interval_ms: default_poll_interval_ms(),
            symbols,
        }
    }

    pub fn rest(rest_url: impl Into<String>, poll_interval_ms: u64, symbols: Vec<Symbol>) -> Self {
        Self {
            ws_url: None,
            rest_url: Some(rest_url.into()),
            poll_interval_ms,
            symbols,
        }
    }

    pub fn transport(&self) -> Option<FeedTransport<'_>> {
        non_empty(&self.ws_url)
            .map(FeedTransport::WebSocket)
            .or_else(|| non_empty(&self.rest_url).map(FeedTransport::RestPolling))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete bot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    pub exchanges: BTreeMap<ExchangeId, ExchangeFeedConfig>,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl BotConfig {
    pub fn exchange_ids(&self) -> Vec<ExchangeId> {
        self.exchanges.keys().cloned().collect()
    }

    pub fn symbols_for(&self, exchange: &ExchangeId) -> Option<&[Symbol]> {
        self.exchanges.get(exchange).map(|e| e.symbols.as_slice())
    }

    /// Unique symbols across all exchanges
    pub fn all_symbols(&self) -> BTreeSet<Symbol> {
        self.exchanges
            .values()
            .flat_map(|e| e.symbols.iter().cloned())
            .collect()
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.exchanges.is_empty() {
            return invalid("at least one exchange must be configured");
        }

        for (id, exchange) in &self.exchanges {
            if exchange.symbols.is_empty() {
                return invalid(format!("exchange '{}' has no symbols", id));
            }
            match exchange.transport() {
                None => return invalid(format!("exchange '{}' needs a ws_url or a rest_url", id)),
                Some(FeedTransport::RestPolling(_)) if exchange.poll_interval_ms == 0 => {
                    return invalid(format!("exchange '{}' has a zero poll_interval_ms", id));
                }
                Some(_) => {}
            }
        }

        let v = &self.validation;
        if !(v.max_age_seconds > 0.0 && v.max_age_seconds <= MAX_QUOTE_AGE_SECONDS) {
            return invalid(format!(
                "'max_age_seconds' must be a positive number no greater than {}",
                MAX_QUOTE_AGE_SECONDS
            ));
        }
        if !(v.min_volume_usd.triangular > 0.0) {
            return invalid("'min_volume_usd.triangular' must be a positive number");
        }
        if !(v.min_volume_usd.spatial > 0.0) {
            return invalid("'min_volume_usd.spatial' must be a positive number");
        }
        if !(v.volume_score_reference_usd > 0.0) {
            return invalid("'volume_score_reference_usd' must be a positive number");
        }

        let d = &self.detection;
        if d.tick_interval_ms == 0 {
            return invalid("'tick_interval_ms' must be positive");
        }
        if !d.min_profit_pct.is_finite() || d.min_profit_pct < 0.0 {
            return invalid("'min_profit_pct' must be a non-negative number");
        }
        if d.sink_capacity == 0 {
            return invalid("'sink_capacity' must be positive");
        }

        for triangle in &d.triangles {
            TriangularCycle::new(triangle.legs.clone())?;
            if let Some(exchange) = &triangle.exchange {
                let symbols = self
                    .symbols_for(exchange)
                    .ok_or_else(|| CoreError::UnknownExchange(exchange.to_string()))?;
                if let Some(missing) = triangle.legs.iter().find(|l| !symbols.contains(l)) {
                    return invalid(format!("exchange '{}' does not list {}", exchange, missing));
                }
            }
        }

        for pair in &d.spatial_pairs {
            if pair.exchanges.len() == 1 {
                return invalid(format!("spatial pair {} needs at least two exchanges", pair.symbol));
            }
            for exchange in &pair.exchanges {
                let symbols = self
                    .symbols_for(exchange)
                    .ok_or_else(|| CoreError::UnknownExchange(exchange.to_string()))?;
                if !symbols.contains(&pair.symbol) {
                    return invalid(format!("exchange '{}' does not list {}", exchange, pair.symbol));
                }
            }
        }

        if self.retry.backoff_seconds.is_empty() {
            return invalid("'backoff_seconds' must not be empty");
        }
        if self.retry.max_attempts == Some(0) {
            return invalid("'max_attempts' must be positive");
        }

        Ok(())
    }
}

fn invalid<T>(msg: impl Into<String>) -> CoreResult<T> {
    Err(CoreError::InvalidConfig(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BotConfig {
        let mut exchanges = BTreeMap::new();
        exchanges.insert(
            ExchangeId::from("kraken"),
            ExchangeFeedConfig::websocket(
                "wss://feed.local/kraken",
                vec!["BTC/USDT".into(), "ETH/USDT".into(), "ETH/BTC".into()],
            ),
        );
        exchanges.insert(
            ExchangeId::from("bitfinex"),
            ExchangeFeedConfig::rest(
                "https://feed.local/bitfinex/ticker",
                500,
                vec!["BTC/USDT".into(), "ETH/USDT".into()],
            ),
        );
        BotConfig {
            exchanges,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.validation.max_age(), Duration::from_secs(5));
        assert_eq!(config.validation.ingestion_min_volume_usd(), 5_000.0);
        assert_eq!(config.detection.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.retry.schedule().len(), 5);
        assert_eq!(config.retry.max_attempts, Some(5));
    }

    #[test]
    fn test_valid_config() {
        let mut config = sample();
        config.detection.triangles.push(TriangleConfig {
            exchange: Some("kraken".into()),
            legs: ["BTC/USDT".into(), "ETH/BTC".into(), "ETH/USDT".into()],
        });
        config.detection.spatial_pairs.push(SpatialPairConfig {
            symbol: "BTC/USDT".into(),
            exchanges: vec!["kraken".into(), "bitfinex".into()],
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.all_symbols().len(), 3);
    }

    #[test]
    fn test_rejects_non_positive_thresholds() {
        let mut config = sample();
        config.validation.min_volume_usd.spatial = 0.0;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

        let mut config = sample();
        config.validation.max_age_seconds = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_max_age() {
        for value in [f64::NAN, f64::INFINITY, 1e20, MAX_QUOTE_AGE_SECONDS + 1.0] {
            let mut config = sample();
            config.validation.max_age_seconds = value;
            assert!(config.validate().is_err(), "accepted {}", value);
        }

        let mut config = sample();
        config.validation.max_age_seconds = MAX_QUOTE_AGE_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_age_never_panics() {
        let mut v = ValidationConfig::default();
        v.max_age_seconds = 1e20;
        assert_eq!(v.max_age(), Duration::MAX);
        v.max_age_seconds = f64::INFINITY;
        assert_eq!(v.max_age(), Duration::MAX);
        v.max_age_seconds = f64::NAN;
        assert_eq!(v.max_age(), Duration::ZERO);
        v.max_age_seconds = -3.0;
        assert_eq!(v.max_age(), Duration::ZERO);
    }

    #[test]
    fn test_transport_selection() {
        let config = sample();
        let kraken = &config.exchanges[&ExchangeId::from("kraken")];
        assert_eq!(kraken.transport(), Some(FeedTransport::WebSocket("wss://feed.local/kraken")));

        let bitfinex = &config.exchanges[&ExchangeId::from("bitfinex")];
        assert_eq!(
            bitfinex.transport(),
            Some(FeedTransport::RestPolling("https://feed.local/bitfinex/ticker"))
        );
        assert_eq!(bitfinex.poll_interval(), Duration::from_millis(500));

        let mut both = kraken.clone();
        both.rest_url = Some("https://feed.local/kraken".into());
        assert!(matches!(both.transport(), Some(FeedTransport::WebSocket(_))));

        let mut blank = kraken.clone();
        blank.ws_url = Some(String::new());
        assert_eq!(blank.transport(), None);
    }

    #[test]
    fn test_rejects_exchange_without_transport() {
        let mut config = sample();
        if let Some(kraken) = config.exchanges.get_mut(&ExchangeId::from("kraken")) {
            kraken.ws_url = None;
        }
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

        let mut config = sample();
        if let Some(bitfinex) = config.exchanges.get_mut(&ExchangeId::from("bitfinex")) {
            bitfinex.poll_interval_ms = 0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_triangle_on_exchange_missing_leg() {
        let mut config = sample();
        config.detection.triangles.push(TriangleConfig {
            exchange: Some("bitfinex".into()),
            legs: ["BTC/USDT".into(), "ETH/BTC".into(), "ETH/USDT".into()],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_spatial_exchange() {
        let mut config = sample();
        config.detection.spatial_pairs.push(SpatialPairConfig {
            symbol: "BTC/USDT".into(),
            exchanges: vec!["kraken".into(), "binance".into()],
        });
        assert!(matches!(config.validate(), Err(CoreError::UnknownExchange(_))));
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "exchanges": {
                "kraken": { "ws_url": "wss://x", "symbols": ["BTC/USDT"] },
                "gemini": { "rest_url": "https://y/ticker", "symbols": ["BTC/USDT"] }
            },
            "validation": { "max_age_seconds": 3 },
            "retry": { "max_attempts": null }
        }"#;
        let config: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.validation.max_age_seconds, 3.0);
        assert_eq!(config.validation.min_volume_usd.spatial, 10_000.0);
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.detection.tick_interval_ms, 50);
        let gemini = &config.exchanges[&ExchangeId::from("gemini")];
        assert_eq!(gemini.poll_interval_ms, 1_000);
        assert_eq!(gemini.transport(), Some(FeedTransport::RestPolling("https://y/ticker")));
    }
}
