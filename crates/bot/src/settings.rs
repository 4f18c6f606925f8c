//! Configuration loading
//!
//! Sources, lowest precedence first:
//! 1. `arb.toml` in the working directory, or the file named by `ARB_CONFIG`
//! 2. `ARB__`-prefixed environment variables, `__` between path segments
//!    (e.g. `ARB__DETECTION__TICK_INTERVAL_MS=100`)

use anyhow::Context;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::PathBuf;

use arb_core::BotConfig;

type Builder = ConfigBuilder<config::builder::DefaultState>;

pub const CONFIG_PATH_ENV: &str = "ARB_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "arb";

/// Explicit config path from the environment, if any
pub fn config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
}

/// Load and validate configuration from file plus environment
pub fn load(path: Option<PathBuf>) -> anyhow::Result<BotConfig> {
    let builder = match &path {
        Some(path) => Config::builder().add_source(File::from(path.as_path()).required(true)),
        None => Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
    };

    finish(builder).with_context(|| match path {
        Some(p) => format!("loading configuration from {}", p.display()),
        None => "loading configuration".to_string(),
    })
}

/// Load and validate configuration from a TOML document plus environment
pub fn from_toml_str(toml: &str) -> anyhow::Result<BotConfig> {
    finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
}

fn finish(builder: Builder) -> anyhow::Result<BotConfig> {
    let config: BotConfig = builder
        .add_source(
            Environment::with_prefix("ARB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::{ExchangeId, FeedTransport};
    use std::time::Duration;

    const SAMPLE: &str = r#"
        [exchanges.binance]
        ws_url = "wss://quotes.local/binance"
        symbols = ["BTC/USDT", "ETH/BTC", "ETH/USDT"]

        [exchanges.kraken]
        ws_url = "wss://quotes.local/kraken"
        symbols = ["BTC/USDT"]

        [validation]
        max_age_seconds = 3

        [validation.min_volume_usd]
        triangular = 2500
        spatial = 20000

        [detection]
        tick_interval_ms = 100

        [[detection.triangles]]
        exchange = "binance"
        legs = ["BTC/USDT", "ETH/BTC", "ETH/USDT"]

        [[detection.spatial_pairs]]
        symbol = "BTC/USDT"
        exchanges = ["binance", "kraken"]

        [retry]
        backoff_seconds = [1, 2, 4]
        max_attempts = 3
    "#;

    #[test]
    fn test_parse_full_document() {
        let config = from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.exchanges.len(), 2);
        assert_eq!(config.symbols_for(&ExchangeId::from("binance")).unwrap().len(), 3);
        assert_eq!(config.validation.max_age(), Duration::from_secs(3));
        assert_eq!(config.validation.min_volume_usd.triangular, 2500.0);
        assert_eq!(config.validation.min_volume_usd.spatial, 20_000.0);
        assert_eq!(config.detection.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.detection.triangles.len(), 1);
        assert_eq!(config.detection.spatial_pairs[0].exchanges.len(), 2);
        assert_eq!(config.retry.max_attempts, Some(3));
        assert_eq!(config.retry.schedule()[2], Duration::from_secs(4));
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = from_toml_str(
            r#"
            [exchanges.okx]
            ws_url = "wss://quotes.local/okx"
            symbols = ["SOL/USDT"]
            "#,
        )
        .unwrap();

        assert_eq!(config.validation.max_age(), Duration::from_secs(5));
        assert_eq!(config.detection.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.retry.backoff_seconds, vec![10, 20, 40, 80, 300]);
        assert_eq!(config.retry.max_attempts, Some(5));
    }

    #[test]
    fn test_rest_only_exchange() {
        let config = from_toml_str(
            r#"
            [exchanges.gemini]
            rest_url = "https://quotes.local/gemini/ticker"
            poll_interval_ms = 2000
            symbols = ["BTC/USDT"]
            "#,
        )
        .unwrap();

        let gemini = &config.exchanges[&ExchangeId::from("gemini")];
        assert_eq!(
            gemini.transport(),
            Some(FeedTransport::RestPolling("https://quotes.local/gemini/ticker"))
        );
        assert_eq!(gemini.poll_interval(), Duration::from_secs(2));

        let no_transport = r#"
            [exchanges.gemini]
            symbols = ["BTC/USDT"]
        "#;
        assert!(from_toml_str(no_transport).is_err());
    }

    #[test]
    fn test_invalid_document_rejected() {
        assert!(from_toml_str("").is_err());

        let unknown_exchange = r#"
            [exchanges.okx]
            ws_url = "wss://quotes.local/okx"
            symbols = ["SOL/USDT"]

            [[detection.spatial_pairs]]
            symbol = "SOL/USDT"
            exchanges = ["okx", "nowhere"]
        "#;
        assert!(from_toml_str(unknown_exchange).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("arb-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, SAMPLE).unwrap();

        let config = load(Some(path.clone())).unwrap();
        assert_eq!(config.exchanges.len(), 2);

        std::fs::remove_file(&path).unwrap();
        assert!(load(Some(path)).is_err());
    }
}
