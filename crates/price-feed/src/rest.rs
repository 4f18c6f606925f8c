//! REST polling source
//!
//! For exchanges without a stream. Each poll requests
//! `GET {rest_url}?symbol=<SYMBOL>` for every configured symbol, then waits
//! out the poll interval. The body is one normalised quote object or an
//! array of them; a missing `symbol` defaults to the one requested.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use arb_core::{ExchangeId, FeedError, FeedResult, RawQuote, Symbol};

use crate::feeds::{classify_message, quote_from_object, QuoteSource};

/// Polling configuration
#[derive(Debug, Clone)]
pub struct RestFeedConfig {
    pub exchange_id: ExchangeId,
    pub rest_url: String,
    pub symbols: Vec<Symbol>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl RestFeedConfig {
    pub fn new(exchange_id: ExchangeId, rest_url: impl Into<String>, symbols: Vec<Symbol>) -> Self {
        Self {
            exchange_id,
            rest_url: rest_url.into(),
            symbols,
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Polls a ticker endpoint and replays each round as a quote stream
pub struct RestQuoteSource {
    config: RestFeedConfig,
    client: Option<Client>,
    interval: Option<Interval>,
    pending: VecDeque<RawQuote>,
}

impl RestQuoteSource {
    pub fn new(config: RestFeedConfig) -> Self {
        Self {
            config,
            client: None,
            interval: None,
            pending: VecDeque::new(),
        }
    }

    /// One round over every symbol. Transport failures abort the round;
    /// an error status only skips its symbol.
    async fn poll_round(&mut self) -> FeedResult<()> {
        let client = self.client.as_ref().ok_or(FeedError::Disconnected)?;

        for symbol in &self.config.symbols {
            let response = client
                .get(&self.config.rest_url)
                .query(&[("symbol", symbol.as_str())])
                .send()
                .await
                .map_err(map_http_error)?;

            let status = response.status();
            if !status.is_success() {
                warn!(exchange = %self.config.exchange_id, symbol = %symbol, %status, "Ticker request failed");
                continue;
            }

            let body = response.text().await.map_err(map_http_error)?;
            self.pending
                .extend(parse_rest_body(&self.config.exchange_id, symbol, &body));
        }

        debug!(exchange = %self.config.exchange_id, quotes = self.pending.len(), "Poll round complete");
        Ok(())
    }
}

#[async_trait]
impl QuoteSource for RestQuoteSource {
    fn exchange_id(&self) -> &ExchangeId {
        &self.config.exchange_id
    }

    async fn connect(&mut self) -> FeedResult<()> {
        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.client = Some(client);
        self.interval = Some(interval);
        info!(
            exchange = %self.config.exchange_id,
            url = %self.config.rest_url,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Polling REST ticker"
        );
        Ok(())
    }

    async fn next_quote(&mut self) -> FeedResult<Option<RawQuote>> {
        loop {
            if let Some(quote) = self.pending.pop_front() {
                return Ok(Some(quote));
            }

            let interval = self.interval.as_mut().ok_or(FeedError::Disconnected)?;
            interval.tick().await;
            self.poll_round().await?;
        }
    }

    async fn disconnect(&mut self) {
        self.client = None;
        self.interval = None;
        self.pending.clear();
    }
}

fn map_http_error(err: reqwest::Error) -> FeedError {
    if err.is_timeout() {
        return FeedError::Timeout(err.to_string());
    }

    // reqwest keeps the useful detail in the source chain
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    classify_message(msg)
}

/// Quotes from one ticker response.
///
/// Unparseable bodies yield a quote carrying only the symbol so the failure
/// is counted as a rejection.
pub fn parse_rest_body(exchange_id: &ExchangeId, requested: &Symbol, text: &str) -> Vec<RawQuote> {
    let with_symbol = |mut quote: RawQuote| {
        if quote.symbol.is_none() {
            quote.symbol = Some(requested.clone());
        }
        quote
    };
    let bare = || {
        with_symbol(RawQuote {
            exchange_id: exchange_id.clone(),
            ..Default::default()
        })
    };

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => vec![with_symbol(quote_from_object(exchange_id, &obj))],
        Ok(Value::Array(items)) => items
            .iter()
            .map(|item| match item.as_object() {
                Some(obj) => with_symbol(quote_from_object(exchange_id, obj)),
                None => bare(),
            })
            .collect(),
        _ => vec![bare()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn gemini() -> ExchangeId {
        "gemini".into()
    }

    #[test]
    fn test_single_object_defaults_symbol() {
        let body = r#"{"bid":"60000","ask":"60001","bidVolume":1,"askVolume":2,"timestamp":1700000000000}"#;
        let quotes = parse_rest_body(&gemini(), &"BTC/USDT".into(), body);

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, Some(Symbol::from("BTC/USDT")));
        assert_eq!(quotes[0].bid, Some(Decimal::from(60_000)));
        assert_eq!(quotes[0].exchange_id, gemini());
    }

    #[test]
    fn test_array_body_keeps_reported_symbols() {
        let body = r#"[{"symbol":"ETH/USDT","bid":3100,"ask":3101,"bidVolume":5,"askVolume":5,"timestamp":1},
                       {"bid":1,"ask":2,"bidVolume":1,"askVolume":1,"timestamp":1},
                       42]"#;
        let quotes = parse_rest_body(&gemini(), &"BTC/USDT".into(), body);

        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].symbol, Some(Symbol::from("ETH/USDT")));
        assert_eq!(quotes[1].symbol, Some(Symbol::from("BTC/USDT")));
        assert!(quotes[2].bid.is_none());
    }

    #[test]
    fn test_garbage_body_becomes_bare_quote() {
        let quotes = parse_rest_body(&gemini(), &"BTC/USDT".into(), "<html>busy</html>");
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, Some(Symbol::from("BTC/USDT")));
        assert!(quotes[0].ask.is_none());
    }

    /// Serves `200` with a quote for BTC/USDT and `404` for anything else
    async fn ticker_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();

                    let (status, body) = if request.contains("symbol=BTC%2FUSDT") {
                        ("200 OK", r#"{"bid":"100","ask":"101","bidVolume":"50","askVolume":"50","timestamp":1700000000000}"#)
                    } else {
                        ("404 Not Found", "{}")
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}/ticker", addr)
    }

    #[tokio::test]
    async fn test_polls_each_symbol_and_skips_error_status() {
        let url = ticker_server().await;
        let config = RestFeedConfig::new(gemini(), url, vec!["BTC/USDT".into(), "ETH/USDT".into()])
            .with_poll_interval(Duration::from_millis(10));
        let mut source = RestQuoteSource::new(config);
        source.connect().await.unwrap();

        let first = source.next_quote().await.unwrap().unwrap();
        assert_eq!(first.symbol, Some(Symbol::from("BTC/USDT")));
        assert_eq!(first.ask, Some(Decimal::from(101)));

        // ETH/USDT answered 404, so the next quote comes from the next round
        let second = source.next_quote().await.unwrap().unwrap();
        assert_eq!(second.symbol, Some(Symbol::from("BTC/USDT")));

        source.disconnect().await;
        assert!(matches!(source.next_quote().await, Err(FeedError::Disconnected)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_feed_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = RestFeedConfig::new(gemini(), format!("http://{}/ticker", addr), vec!["BTC/USDT".into()]);
        let mut source = RestQuoteSource::new(config);
        source.connect().await.unwrap();

        let err = source.next_quote().await.unwrap_err();
        assert!(matches!(err, FeedError::ConnectionFailed(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_next_quote_before_connect() {
        let config = RestFeedConfig::new(gemini(), "http://127.0.0.1:1/ticker", vec!["BTC/USDT".into()]);
        let mut source = RestQuoteSource::new(config);
        assert!(matches!(source.next_quote().await, Err(FeedError::Disconnected)));
    }
}
