//! Quote sources
//!
//! The connectivity layer is external; this module defines the boundary
//! trait and a WebSocket client for feeds that already publish normalised
//! `{exchangeId, symbol, bid, ask, bidVolume, askVolume, timestamp}` frames.
//! Exchanges without a stream are polled by [`crate::rest::RestQuoteSource`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use arb_core::{ConnectivityKind, ExchangeId, FeedError, FeedResult, RawQuote, Symbol};

/// Upstream of one ingestion worker
#[async_trait]
pub trait QuoteSource: Send {
    fn exchange_id(&self) -> &ExchangeId;

    async fn connect(&mut self) -> FeedResult<()>;

    /// Next raw quote; `Ok(None)` when the upstream closed cleanly
    async fn next_quote(&mut self) -> FeedResult<Option<RawQuote>>;

    async fn disconnect(&mut self);
}

/// Feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub exchange_id: ExchangeId,
    pub ws_url: String,
    pub symbols: Vec<Symbol>,
    pub connect_timeout: Duration,
}

impl FeedConfig {
    pub fn new(exchange_id: ExchangeId, ws_url: impl Into<String>, symbols: Vec<Symbol>) -> Self {
        Self {
            exchange_id,
            ws_url: ws_url.into(),
            symbols,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for a normalised quote feed
pub struct WsQuoteSource {
    config: FeedConfig,
    stream: Option<WsStream>,
}

impl WsQuoteSource {
    pub fn new(config: FeedConfig) -> Self {
        Self { config, stream: None }
    }

    fn subscribe_message(&self) -> String {
        serde_json::json!({
            "op": "subscribe",
            "exchange": self.config.exchange_id,
            "symbols": self.config.symbols,
        })
        .to_string()
    }
}

#[async_trait]
impl QuoteSource for WsQuoteSource {
    fn exchange_id(&self) -> &ExchangeId {
        &self.config.exchange_id
    }

    async fn connect(&mut self) -> FeedResult<()> {
        info!(exchange = %self.config.exchange_id, url = %self.config.ws_url, "Connecting");

        let (mut ws, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(self.config.ws_url.as_str()))
            .await
            .map_err(|_| FeedError::Timeout(format!("connect to {} timed out", self.config.ws_url)))?
            .map_err(map_ws_error)?;

        ws.send(Message::Text(self.subscribe_message()))
            .await
            .map_err(|e| FeedError::SubscriptionFailed(e.to_string()))?;

        self.stream = Some(ws);
        info!(exchange = %self.config.exchange_id, symbols = self.config.symbols.len(), "Subscribed");
        Ok(())
    }

    async fn next_quote(&mut self) -> FeedResult<Option<RawQuote>> {
        loop {
            let stream = self.stream.as_mut().ok_or(FeedError::Disconnected)?;

            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Ping(data))) => {
                    stream.send(Message::Pong(data)).await.map_err(map_ws_error)?;
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(exchange = %self.config.exchange_id, "WebSocket closed by server");
                    self.stream = None;
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(map_ws_error(e));
                }
            };

            match parse_quote_message(&self.config.exchange_id, &text) {
                Some(quote) => return Ok(Some(quote)),
                None => debug!(exchange = %self.config.exchange_id, "Skipping control frame"),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut ws) = self.stream.take() {
            // Best effort; the socket is dropped either way
            let _ = ws.close(None).await;
        }
    }
}

fn map_ws_error(err: WsError) -> FeedError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => FeedError::Disconnected,
        WsError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => FeedError::Timeout(e.to_string()),
        WsError::Tls(e) => FeedError::Tls(e.to_string()),
        other => classify_message(other.to_string()),
    }
}

/// Feed error for a transport failure known only by its message
pub(crate) fn classify_message(msg: String) -> FeedError {
    match ConnectivityKind::from_message(&msg) {
        ConnectivityKind::Dns => FeedError::Dns(msg),
        ConnectivityKind::Tls => FeedError::Tls(msg),
        ConnectivityKind::Timeout => FeedError::Timeout(msg),
        ConnectivityKind::Generic => FeedError::ConnectionFailed(msg),
    }
}

/// Parse one frame into a raw quote.
///
/// Control frames (`event`/`result` keys) yield `None`. Anything else yields
/// a quote with whatever fields could be read, so malformed data surfaces as
/// a validator rejection rather than an error.
pub fn parse_quote_message(exchange_id: &ExchangeId, text: &str) -> Option<RawQuote> {
    let empty = RawQuote {
        exchange_id: exchange_id.clone(),
        ..Default::default()
    };

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Some(empty),
    };
    let Some(obj) = value.as_object() else {
        return Some(empty);
    };

    if obj.contains_key("event") || obj.contains_key("result") {
        return None;
    }

    Some(quote_from_object(exchange_id, obj))
}

/// Read whichever quote fields are present and numeric
pub(crate) fn quote_from_object(exchange_id: &ExchangeId, obj: &Map<String, Value>) -> RawQuote {
    RawQuote {
        exchange_id: exchange_id.clone(),
        symbol: obj.get("symbol").and_then(Value::as_str).map(Symbol::from),
        bid: decimal_field(obj, "bid"),
        ask: decimal_field(obj, "ask"),
        bid_volume: decimal_field(obj, "bidVolume"),
        ask_volume: decimal_field(obj, "askVolume"),
        timestamp: obj.get("timestamp").and_then(timestamp_value),
    }
}

fn decimal_field(obj: &Map<String, Value>, key: &str) -> Option<Decimal> {
    let raw = match obj.get(key)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// Epoch milliseconds (number or numeric string) or RFC 3339
fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))?,
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(ms) => ms,
            Err(_) => {
                return DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        },
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}
