//! Quote ingestion
//!
//! Features:
//! - One ingestion worker per exchange, streaming over WebSocket or polling REST
//! - Validation of every raw quote before it reaches the store
//! - Bounded per-(exchange, symbol) history with concurrent readers
//! - Capped exponential backoff with permanent-failure cutoff

pub mod aggregator;
pub mod events;
pub mod feeds;
pub mod history;
pub mod resilience;
pub mod rest;
pub mod state;
pub mod validator;
pub mod worker;

pub use aggregator::{AggregatorConfig, AggregatorStats, FeedAggregator};
pub use events::{EventReporter, FeedEvent};
pub use feeds::{FeedConfig, QuoteSource, WsQuoteSource};
pub use history::QuoteHistory;
pub use resilience::{ConnectionManager, ConnectionState, ExchangeHealth, RetryDecision};
pub use rest::{RestFeedConfig, RestQuoteSource};
pub use state::{QuoteKey, QuoteStore, QuoteStoreStats};
pub use validator::Validator;
pub use worker::{IngestionStats, IngestionWorker, WorkerExit};
