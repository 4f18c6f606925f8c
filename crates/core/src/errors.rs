//! Error types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Core error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid triangular cycle: {0}")]
    InvalidCycle(String),

    #[error("Exchange {0} not configured")]
    UnknownExchange(String),
}

/// Why the validator dropped a raw quote
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    #[error("missing or non-numeric field: {0}")]
    MissingField(&'static str),

    #[error("invalid prices: bid={bid}, ask={ask}")]
    InvalidPrice { bid: Decimal, ask: Decimal },

    #[error("stale quote: {age_ms}ms > {max_ms}ms")]
    Stale { age_ms: u64, max_ms: u64 },

    #[error("insufficient volume: ${available_usd:.0} < ${min_usd:.0}")]
    InsufficientVolume { available_usd: f64, min_usd: f64 },
}

impl RejectionReason {
    pub fn kind(&self) -> RejectionKind {
        match self {
            RejectionReason::MissingField(_) => RejectionKind::MissingField,
            RejectionReason::InvalidPrice { .. } => RejectionKind::InvalidPrice,
            RejectionReason::Stale { .. } => RejectionKind::Stale,
            RejectionReason::InsufficientVolume { .. } => RejectionKind::InsufficientVolume,
        }
    }
}

/// Rejection category reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionKind {
    MissingField,
    InvalidPrice,
    Stale,
    InsufficientVolume,
}

impl RejectionKind {
    pub const ALL: [RejectionKind; 4] = [
        RejectionKind::MissingField,
        RejectionKind::InvalidPrice,
        RejectionKind::Stale,
        RejectionKind::InsufficientVolume,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RejectionKind::MissingField => "missing_field",
            RejectionKind::InvalidPrice => "invalid_price",
            RejectionKind::Stale => "stale",
            RejectionKind::InsufficientVolume => "insufficient_volume",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connectivity error category; affects logging only, never retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectivityKind {
    Dns,
    Tls,
    Timeout,
    Generic,
}

impl ConnectivityKind {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectivityKind::Dns => "dns",
            ConnectivityKind::Tls => "tls",
            ConnectivityKind::Timeout => "timeout",
            ConnectivityKind::Generic => "generic",
        }
    }

    /// Classify a free-form error message
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("dns") || msg.contains("resolve") || msg.contains("lookup address") {
            ConnectivityKind::Dns
        } else if msg.contains("ssl") || msg.contains("tls") || msg.contains("certificate") {
            ConnectivityKind::Tls
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ConnectivityKind::Timeout
        } else {
            ConnectivityKind::Generic
        }
    }
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Price feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("TLS/SSL error: {0}")]
    Tls(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Feed disconnected")]
    Disconnected,
}

impl FeedError {
    pub fn classify(&self) -> ConnectivityKind {
        match self {
            FeedError::Dns(_) => ConnectivityKind::Dns,
            FeedError::Tls(_) => ConnectivityKind::Tls,
            FeedError::Timeout(_) => ConnectivityKind::Timeout,
            FeedError::ConnectionFailed(msg) | FeedError::SubscriptionFailed(msg) => {
                ConnectivityKind::from_message(msg)
            }
            FeedError::Disconnected => ConnectivityKind::Generic,
        }
    }
}

/// Result type alias
pub type CoreResult<T> = Result<T, CoreError>;
pub type FeedResult<T> = Result<T, FeedError>;
