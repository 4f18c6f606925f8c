//! Connection resilience
//!
//! One state machine per ingestion worker:
//! `Connected -> Disconnected -> Retrying -> (Connected | PermanentlyFailed)`.
//! Error classification only changes what gets logged, never the schedule.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use arb_core::{ConnectivityKind, ExchangeId, FeedError, RetryConfig};

use crate::events::EventReporter;

/// Connection state of one exchange feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Retrying { attempt: u32 },
    PermanentlyFailed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Retrying { attempt } => write!(f, "retrying({})", attempt),
            ConnectionState::PermanentlyFailed => f.write_str("permanently_failed"),
        }
    }
}

/// What the worker should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Shared exchange -> connection state registry read by the detector
#[derive(Debug, Default)]
pub struct ExchangeHealth {
    states: DashMap<ExchangeId, ConnectionState>,
}

impl ExchangeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, exchange_id: &ExchangeId, state: ConnectionState) {
        self.states.insert(exchange_id.clone(), state);
    }

    pub fn state(&self, exchange_id: &ExchangeId) -> Option<ConnectionState> {
        self.states.get(exchange_id).map(|s| *s.value())
    }

    /// False only for permanently failed exchanges; unknown ones count as active
    pub fn is_active(&self, exchange_id: &ExchangeId) -> bool {
        self.state(exchange_id) != Some(ConnectionState::PermanentlyFailed)
    }

    pub fn failed_exchanges(&self) -> BTreeSet<ExchangeId> {
        self.states
            .iter()
            .filter(|e| *e.value() == ConnectionState::PermanentlyFailed)
            .map(|e| e.key().clone())
            .collect()
    }
}

/// Retry/backoff state machine for one upstream connection
#[derive(Debug)]
pub struct ConnectionManager {
    exchange_id: ExchangeId,
    schedule: Vec<Duration>,
    max_attempts: Option<u32>,
    state: ConnectionState,
    attempts: u32,
    health: Option<Arc<ExchangeHealth>>,
    events: EventReporter,
}

impl ConnectionManager {
    pub fn new(exchange_id: ExchangeId, config: &RetryConfig) -> Self {
        let mut schedule = config.schedule();
        if schedule.is_empty() {
            schedule.push(Duration::from_secs(10));
        }

        Self {
            exchange_id,
            schedule,
            max_attempts: config.max_attempts,
            state: ConnectionState::Disconnected,
            attempts: 0,
            health: None,
            events: EventReporter::new(),
        }
    }

    pub fn with_health(mut self, health: Arc<ExchangeHealth>) -> Self {
        health.set(&self.exchange_id, self.state);
        self.health = Some(health);
        self
    }

    pub fn with_events(mut self, events: EventReporter) -> Self {
        self.events = events;
        self
    }

    pub fn exchange_id(&self) -> &ExchangeId {
        &self.exchange_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_permanently_failed(&self) -> bool {
        self.state == ConnectionState::PermanentlyFailed
    }

    /// Delay before retry number `attempt` (1-based); the last value repeats
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let idx = (attempt.max(1) as usize - 1).min(self.schedule.len() - 1);
        self.schedule[idx]
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.transition(ConnectionState::Connected, None);
    }

    /// Upstream closed without an error
    pub fn on_disconnected(&mut self) {
        if self.state == ConnectionState::Connected {
            self.transition(ConnectionState::Disconnected, None);
        }
    }

    pub fn on_failure(&mut self, err: &FeedError) -> RetryDecision {
        if self.is_permanently_failed() {
            return RetryDecision::GiveUp;
        }

        let kind = err.classify();
        log_failure(&self.exchange_id, kind, err);

        if self.state == ConnectionState::Connected {
            self.transition(ConnectionState::Disconnected, Some(kind));
        }

        self.attempts += 1;
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            self.transition(ConnectionState::PermanentlyFailed, Some(kind));
            return RetryDecision::GiveUp;
        }

        let delay = self.backoff_for(self.attempts);
        self.transition(ConnectionState::Retrying { attempt: self.attempts }, Some(kind));
        RetryDecision::RetryAfter(delay)
    }

    fn transition(&mut self, to: ConnectionState, cause: Option<ConnectivityKind>) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        if let Some(health) = &self.health {
            health.set(&self.exchange_id, to);
        }
        self.events.state_changed(&self.exchange_id, from, to, cause);
    }
}

fn log_failure(exchange_id: &ExchangeId, kind: ConnectivityKind, err: &FeedError) {
    match kind {
        ConnectivityKind::Dns => error!(
            target: "arb::feed",
            exchange = %exchange_id,
            "DNS resolution failed: {}; usually a temporary network issue, will retry",
            err
        ),
        ConnectivityKind::Tls => error!(target: "arb::feed", exchange = %exchange_id, "SSL/TLS error: {}", err),
        ConnectivityKind::Timeout => error!(target: "arb::feed", exchange = %exchange_id, "Connection timeout: {}", err),
        ConnectivityKind::Generic => error!(target: "arb::feed", exchange = %exchange_id, "Feed error: {}", err),
    }
}
