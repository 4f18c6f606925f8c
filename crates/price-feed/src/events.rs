//! Observability events
//!
//! Every rejection and every connection state transition is reported exactly
//! once: as a tracing event and, when an observer is attached, as a
//! [`FeedEvent`] on an unbounded channel.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use arb_core::{ConnectivityKind, ExchangeId, RejectionReason, Symbol};

use crate::resilience::ConnectionState;

/// Structured event for an external logging/metrics collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Rejected {
        exchange_id: ExchangeId,
        symbol: Option<Symbol>,
        reason: RejectionReason,
    },
    StateChanged {
        exchange_id: ExchangeId,
        from: ConnectionState,
        to: ConnectionState,
        cause: Option<ConnectivityKind>,
    },
}

/// Cloneable handle used by workers to report events
#[derive(Debug, Clone, Default)]
pub struct EventReporter {
    tx: Option<mpsc::UnboundedSender<FeedEvent>>,
}

impl EventReporter {
    /// Reporter that only emits tracing events
    pub fn new() -> Self {
        Self::default()
    }

    /// Reporter plus the receiving end for an observer
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn rejected(&self, exchange_id: &ExchangeId, symbol: Option<&Symbol>, reason: &RejectionReason) {
        info!(
            target: "arb::validator",
            exchange = %exchange_id,
            symbol = symbol.map(|s| s.as_str()).unwrap_or("?"),
            kind = %reason.kind(),
            "Rejected quote: {}",
            reason
        );

        self.forward(FeedEvent::Rejected {
            exchange_id: exchange_id.clone(),
            symbol: symbol.cloned(),
            reason: reason.clone(),
        });
    }

    pub fn state_changed(
        &self,
        exchange_id: &ExchangeId,
        from: ConnectionState,
        to: ConnectionState,
        cause: Option<ConnectivityKind>,
    ) {
        let cause_name = cause.map(|c| c.name()).unwrap_or("-");
        match to {
            ConnectionState::PermanentlyFailed => error!(
                target: "arb::connection",
                exchange = %exchange_id,
                %from,
                %to,
                cause = cause_name,
                "Giving up on exchange"
            ),
            ConnectionState::Retrying { .. } | ConnectionState::Disconnected => warn!(
                target: "arb::connection",
                exchange = %exchange_id,
                %from,
                %to,
                cause = cause_name,
                "Connection state changed"
            ),
            ConnectionState::Connected => info!(
                target: "arb::connection",
                exchange = %exchange_id,
                %from,
                %to,
                "Connection state changed"
            ),
        }

        self.forward(FeedEvent::StateChanged {
            exchange_id: exchange_id.clone(),
            from,
            to,
            cause,
        });
    }

    fn forward(&self, event: FeedEvent) {
        if let Some(tx) = &self.tx {
            // Observer gone is not an ingestion failure
            let _ = tx.send(event);
        }
    }
}
