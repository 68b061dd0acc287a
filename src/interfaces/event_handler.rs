// ============================================================================
// Event Handler Interface
// Defines the contract for handling exchange events
// ============================================================================

use crate::domain::{AccountId, Chain, Deposit, OrderId, Trade, TradeEvent};
use crate::errors::OrderRejectReason;
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Events emitted by the exchange core
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExchangeEvent {
    /// Order accepted by its symbol's engine
    OrderAccepted {
        order_id: OrderId,
        account_id: AccountId,
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    /// Order rejected with reason
    OrderRejected {
        order_id: OrderId,
        account_id: AccountId,
        symbol: String,
        reason: OrderRejectReason,
        timestamp: DateTime<Utc>,
    },

    /// Trade executed and settled
    TradeExecuted { trade: Trade },

    /// Order fully filled
    OrderFilled {
        order_id: OrderId,
        account_id: AccountId,
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    /// Remainder added to book
    OrderRested {
        order_id: OrderId,
        account_id: AccountId,
        symbol: String,
        price: Price,
        quantity: Quantity,
        timestamp: DateTime<Utc>,
    },

    /// Order cancelled (by request, market remainder, or liquidation sweep)
    OrderCancelled {
        order_id: OrderId,
        account_id: AccountId,
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    /// Stop order reached its trigger and was re-submitted
    StopTriggered {
        order_id: OrderId,
        account_id: AccountId,
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    /// Forced close started for a position past its liquidation price
    LiquidationTriggered {
        account_id: AccountId,
        symbol: String,
        quantity: Quantity,
        mark_price: Price,
        liquidation_price: Price,
        timestamp: DateTime<Utc>,
    },

    SymbolHalted {
        symbol: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    SymbolResumed {
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    /// Deposit reached its confirmation threshold and was credited
    DepositCredited { deposit: Deposit },

    /// Deposit orphaned by a reorg
    DepositInvalidated { deposit: Deposit, fork_height: u64 },

    ReorgDetected {
        chain: Chain,
        height: u64,
        old_hash: String,
        new_hash: String,
        timestamp: DateTime<Utc>,
    },

    AccountFrozen {
        account_id: AccountId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    AccountUnfrozen {
        account_id: AccountId,
        timestamp: DateTime<Utc>,
    },
}

impl ExchangeEvent {
    /// Accounts this event concerns
    pub fn accounts(&self) -> Vec<AccountId> {
        match self {
            ExchangeEvent::OrderAccepted { account_id, .. }
            | ExchangeEvent::OrderRejected { account_id, .. }
            | ExchangeEvent::OrderFilled { account_id, .. }
            | ExchangeEvent::OrderRested { account_id, .. }
            | ExchangeEvent::OrderCancelled { account_id, .. }
            | ExchangeEvent::StopTriggered { account_id, .. }
            | ExchangeEvent::LiquidationTriggered { account_id, .. }
            | ExchangeEvent::AccountFrozen { account_id, .. }
            | ExchangeEvent::AccountUnfrozen { account_id, .. } => vec![*account_id],
            ExchangeEvent::TradeExecuted { trade } => {
                vec![trade.maker_account_id, trade.taker_account_id]
            },
            ExchangeEvent::DepositCredited { deposit }
            | ExchangeEvent::DepositInvalidated { deposit, .. } => vec![deposit.account_id],
            ExchangeEvent::SymbolHalted { .. }
            | ExchangeEvent::SymbolResumed { .. }
            | ExchangeEvent::ReorgDetected { .. } => Vec::new(),
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            ExchangeEvent::OrderAccepted { symbol, .. }
            | ExchangeEvent::OrderRejected { symbol, .. }
            | ExchangeEvent::OrderFilled { symbol, .. }
            | ExchangeEvent::OrderRested { symbol, .. }
            | ExchangeEvent::OrderCancelled { symbol, .. }
            | ExchangeEvent::StopTriggered { symbol, .. }
            | ExchangeEvent::LiquidationTriggered { symbol, .. }
            | ExchangeEvent::SymbolHalted { symbol, .. }
            | ExchangeEvent::SymbolResumed { symbol, .. } => Some(symbol),
            ExchangeEvent::TradeExecuted { trade } => Some(&trade.symbol),
            _ => None,
        }
    }
}

/// Event handler trait for processing exchange events.
/// Implementations can handle logging, metrics, notifications, etc.
pub trait EventHandler: Send + Sync {
    /// Handle an exchange event
    fn on_event(&self, event: ExchangeEvent);

    /// Batch event handler (optional optimization)
    fn on_events(&self, events: Vec<ExchangeEvent>) {
        for event in events {
            self.on_event(event);
        }
    }
}

/// No-op event handler for testing
pub struct NoOpEventHandler;

impl EventHandler for NoOpEventHandler {
    fn on_event(&self, _event: ExchangeEvent) {
        // Do nothing
    }
}

/// Logging event handler
pub struct LoggingEventHandler;

impl EventHandler for LoggingEventHandler {
    fn on_event(&self, event: ExchangeEvent) {
        tracing::debug!("Exchange event: {:?}", event);
    }
}

// ============================================================================
// Channel Fan-out
// ============================================================================

enum Subscription {
    Trades {
        symbol: String,
        sender: Sender<TradeEvent>,
    },
    Account {
        account_id: AccountId,
        sender: Sender<ExchangeEvent>,
    },
    All {
        sender: Sender<ExchangeEvent>,
    },
}

/// Pushes events to crossbeam channel subscribers.
///
/// Subscribers whose receiver has been dropped are pruned on the next event
/// that fails to reach them.
#[derive(Default)]
pub struct ChannelEventHandler {
    subscriptions: RwLock<Vec<(u64, Subscription)>>,
    next_id: AtomicU64,
}

impl ChannelEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Public trade prints for one symbol
    pub fn subscribe_trades(&self, symbol: impl Into<String>) -> Receiver<TradeEvent> {
        let (sender, receiver) = channel::unbounded();
        self.add(Subscription::Trades {
            symbol: symbol.into(),
            sender,
        });
        receiver
    }

    /// Every event concerning one account
    pub fn subscribe_account(&self, account_id: AccountId) -> Receiver<ExchangeEvent> {
        let (sender, receiver) = channel::unbounded();
        self.add(Subscription::Account { account_id, sender });
        receiver
    }

    pub fn subscribe_all(&self) -> Receiver<ExchangeEvent> {
        let (sender, receiver) = channel::unbounded();
        self.add(Subscription::All { sender });
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn add(&self, subscription: Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.write().push((id, subscription));
    }
}

impl EventHandler for ChannelEventHandler {
    fn on_event(&self, event: ExchangeEvent) {
        let accounts = event.accounts();
        // A send on an unbounded channel only fails once every receiver is gone
        let mut closed = Vec::new();

        for (id, subscription) in self.subscriptions.read().iter() {
            let delivered = match subscription {
                Subscription::Trades { symbol, sender } => match &event {
                    ExchangeEvent::TradeExecuted { trade } if &trade.symbol == symbol => {
                        sender.send(TradeEvent::from(trade)).is_ok()
                    },
                    _ => true,
                },
                Subscription::Account { account_id, sender } => {
                    if accounts.contains(account_id) {
                        sender.send(event.clone()).is_ok()
                    } else {
                        true
                    }
                },
                Subscription::All { sender } => sender.send(event.clone()).is_ok(),
            };
            if !delivered {
                closed.push(*id);
            }
        }

        if !closed.is_empty() {
            self.subscriptions
                .write()
                .retain(|(id, _)| !closed.contains(id));
        }
    }
}
