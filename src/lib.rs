// ============================================================================
// Exchange Core Library
// Price-time matching, margin accounting, ledger and settlement finality
// ============================================================================

//! # Exchange Core
//!
//! Trading core of a centralized exchange: per-symbol price-time matching,
//! a double-entry style ledger with atomic batches, spot and perpetual
//! margin with liquidation, and on-chain deposit finality with reorg
//! rollback.
//!
//! ## Features
//!
//! - **One worker thread per symbol** owning its order book; requests travel
//!   over crossbeam channels and forced closes jump the queue
//! - **Atomic ledger batches** locked in ascending account order
//! - **Cross and isolated margin** with maintenance checks on every mark
//!   price update and a background liquidation sweep
//! - **Deposit finality** with per-chain confirmation thresholds and
//!   rollback of orphaned deposits on reorg
//!
//! ## Example
//!
//! ```rust
//! use exchange_core::prelude::*;
//! use rust_decimal::Decimal;
//!
//! let exchange = ExchangeBuilder::new()
//!     .spot_market("BTC-USD", "BTC", "USD")
//!     .with_fees(Decimal::ZERO, Decimal::ZERO)
//!     .build()
//!     .unwrap();
//!
//! let alice = AccountId::new(1);
//! let bob = AccountId::new(2);
//! exchange.deposit(alice, "USD", Decimal::from(10_000)).unwrap();
//! exchange.deposit(bob, "BTC", Decimal::ONE).unwrap();
//!
//! let price = Decimal::from(50_000);
//! let size = Decimal::new(1, 1);
//! exchange
//!     .submit_order(NewOrder::limit(alice, "BTC-USD", Side::Buy, price, size))
//!     .unwrap();
//! let ack = exchange
//!     .submit_order(NewOrder::limit(bob, "BTC-USD", Side::Sell, price, size))
//!     .unwrap();
//!
//! assert_eq!(ack.trades.len(), 1);
//! assert_eq!(exchange.balance(alice, "BTC").available, size);
//! ```

pub mod book;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod interfaces;
pub mod ledger;
pub mod numeric;
pub mod risk;
pub mod settlement;
pub mod utils;

// Re-exports for convenience
pub mod prelude {
    pub use crate::book::{OrderBook, OrderBookSnapshot};
    pub use crate::domain::{
        AccountId, Balance, Chain, Deposit, DepositId, DepositStatus, ExchangeConfig, MarginMode,
        MarketKind, NewOrder, Order, OrderId, OrderStatus, OrderType, Position, Side,
        SymbolConfig, Trade, TradeEvent,
    };
    pub use crate::engine::{create_from_config, Exchange, ExchangeBuilder, OrderAck};
    pub use crate::errors::{
        CancelFailReason, ExchangeError, ExchangeResult, LedgerError, OrderRejectReason,
    };
    pub use crate::interfaces::{
        ChannelEventHandler, EventHandler, ExchangeEvent, LoggingEventHandler, NoOpEventHandler,
    };
    pub use crate::numeric::{Amount, Price, Quantity};
    pub use crate::settlement::{Block, DepositEvent};
}
