// ============================================================================
// Domain Models Module
// Contains all core domain entities and value objects
// ============================================================================

pub mod account;
pub mod config;
pub mod deposit;
pub mod order;
pub mod position;
pub mod trade;

pub use account::{AccountId, Balance};
pub use config::{ExchangeConfig, MarketKind, SymbolConfig};
pub use deposit::{Chain, Deposit, DepositId, DepositStatus};
pub use order::{MarginMode, NewOrder, Order, OrderId, OrderType, Side};
pub use position::{FillEffect, Position};
pub use trade::{Trade, TradeEvent};

// Re-export status machine
pub use order::status::{OrderStatus, OrderStatusTransition};
