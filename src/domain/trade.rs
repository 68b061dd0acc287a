// ============================================================================
// Trade Domain Model
// ============================================================================

use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{AccountId, OrderId, Side};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Represents a matched trade between two orders
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Trade {
    /// Unique trade identifier
    pub id: Uuid,

    /// Trading symbol
    pub symbol: String,

    /// Order ID of the passive order (resting in book)
    pub maker_order_id: OrderId,

    /// Order ID of the aggressive order (incoming)
    pub taker_order_id: OrderId,

    pub maker_account_id: AccountId,

    pub taker_account_id: AccountId,

    /// Side of the aggressive order
    pub taker_side: Side,

    /// Execution price (the maker's price)
    pub price: Price,

    /// Executed quantity
    pub quantity: Quantity,

    /// Trade timestamp
    pub timestamp: DateTime<Utc>,

    /// Taker was a forced liquidation
    pub liquidation: bool,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        maker_order_id: OrderId,
        taker_order_id: OrderId,
        maker_account_id: AccountId,
        taker_account_id: AccountId,
        taker_side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            maker_order_id,
            taker_order_id,
            maker_account_id,
            taker_account_id,
            taker_side,
            price,
            quantity,
            timestamp: Utc::now(),
            liquidation: false,
        }
    }

    /// Notional value of the trade (price * quantity)
    pub fn notional_value(&self) -> Decimal {
        self.price * self.quantity
    }

    pub fn buyer(&self) -> AccountId {
        match self.taker_side {
            Side::Buy => self.taker_account_id,
            Side::Sell => self.maker_account_id,
        }
    }

    pub fn seller(&self) -> AccountId {
        match self.taker_side {
            Side::Buy => self.maker_account_id,
            Side::Sell => self.taker_account_id,
        }
    }
}

/// Public trade print pushed to market-data subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TradeEvent {
    pub symbol: String,
    pub price: Price,
    pub quantity: Quantity,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
    pub trade_id: Uuid,
}

impl From<&Trade> for TradeEvent {
    fn from(trade: &Trade) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            price: trade.price,
            quantity: trade.quantity,
            side: trade.taker_side,
            timestamp: trade.timestamp,
            trade_id: trade.id,
        }
    }
}

#[cfg(feature = "serde")]
impl TradeEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(taker_side: Side) -> Trade {
        Trade::new(
            "BTC-USD".to_string(),
            OrderId::new(),
            OrderId::new(),
            AccountId::new(1),
            AccountId::new(2),
            taker_side,
            Decimal::new(1005, 1), // 100.5
            Decimal::from(2),
        )
    }

    #[test]
    fn test_trade_creation() {
        let trade = sample(Side::Buy);

        assert_eq!(trade.symbol, "BTC-USD");
        assert_eq!(trade.notional_value(), Decimal::from(201));
        assert_eq!(trade.buyer(), AccountId::new(2));
        assert_eq!(trade.seller(), AccountId::new(1));
    }

    #[test]
    fn test_trade_event_carries_taker_side() {
        let trade = sample(Side::Sell);
        let event = TradeEvent::from(&trade);

        assert_eq!(event.side, Side::Sell);
        assert_eq!(event.trade_id, trade.id);
        assert_eq!(trade.buyer(), AccountId::new(1));
    }
}
