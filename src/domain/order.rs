// ============================================================================
// Order Domain Model
// ============================================================================

use super::AccountId;
use crate::numeric::{Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OrderType {
    Limit,
    Market,
    /// Held until the last trade price reaches `stop_price`, then injected as a
    /// limit order at the order's price, or as a market order when it has none.
    Stop { stop_price: Price },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MarginMode {
    #[default]
    Cross,
    Isolated,
}

// ============================================================================
// Order Status Machine
// ============================================================================

pub mod status {
    #[cfg(feature = "serde")]
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub enum OrderStatus {
        Open,
        PartiallyFilled,
        Filled,
        Cancelled,
        Rejected,
    }

    impl OrderStatus {
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
            )
        }

        pub fn can_be_cancelled(&self) -> bool {
            matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
        }
    }

    /// Valid transitions of the order status machine
    #[derive(Debug, Clone, Copy)]
    pub enum OrderStatusTransition {
        PartialFill,
        Fill,
        Cancel,
        Reject,
    }

    impl OrderStatus {
        pub fn transition(&self, transition: OrderStatusTransition) -> Result<OrderStatus, String> {
            match (self, transition) {
                (OrderStatus::Open, OrderStatusTransition::PartialFill)
                | (OrderStatus::PartiallyFilled, OrderStatusTransition::PartialFill) => {
                    Ok(OrderStatus::PartiallyFilled)
                },
                (OrderStatus::Open, OrderStatusTransition::Fill)
                | (OrderStatus::PartiallyFilled, OrderStatusTransition::Fill) => {
                    Ok(OrderStatus::Filled)
                },
                (OrderStatus::Open, OrderStatusTransition::Cancel)
                | (OrderStatus::PartiallyFilled, OrderStatusTransition::Cancel) => {
                    Ok(OrderStatus::Cancelled)
                },
                (OrderStatus::Open, OrderStatusTransition::Reject)
                | (OrderStatus::PartiallyFilled, OrderStatusTransition::Reject) => {
                    Ok(OrderStatus::Rejected)
                },

                _ => Err(format!(
                    "Invalid transition from {:?} via {:?}",
                    self, transition
                )),
            }
        }
    }
}

use status::{OrderStatus, OrderStatusTransition};

// ============================================================================
// Order Intent
// ============================================================================

/// Order request as received from the gateway, before the engine assigns ids
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NewOrder {
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,
}

impl NewOrder {
    pub fn limit(
        account_id: AccountId,
        symbol: impl Into<String>,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            leverage: None,
            margin_mode: None,
        }
    }

    pub fn market(
        account_id: AccountId,
        symbol: impl Into<String>,
        side: Side,
        quantity: Quantity,
    ) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            leverage: None,
            margin_mode: None,
        }
    }

    /// Stop order; `limit_price` turns the triggered order into a limit order
    pub fn stop(
        account_id: AccountId,
        symbol: impl Into<String>,
        side: Side,
        stop_price: Price,
        limit_price: Option<Price>,
        quantity: Quantity,
    ) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Stop { stop_price },
            price: limit_price,
            quantity,
            leverage: None,
            margin_mode: None,
        }
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_margin_mode(mut self, mode: MarginMode) -> Self {
        self.margin_mode = Some(mode);
        self
    }
}

// ============================================================================
// Order Entity
// ============================================================================

/// Order owned by a symbol's matching engine.
///
/// Only the engine that owns the symbol mutates it; terminal orders refuse
/// every further fill or status change.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Order {
    pub id: OrderId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    /// Forced close produced by the risk module
    pub liquidation: bool,
    pub created_at: DateTime<Utc>,

    filled_quantity: Quantity,
    status: OrderStatus,
    sequence: u64,
}

impl Order {
    pub fn new(id: OrderId, request: NewOrder) -> Self {
        Self {
            id,
            account_id: request.account_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            quantity: request.quantity,
            leverage: request.leverage.unwrap_or(1),
            margin_mode: request.margin_mode.unwrap_or_default(),
            liquidation: false,
            created_at: Utc::now(),
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Open,
            sequence: 0,
        }
    }

    /// Market order closing a position on behalf of the risk module
    pub fn liquidation(
        account_id: AccountId,
        symbol: String,
        side: Side,
        quantity: Quantity,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Self {
        let mut order = Self::new(
            OrderId::new(),
            NewOrder {
                account_id,
                symbol,
                side,
                order_type: OrderType::Market,
                price: None,
                quantity,
                leverage: Some(leverage),
                margin_mode: Some(margin_mode),
            },
        );
        order.liquidation = true;
        order
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn filled_quantity(&self) -> Quantity {
        self.filled_quantity
    }

    pub fn remaining_quantity(&self) -> Quantity {
        self.quantity - self.filled_quantity
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_market_order(&self) -> bool {
        matches!(self.order_type, OrderType::Market)
    }

    pub fn is_limit_order(&self) -> bool {
        matches!(self.order_type, OrderType::Limit)
    }

    pub fn is_stop_order(&self) -> bool {
        matches!(self.order_type, OrderType::Stop { .. })
    }

    pub fn stop_price(&self) -> Option<Price> {
        match self.order_type {
            OrderType::Stop { stop_price } => Some(stop_price),
            _ => None,
        }
    }

    // ========================================================================
    // Mutations (engine only)
    // ========================================================================

    /// Fill `quantity` of this order.
    /// Returns false if the order is terminal or the quantity exceeds what remains.
    pub fn fill(&mut self, quantity: Quantity) -> bool {
        if self.is_terminal() || quantity <= Decimal::ZERO || quantity > self.remaining_quantity()
        {
            return false;
        }

        let transition = if quantity == self.remaining_quantity() {
            OrderStatusTransition::Fill
        } else {
            OrderStatusTransition::PartialFill
        };

        match self.status.transition(transition) {
            Ok(next) => {
                self.filled_quantity += quantity;
                self.status = next;
                true
            },
            Err(_) => false,
        }
    }

    /// Cancel the order; returns false if it is already terminal
    pub fn cancel(&mut self) -> bool {
        self.apply(OrderStatusTransition::Cancel)
    }

    /// Reject the order; returns false if it is already terminal
    pub fn reject(&mut self) -> bool {
        self.apply(OrderStatusTransition::Reject)
    }

    /// Turn a triggered stop order into the limit or market order it guards
    pub(crate) fn activate_stop(&mut self) {
        if self.is_stop_order() {
            self.order_type = match self.price {
                Some(_) => OrderType::Limit,
                None => OrderType::Market,
            };
        }
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    fn apply(&mut self, transition: OrderStatusTransition) -> bool {
        match self.status.transition(transition) {
            Ok(next) => {
                self.status = next;
                true
            },
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_buy(quantity: i64) -> Order {
        Order::new(
            OrderId::new(),
            NewOrder::limit(
                AccountId::new(1),
                "BTC-USD",
                Side::Buy,
                Decimal::from(50000),
                Decimal::from(quantity),
            ),
        )
    }

    #[test]
    fn test_order_creation() {
        let order = limit_buy(1);

        assert_eq!(order.remaining_quantity(), Decimal::from(1));
        assert_eq!(order.filled_quantity(), Decimal::ZERO);
        assert_eq!(order.status(), OrderStatus::Open);
        assert_eq!(order.leverage, 1);
        assert_eq!(order.margin_mode, MarginMode::Cross);
    }

    #[test]
    fn test_fill() {
        let mut order = limit_buy(10);

        assert!(order.fill(Decimal::from(3)));
        assert_eq!(order.filled_quantity(), Decimal::from(3));
        assert_eq!(order.remaining_quantity(), Decimal::from(7));
        assert_eq!(order.status(), OrderStatus::PartiallyFilled);

        assert!(order.fill(Decimal::from(7)));
        assert_eq!(order.status(), OrderStatus::Filled);
    }

    #[test]
    fn test_overfill_protection() {
        let mut order = limit_buy(5);

        assert!(!order.fill(Decimal::from(10)));
        assert_eq!(order.filled_quantity(), Decimal::ZERO);
    }

    #[test]
    fn test_terminal_orders_refuse_mutation() {
        let mut order = limit_buy(1);

        assert!(order.cancel());
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(!order.cancel());
        assert!(!order.reject());
        assert!(!order.fill(Decimal::ONE));
    }

    #[test]
    fn test_stop_activation() {
        let mut order = Order::new(
            OrderId::new(),
            NewOrder::stop(
                AccountId::new(1),
                "BTC-USD",
                Side::Sell,
                Decimal::from(49000),
                None,
                Decimal::ONE,
            ),
        );
        assert_eq!(order.stop_price(), Some(Decimal::from(49000)));
        order.activate_stop();
        assert!(order.is_market_order());
    }

    #[test]
    fn test_order_ids_key_ordered_maps() {
        let routes = crossbeam_skiplist::SkipMap::new();
        let first = OrderId::new();
        let second = OrderId::new();
        routes.insert(first, "BTC-USD");
        routes.insert(second, "ETH-USD");

        assert_eq!(routes.get(&second).map(|e| *e.value()), Some("ETH-USD"));
        assert_eq!(routes.len(), 2);
        assert_eq!(first.cmp(&first), std::cmp::Ordering::Equal);
    }
}
