// ============================================================================
// Price Levels and Book Sides
// ============================================================================

use crate::domain::{OrderId, Side};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};

// ============================================================================
// Price Level
// ============================================================================

/// FIFO queue of resting orders at one price
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Price,
    /// Oldest first; ties at a price are broken only by arrival sequence
    orders: VecDeque<OrderId>,
    total_quantity: Quantity,
}

impl PriceLevel {
    pub fn new(price: Price) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            total_quantity: Decimal::ZERO,
        }
    }

    pub fn push_back(&mut self, order_id: OrderId, quantity: Quantity) {
        self.orders.push_back(order_id);
        self.total_quantity += quantity;
    }

    pub fn front(&self) -> Option<OrderId> {
        self.orders.front().copied()
    }

    pub fn pop_front(&mut self) -> Option<OrderId> {
        self.orders.pop_front()
    }

    /// Remove an order from anywhere in the queue
    pub fn remove(&mut self, order_id: &OrderId, remaining: Quantity) -> bool {
        match self.orders.iter().position(|id| id == order_id) {
            Some(index) => {
                self.orders.remove(index);
                self.total_quantity -= remaining;
                true
            },
            None => false,
        }
    }

    pub fn subtract_quantity(&mut self, quantity: Quantity) {
        self.total_quantity -= quantity;
    }

    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    pub fn order_ids(&self) -> impl Iterator<Item = &OrderId> {
        self.orders.iter()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

// ============================================================================
// Book Side
// ============================================================================

/// One side of the book (bids or asks), levels keyed by price
#[derive(Debug, Clone)]
pub struct BookSide {
    pub side: Side,
    levels: BTreeMap<Price, PriceLevel>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// Append an order behind everything already resting at its price
    pub fn insert(&mut self, order_id: OrderId, price: Price, quantity: Quantity) {
        self.levels
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price))
            .push_back(order_id, quantity);
    }

    /// Get the best (top-of-book) price
    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            // Highest bid (last in sorted order)
            Side::Buy => self.levels.keys().next_back().copied(),
            // Lowest ask (first in sorted order)
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    pub fn level(&self, price: &Price) -> Option<&PriceLevel> {
        self.levels.get(price)
    }

    pub fn level_mut(&mut self, price: &Price) -> Option<&mut PriceLevel> {
        self.levels.get_mut(price)
    }

    /// Remove an order; drops the level once it is empty
    pub fn remove(&mut self, order_id: &OrderId, price: Price, remaining: Quantity) -> bool {
        let removed = match self.levels.get_mut(&price) {
            Some(level) => level.remove(order_id, remaining),
            None => false,
        };
        self.remove_if_empty(price);
        removed
    }

    pub fn remove_if_empty(&mut self, price: Price) {
        if self.levels.get(&price).is_some_and(|level| level.is_empty()) {
            self.levels.remove(&price);
        }
    }

    /// Levels from best to worst
    pub fn levels(&self) -> Box<dyn Iterator<Item = &PriceLevel> + '_> {
        match self.side {
            Side::Buy => Box::new(self.levels.values().rev()),
            Side::Sell => Box::new(self.levels.values()),
        }
    }

    /// Get depth at N levels
    pub fn depth(&self, num_levels: usize) -> Vec<(Price, Quantity)> {
        self.levels()
            .take(num_levels)
            .map(|level| (level.price, level.total_quantity()))
            .collect()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Does an incoming order on `side` limited at `limit` cross a resting level
/// at `book_price`? Market orders (no limit) cross every level.
pub fn prices_cross(side: Side, limit: Option<Price>, book_price: Price) -> bool {
    match (side, limit) {
        (_, None) => true,
        (Side::Buy, Some(limit)) => limit >= book_price,
        (Side::Sell, Some(limit)) => limit <= book_price,
    }
}
