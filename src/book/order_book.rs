// ============================================================================
// Order Book
// Price-time priority book for a single symbol
// ============================================================================

use super::history::OrderHistory;
use super::price_level::{prices_cross, BookSide};
use super::stop_book::StopBook;
use crate::domain::{AccountId, Order, OrderId, Side, SymbolConfig, Trade};
use crate::errors::{CancelFailReason, OrderRejectReason};
use crate::numeric::{is_multiple_of, Price, Quantity};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::convert::Infallible;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Match Output
// ============================================================================

/// A fill about to be committed. Both orders are shown as they were before it.
#[derive(Debug)]
pub struct Fill<'a> {
    pub trade: &'a Trade,
    pub maker: &'a Order,
    pub taker: &'a Order,
}

/// Outcome of submitting one order
#[derive(Debug, Clone)]
pub struct MatchResult<E = Infallible> {
    /// The incoming order with its final status
    pub order: Order,
    /// Trades in execution order
    pub trades: Vec<Trade>,
    /// Maker orders as they stood after each trade
    pub maker_updates: Vec<Order>,
    /// Set when the settlement callback refused a fill; matching stopped there
    pub settlement_error: Option<E>,
}

impl<E> MatchResult<E> {
    fn unmatched(order: Order) -> Self {
        Self {
            order,
            trades: Vec::new(),
            maker_updates: Vec::new(),
            settlement_error: None,
        }
    }

    pub fn filled_quantity(&self) -> Quantity {
        self.trades.iter().map(|t| t.quantity).sum()
    }
}

/// What a market order would consume if it hit the book now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillEstimate {
    pub quantity: Quantity,
    pub notional: Decimal,
    pub worst_price: Option<Price>,
}

// ============================================================================
// Order Book Snapshot
// ============================================================================

/// Immutable snapshot of the order book state
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OrderBookSnapshot {
    pub symbol: String,
    /// Bid levels (price, quantity), best first
    pub bids: Vec<(Price, Quantity)>,
    /// Ask levels (price, quantity), best first
    pub asks: Vec<(Price, Quantity)>,
    /// Current spread (ask - bid)
    pub spread: Option<Decimal>,
    /// Mid price
    pub mid_price: Option<Decimal>,
    pub last_trade_price: Option<Price>,
}

impl OrderBookSnapshot {
    pub fn with_depth(
        symbol: String,
        bids: Vec<(Price, Quantity)>,
        asks: Vec<(Price, Quantity)>,
        last_trade_price: Option<Price>,
    ) -> Self {
        let (spread, mid_price) = match (bids.first(), asks.first()) {
            (Some((bid, _)), Some((ask, _))) => {
                (Some(ask - bid), Some((bid + ask) / Decimal::from(2)))
            },
            _ => (None, None),
        };

        Self {
            symbol,
            bids,
            asks,
            spread,
            mid_price,
            last_trade_price,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|(price, _)| *price)
    }

    pub fn total_bid_quantity(&self) -> Quantity {
        self.bids.iter().map(|(_, qty)| qty).sum()
    }

    pub fn total_ask_quantity(&self) -> Quantity {
        self.asks.iter().map(|(_, qty)| qty).sum()
    }
}

// ============================================================================
// Order Book
// ============================================================================

/// Single-writer book: only the symbol's engine worker touches it
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    bids: BookSide,
    asks: BookSide,

    /// Resting limit orders, indexed for cancellation
    resting: HashMap<OrderId, Order>,

    stops: StopBook,

    /// Terminal orders kept for status lookups
    history: OrderHistory,

    tick_size: Option<Decimal>,
    lot_size: Option<Decimal>,

    sequence_counter: u64,
    last_trade_price: Option<Price>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            resting: HashMap::new(),
            stops: StopBook::new(),
            history: OrderHistory::default(),
            tick_size: None,
            lot_size: None,
            sequence_counter: 0,
            last_trade_price: None,
        }
    }

    pub fn from_config(config: &SymbolConfig) -> Self {
        let mut book = Self::new(config.symbol.clone());
        book.tick_size = config.tick_size;
        book.lot_size = config.lot_size;
        book
    }

    /// Builder method: Set price tick size
    pub fn with_tick_size(mut self, tick: Decimal) -> Self {
        self.tick_size = Some(tick);
        self
    }

    /// Builder method: Set lot size
    pub fn with_lot_size(mut self, lot: Decimal) -> Self {
        self.lot_size = Some(lot);
        self
    }

    /// Builder method: Set how many terminal orders stay queryable in full
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = OrderHistory::with_capacity(capacity);
        self
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit an order with no settlement step
    pub fn submit(&mut self, order: Order) -> Result<MatchResult, OrderRejectReason> {
        self.submit_with(order, |_| Ok::<(), Infallible>(()))
    }

    /// Submit an order, offering each fill to `settle` before committing it.
    ///
    /// If `settle` fails, matching stops: the failed fill leaves both orders
    /// untouched and the incoming order is rejected. Fills settled before the
    /// failure stand.
    pub fn submit_with<E, F>(
        &mut self,
        mut order: Order,
        mut settle: F,
    ) -> Result<MatchResult<E>, OrderRejectReason>
    where
        F: FnMut(Fill<'_>) -> Result<(), E>,
    {
        if let Err(reason) = self.validate(&order) {
            return Err(self.refuse(order, reason));
        }

        if order.is_stop_order() {
            if !self.would_trigger(&order) {
                order.set_sequence(self.next_sequence());
                tracing::debug!(symbol = %self.symbol, order_id = ?order.id, "stop order parked");
                self.stops.insert(order.clone());
                return Ok(MatchResult::unmatched(order));
            }
            order.activate_stop();
        }

        if self.would_self_trade(&order) {
            return Err(self.refuse(order, OrderRejectReason::SelfTradePrevented));
        }

        order.set_sequence(self.next_sequence());
        let limit = limit_price(&order);

        let mut trades = Vec::new();
        let mut maker_updates = Vec::new();
        let mut settlement_error = None;

        {
            let Self {
                symbol,
                bids,
                asks,
                resting,
                history,
                last_trade_price,
                ..
            } = self;
            let opposite = match order.side {
                Side::Buy => asks,
                Side::Sell => bids,
            };

            while order.remaining_quantity() > Decimal::ZERO {
                let Some(level_price) = opposite.best_price() else {
                    break;
                };
                if !prices_cross(order.side, limit, level_price) {
                    break;
                }
                let Some(maker_id) = opposite.level(&level_price).and_then(|l| l.front()) else {
                    opposite.remove_if_empty(level_price);
                    continue;
                };
                let Some(maker) = resting.get_mut(&maker_id) else {
                    // Level entry without a resting order; drop it
                    if let Some(level) = opposite.level_mut(&level_price) {
                        level.pop_front();
                    }
                    opposite.remove_if_empty(level_price);
                    continue;
                };

                let quantity = order.remaining_quantity().min(maker.remaining_quantity());
                let mut trade = Trade::new(
                    symbol.clone(),
                    maker.id,
                    order.id,
                    maker.account_id,
                    order.account_id,
                    order.side,
                    level_price,
                    quantity,
                );
                trade.liquidation = order.liquidation;

                let fill = Fill {
                    trade: &trade,
                    maker: &*maker,
                    taker: &order,
                };
                if let Err(err) = settle(fill) {
                    settlement_error = Some(err);
                    break;
                }

                maker.fill(quantity);
                order.fill(quantity);
                let maker_after = maker.clone();

                if let Some(level) = opposite.level_mut(&level_price) {
                    level.subtract_quantity(quantity);
                    if maker_after.is_terminal() {
                        level.pop_front();
                    }
                }
                if maker_after.is_terminal() {
                    resting.remove(&maker_id);
                    history.insert(maker_after.clone());
                    opposite.remove_if_empty(level_price);
                }

                tracing::debug!(
                    symbol = %symbol,
                    price = %level_price,
                    quantity = %quantity,
                    maker = ?maker_id,
                    taker = ?order.id,
                    "fill"
                );

                *last_trade_price = Some(level_price);
                maker_updates.push(maker_after);
                trades.push(trade);
            }
        }

        if settlement_error.is_some() {
            order.reject();
            self.history.insert(order.clone());
        } else if order.remaining_quantity().is_zero() {
            self.history.insert(order.clone());
        } else if let Some(price) = limit {
            self.rest(order.clone(), price);
        } else {
            // Market remainder never rests
            order.cancel();
            self.history.insert(order.clone());
        }

        Ok(MatchResult {
            order,
            trades,
            maker_updates,
            settlement_error,
        })
    }

    /// Price and quantity checks applied to every incoming order
    pub fn validate(&self, order: &Order) -> Result<(), OrderRejectReason> {
        if order.quantity <= Decimal::ZERO || order.remaining_quantity() <= Decimal::ZERO {
            return Err(OrderRejectReason::InvalidQuantity);
        }
        if let Some(lot) = self.lot_size {
            if !is_multiple_of(order.quantity, lot) {
                return Err(OrderRejectReason::InvalidQuantity);
            }
        }

        if order.is_limit_order() && order.price.is_none() {
            return Err(OrderRejectReason::InvalidPrice);
        }
        if let Some(stop) = order.stop_price() {
            if stop <= Decimal::ZERO {
                return Err(OrderRejectReason::InvalidPrice);
            }
        }
        if !order.is_market_order() {
            if let Some(price) = order.price {
                if price <= Decimal::ZERO {
                    return Err(OrderRejectReason::InvalidPrice);
                }
                if let Some(tick) = self.tick_size {
                    if !is_multiple_of(price, tick) {
                        return Err(OrderRejectReason::InvalidPrice);
                    }
                }
            }
        }

        Ok(())
    }

    /// Would this stop order fire immediately at the current last trade price?
    pub fn would_trigger(&self, order: &Order) -> bool {
        match (order.stop_price(), self.last_trade_price) {
            (Some(stop), Some(last)) => StopBook::is_triggered(order.side, stop, last),
            _ => false,
        }
    }

    /// Does the liquidity this order would consume include one of its own
    /// account's resting orders?
    pub fn would_self_trade(&self, order: &Order) -> bool {
        let limit = limit_price(order);
        let mut remaining = order.remaining_quantity();

        for level in self.opposite(order.side).levels() {
            if !prices_cross(order.side, limit, level.price) {
                break;
            }
            for id in level.order_ids() {
                let Some(maker) = self.resting.get(id) else {
                    continue;
                };
                if maker.account_id == order.account_id {
                    return true;
                }
                remaining -= maker.remaining_quantity();
                if remaining <= Decimal::ZERO {
                    return false;
                }
            }
        }
        false
    }

    /// Walk the opposing side as a `side` order for `quantity` limited at
    /// `limit` would, without mutating anything
    pub fn estimate_fill(
        &self,
        side: Side,
        quantity: Quantity,
        limit: Option<Price>,
    ) -> FillEstimate {
        let mut estimate = FillEstimate::default();
        let mut remaining = quantity;

        for level in self.opposite(side).levels() {
            if remaining <= Decimal::ZERO || !prices_cross(side, limit, level.price) {
                break;
            }
            let take = remaining.min(level.total_quantity());
            estimate.quantity += take;
            estimate.notional += take * level.price;
            estimate.worst_price = Some(level.price);
            remaining -= take;
        }
        estimate
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    pub fn cancel(&mut self, order_id: &OrderId) -> Result<Order, CancelFailReason> {
        if let Some(mut order) = self.resting.remove(order_id) {
            if let Some(price) = order.price {
                let remaining = order.remaining_quantity();
                match order.side {
                    Side::Buy => self.bids.remove(order_id, price, remaining),
                    Side::Sell => self.asks.remove(order_id, price, remaining),
                };
            }
            order.cancel();
            self.history.insert(order.clone());
            return Ok(order);
        }

        if let Some(mut order) = self.stops.remove(order_id) {
            order.cancel();
            self.history.insert(order.clone());
            return Ok(order);
        }

        if self.history.contains(order_id) {
            Err(CancelFailReason::AlreadyTerminal)
        } else {
            Err(CancelFailReason::NotFound)
        }
    }

    /// Remove and activate every stop the last trade price has reached.
    ///
    /// The returned orders are converted to limit or market orders and must be
    /// submitted again by the caller.
    pub fn take_triggered_stops(&mut self) -> Vec<Order> {
        let Some(last) = self.last_trade_price else {
            return Vec::new();
        };
        let mut triggered = self.stops.take_triggered(last);
        for order in &mut triggered {
            order.activate_stop();
        }
        triggered
    }

    /// Record an order refused before it reached the book, so status lookups
    /// still find it
    pub fn archive(&mut self, mut order: Order) {
        order.reject();
        self.history.insert(order);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.resting
            .get(order_id)
            .or_else(|| self.stops.get(order_id))
            .or_else(|| self.history.get(order_id))
    }

    /// Live orders (resting and parked stops) belonging to `account_id`
    pub fn open_orders(&self, account_id: AccountId) -> Vec<OrderId> {
        let mut orders: Vec<&Order> = self
            .resting
            .values()
            .chain(self.stops.orders())
            .filter(|order| order.account_id == account_id)
            .collect();
        orders.sort_by_key(|order| order.sequence());
        orders.into_iter().map(|order| order.id).collect()
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn last_trade_price(&self) -> Option<Price> {
        self.last_trade_price
    }

    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    /// True if the best bid meets or exceeds the best ask
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Get order book snapshot
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        OrderBookSnapshot::with_depth(
            self.symbol.clone(),
            self.bids.depth(depth),
            self.asks.depth(depth),
            self.last_trade_price,
        )
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn next_sequence(&mut self) -> u64 {
        self.sequence_counter += 1;
        self.sequence_counter
    }

    fn opposite(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        }
    }

    fn rest(&mut self, order: Order, price: Price) {
        match order.side {
            Side::Buy => self.bids.insert(order.id, price, order.remaining_quantity()),
            Side::Sell => self.asks.insert(order.id, price, order.remaining_quantity()),
        }
        self.resting.insert(order.id, order);
    }

    fn refuse(&mut self, mut order: Order, reason: OrderRejectReason) -> OrderRejectReason {
        order.reject();
        tracing::debug!(
            symbol = %self.symbol,
            order_id = ?order.id,
            %reason,
            "order refused by book"
        );
        self.history.insert(order);
        reason
    }

    #[cfg(test)]
    fn level_sequences(&self, side: Side) -> Vec<Vec<u64>> {
        let book_side = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        book_side
            .levels()
            .map(|level| {
                level
                    .order_ids()
                    .filter_map(|id| self.resting.get(id).map(|o| o.sequence()))
                    .collect()
            })
            .collect()
    }
}

/// Limit applied while matching; market orders have none
fn limit_price(order: &Order) -> Option<Price> {
    if order.is_market_order() {
        None
    } else {
        order.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, OrderStatus};

    fn limit(account: u64, side: Side, price: i64, quantity: i64) -> Order {
        Order::new(
            OrderId::new(),
            NewOrder::limit(
                AccountId::new(account),
                "BTC-USD",
                side,
                Decimal::from(price),
                Decimal::from(quantity),
            ),
        )
    }

    fn market(account: u64, side: Side, quantity: i64) -> Order {
        Order::new(
            OrderId::new(),
            NewOrder::market(AccountId::new(account), "BTC-USD", side, Decimal::from(quantity)),
        )
    }

    #[test]
    fn test_limit_orders_match_at_maker_price() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 50000, 1)).unwrap();

        let result = book.submit(limit(2, Side::Buy, 50100, 1)).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].price, Decimal::from(50000));
        assert_eq!(result.order.status(), OrderStatus::Filled);
        assert_eq!(result.maker_updates[0].status(), OrderStatus::Filled);

        let snapshot = book.snapshot(10);
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());
        assert_eq!(snapshot.last_trade_price, Some(Decimal::from(50000)));
    }

    #[test]
    fn test_fifo_within_level() {
        let mut book = OrderBook::new("BTC-USD");
        let first = limit(1, Side::Sell, 100, 1);
        let second = limit(2, Side::Sell, 100, 1);
        let first_id = first.id;
        let second_id = second.id;
        book.submit(first).unwrap();
        book.submit(second).unwrap();

        let result = book.submit(limit(3, Side::Buy, 100, 1)).unwrap();
        assert_eq!(result.trades[0].maker_order_id, first_id);
        assert_eq!(book.order(&second_id).map(|o| o.status()), Some(OrderStatus::Open));
    }

    #[test]
    fn test_partial_fill_rests_remainder() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 100, 1)).unwrap();

        let result = book.submit(limit(2, Side::Buy, 101, 3)).unwrap();
        assert_eq!(result.order.status(), OrderStatus::PartiallyFilled);
        assert_eq!(book.best_bid(), Some(Decimal::from(101)));
        assert_eq!(book.snapshot(1).bids, vec![(Decimal::from(101), Decimal::from(2))]);
    }

    #[test]
    fn test_market_remainder_is_cancelled() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 100, 1)).unwrap();
        book.submit(limit(1, Side::Sell, 102, 1)).unwrap();

        let result = book.submit(market(2, Side::Buy, 5)).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.filled_quantity(), Decimal::from(2));
        assert_eq!(result.order.status(), OrderStatus::Cancelled);
        assert_eq!(book.resting_count(), 0);
    }

    #[test]
    fn test_self_trade_rejected_without_fills() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 100, 1)).unwrap();
        book.submit(limit(7, Side::Sell, 101, 1)).unwrap();

        let incoming = limit(7, Side::Buy, 101, 2);
        let id = incoming.id;
        let result = book.submit(incoming);
        assert_eq!(result.unwrap_err(), OrderRejectReason::SelfTradePrevented);
        assert_eq!(book.order(&id).map(|o| o.status()), Some(OrderStatus::Rejected));
        assert_eq!(book.resting_count(), 2);
        assert_eq!(book.last_trade_price(), None);
    }

    #[test]
    fn test_own_order_beyond_quantity_does_not_block() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 100, 1)).unwrap();
        book.submit(limit(7, Side::Sell, 100, 1)).unwrap();

        let result = book.submit(limit(7, Side::Buy, 100, 1)).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].maker_account_id, AccountId::new(1));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut book = OrderBook::new("BTC-USD");
        let order = limit(1, Side::Buy, 100, 1);
        let id = order.id;
        book.submit(order).unwrap();

        let cancelled = book.cancel(&id).unwrap();
        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        assert_eq!(book.cancel(&id), Err(CancelFailReason::AlreadyTerminal));
        assert_eq!(book.cancel(&OrderId::new()), Err(CancelFailReason::NotFound));
        assert!(book.snapshot(5).bids.is_empty());
    }

    #[test]
    fn test_history_window_still_answers_repeated_cancel() {
        let mut book = OrderBook::new("BTC-USD").with_history_capacity(1);
        let ids: Vec<OrderId> = (0..3)
            .map(|i| {
                let order = limit(1, Side::Buy, 100 - i, 1);
                let id = order.id;
                book.submit(order).unwrap();
                book.cancel(&id).unwrap();
                id
            })
            .collect();

        assert!(book.order(&ids[0]).is_none());
        assert_eq!(book.cancel(&ids[0]), Err(CancelFailReason::AlreadyTerminal));
        assert_eq!(book.order(&ids[2]).map(|o| o.status()), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn test_invalid_orders() {
        let mut book = OrderBook::new("BTC-USD")
            .with_tick_size(Decimal::new(5, 1))
            .with_lot_size(Decimal::new(1, 2));

        assert_eq!(
            book.submit(limit(1, Side::Buy, 100, 0)).unwrap_err(),
            OrderRejectReason::InvalidQuantity
        );
        assert_eq!(
            book.submit(limit(1, Side::Buy, -1, 1)).unwrap_err(),
            OrderRejectReason::InvalidPrice
        );

        let mut off_tick = limit(1, Side::Buy, 100, 1);
        off_tick.price = Some(Decimal::new(10003, 2));
        assert_eq!(book.submit(off_tick).unwrap_err(), OrderRejectReason::InvalidPrice);

        let mut off_lot = limit(1, Side::Buy, 100, 1);
        off_lot.quantity = Decimal::new(1005, 3);
        assert_eq!(book.submit(off_lot).unwrap_err(), OrderRejectReason::InvalidQuantity);
    }

    #[test]
    fn test_failed_settlement_stops_matching() {
        let mut book = OrderBook::new("BTC-USD");
        let first = limit(1, Side::Sell, 100, 1);
        let second = limit(2, Side::Sell, 100, 1);
        let second_id = second.id;
        book.submit(first).unwrap();
        book.submit(second).unwrap();

        let mut calls = 0;
        let result = book
            .submit_with(limit(3, Side::Buy, 100, 2), |_fill| {
                calls += 1;
                if calls == 2 {
                    Err("ledger refused")
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.settlement_error, Some("ledger refused"));
        assert_eq!(result.order.status(), OrderStatus::Rejected);
        assert_eq!(book.order(&second_id).map(|o| o.remaining_quantity()), Some(Decimal::ONE));
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_fill_callback_sees_pre_fill_state() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 100, 2)).unwrap();

        let mut seen = Vec::new();
        book.submit_with(limit(2, Side::Buy, 100, 1), |fill| {
            seen.push((fill.maker.filled_quantity(), fill.taker.filled_quantity()));
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(seen, vec![(Decimal::ZERO, Decimal::ZERO)]);
    }

    #[test]
    fn test_stop_orders_trigger_on_last_trade() {
        let mut book = OrderBook::new("BTC-USD");
        let stop = Order::new(
            OrderId::new(),
            NewOrder::stop(
                AccountId::new(9),
                "BTC-USD",
                Side::Sell,
                Decimal::from(95),
                None,
                Decimal::ONE,
            ),
        );
        let stop_id = stop.id;
        let parked = book.submit(stop).unwrap();
        assert!(parked.trades.is_empty());
        assert_eq!(book.stop_count(), 1);
        assert_eq!(book.open_orders(AccountId::new(9)), vec![stop_id]);

        book.submit(limit(1, Side::Buy, 94, 1)).unwrap();
        book.submit(limit(2, Side::Sell, 94, 1)).unwrap();
        assert_eq!(book.last_trade_price(), Some(Decimal::from(94)));

        let triggered = book.take_triggered_stops();
        assert_eq!(triggered.len(), 1);
        assert!(triggered[0].is_market_order());
        assert_eq!(book.stop_count(), 0);
    }

    #[test]
    fn test_cancel_parked_stop() {
        let mut book = OrderBook::new("BTC-USD");
        let stop = Order::new(
            OrderId::new(),
            NewOrder::stop(
                AccountId::new(9),
                "BTC-USD",
                Side::Buy,
                Decimal::from(105),
                Some(Decimal::from(106)),
                Decimal::ONE,
            ),
        );
        let id = stop.id;
        book.submit(stop).unwrap();
        assert!(book.cancel(&id).is_ok());
        assert_eq!(book.cancel(&id), Err(CancelFailReason::AlreadyTerminal));
    }

    #[test]
    fn test_estimate_fill_walks_levels() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Sell, 100, 1)).unwrap();
        book.submit(limit(1, Side::Sell, 110, 2)).unwrap();

        let estimate = book.estimate_fill(Side::Buy, Decimal::from(2), None);
        assert_eq!(estimate.quantity, Decimal::from(2));
        assert_eq!(estimate.notional, Decimal::from(210));
        assert_eq!(estimate.worst_price, Some(Decimal::from(110)));

        let limited = book.estimate_fill(Side::Buy, Decimal::from(5), Some(Decimal::from(105)));
        assert_eq!(limited.quantity, Decimal::ONE);
    }

    #[test]
    fn test_snapshot_spread_and_mid() {
        let mut book = OrderBook::new("BTC-USD");
        book.submit(limit(1, Side::Buy, 50000, 1)).unwrap();
        book.submit(limit(2, Side::Sell, 50100, 2)).unwrap();

        let snapshot = book.snapshot(10);
        assert_eq!(snapshot.best_bid(), Some(Decimal::from(50000)));
        assert_eq!(snapshot.best_ask(), Some(Decimal::from(50100)));
        assert_eq!(snapshot.spread, Some(Decimal::from(100)));
        assert_eq!(snapshot.mid_price, Some(Decimal::from(50050)));
        assert_eq!(snapshot.total_ask_quantity(), Decimal::from(2));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_orders() -> impl Strategy<Value = Vec<(bool, i64, i64, u64)>> {
            prop::collection::vec((any::<bool>(), 90i64..110, 1i64..5, 1u64..5), 1..80)
        }

        proptest! {
            #[test]
            fn prop_book_never_crossed(orders in arb_orders()) {
                let mut book = OrderBook::new("BTC-USD");
                for (is_buy, price, quantity, account) in orders {
                    let side = if is_buy { Side::Buy } else { Side::Sell };
                    let _ = book.submit(limit(account, side, price, quantity));
                    prop_assert!(!book.is_crossed());
                }
            }

            #[test]
            fn prop_levels_keep_arrival_order(orders in arb_orders()) {
                let mut book = OrderBook::new("BTC-USD");
                for (is_buy, price, quantity, account) in orders {
                    let side = if is_buy { Side::Buy } else { Side::Sell };
                    let _ = book.submit(limit(account, side, price, quantity));
                }
                for side in [Side::Buy, Side::Sell] {
                    for level in book.level_sequences(side) {
                        prop_assert!(level.windows(2).all(|w| w[0] < w[1]));
                    }
                }
            }

            #[test]
            fn prop_quantity_conserved(orders in arb_orders()) {
                let mut book = OrderBook::new("BTC-USD");
                let mut submitted = Decimal::ZERO;
                let mut traded = Decimal::ZERO;
                for (is_buy, price, quantity, account) in orders {
                    let side = if is_buy { Side::Buy } else { Side::Sell };
                    if let Ok(result) = book.submit(limit(account, side, price, quantity)) {
                        submitted += Decimal::from(quantity);
                        traded += result.filled_quantity();
                    }
                }
                let snapshot = book.snapshot(usize::MAX);
                let resting = snapshot.total_bid_quantity() + snapshot.total_ask_quantity();
                prop_assert_eq!(resting + traded * Decimal::from(2), submitted);
            }
        }
    }
}
