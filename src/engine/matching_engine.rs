// ============================================================================
// Matching Engine
// Per-symbol order processing: risk checks, matching and settlement
// ============================================================================

use crate::book::{Fill, MatchResult, OrderBook, OrderBookSnapshot};
use crate::domain::{
    AccountId, ExchangeConfig, MarketKind, Order, OrderId, OrderStatus, Side, SymbolConfig, Trade,
};
use crate::errors::{CancelFailReason, LedgerError, OrderRejectReason};
use crate::interfaces::{EventHandler, ExchangeEvent};
use crate::ledger::{Ledger, LedgerEntry, PostingPolicy};
use crate::numeric::{Amount, Price};
use crate::risk::{margin, LiquidationIntent, MarginEngine, OrderCost};
use crate::settlement::{PartyFill, TradeSettler};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Accepted order as it stood once matching finished
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order: Order,
    pub trades: Vec<Trade>,
}

// ============================================================================
// Halt Switch
// ============================================================================

/// Trading halt flag for one symbol, shared by its engine and its handle
#[derive(Clone)]
pub struct HaltSwitch {
    symbol: String,
    halted: Arc<AtomicBool>,
    event_handler: Arc<dyn EventHandler>,
}

impl HaltSwitch {
    pub fn new(symbol: impl Into<String>, event_handler: Arc<dyn EventHandler>) -> Self {
        Self {
            symbol: symbol.into(),
            halted: Arc::new(AtomicBool::new(false)),
            event_handler,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Returns false if the symbol was already halted
    pub fn halt(&self, reason: &str) -> bool {
        if self.halted.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::error!(symbol = %self.symbol, reason, "symbol halted");
        self.event_handler.on_event(ExchangeEvent::SymbolHalted {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Returns false if the symbol was not halted
    pub fn resume(&self) -> bool {
        if !self.halted.swap(false, Ordering::AcqRel) {
            return false;
        }
        tracing::info!(symbol = %self.symbol, "symbol resumed");
        self.event_handler.on_event(ExchangeEvent::SymbolResumed {
            symbol: self.symbol.clone(),
            timestamp: Utc::now(),
        });
        true
    }
}

// ============================================================================
// Matching Engine
// ============================================================================

/// Owns one symbol's book. Every intent for the symbol goes through `submit`,
/// `cancel` or `liquidate` on a single thread, so a fill is settled before the
/// next fill or intent is looked at.
pub struct MatchingEngine {
    config: SymbolConfig,
    book: OrderBook,
    settler: TradeSettler,
    ledger: Arc<Ledger>,
    risk: Arc<MarginEngine>,
    event_handler: Arc<dyn EventHandler>,
    maker_fee_rate: Decimal,
    taker_fee_rate: Decimal,
    /// Amount still locked by each live order
    reservations: HashMap<OrderId, Amount>,
    switch: HaltSwitch,
}

impl MatchingEngine {
    pub fn new(
        config: SymbolConfig,
        exchange: &ExchangeConfig,
        ledger: Arc<Ledger>,
        risk: Arc<MarginEngine>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            book: OrderBook::from_config(&config)
                .with_history_capacity(exchange.order_history_capacity),
            settler: TradeSettler::new(&config, exchange.fee_account),
            switch: HaltSwitch::new(config.symbol.clone(), Arc::clone(&event_handler)),
            config,
            ledger,
            risk,
            event_handler,
            maker_fee_rate: exchange.maker_fee_rate,
            taker_fee_rate: exchange.taker_fee_rate,
            reservations: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn config(&self) -> &SymbolConfig {
        &self.config
    }

    pub fn halt_switch(&self) -> HaltSwitch {
        self.switch.clone()
    }

    pub fn is_halted(&self) -> bool {
        self.switch.is_halted()
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Process an order intent, then any stop orders its trades triggered
    pub fn submit(&mut self, order: Order) -> Result<OrderAck, OrderRejectReason> {
        let result = self.process(order);
        self.run_triggered_stops();
        result
    }

    /// Cancel a live order and release what it still reserves
    pub fn cancel(&mut self, order_id: &OrderId) -> Result<Order, CancelFailReason> {
        let order = self.book.cancel(order_id).inspect_err(|reason| {
            tracing::debug!(symbol = %self.config.symbol, ?order_id, %reason, "cancel failed");
        })?;
        self.release(order.id, order.account_id, order.side);

        tracing::info!(symbol = %self.config.symbol, order_id = ?order.id, "order cancelled");
        self.event_handler.on_event(ExchangeEvent::OrderCancelled {
            order_id: order.id,
            account_id: order.account_id,
            symbol: self.config.symbol.clone(),
            timestamp: Utc::now(),
        });
        Ok(order)
    }

    /// Cancel every resting and parked order of `account_id`
    pub fn cancel_account_orders(&mut self, account_id: AccountId) -> Vec<Order> {
        self.book
            .open_orders(account_id)
            .into_iter()
            .filter_map(|id| self.cancel(&id).ok())
            .collect()
    }

    /// Forced close of a breached position.
    ///
    /// The account's orders on this symbol are cancelled first; if the
    /// position is still past its liquidation price afterwards, it is closed
    /// at market. Returns None when nothing was closed.
    pub fn liquidate(&mut self, intent: LiquidationIntent) -> Option<OrderAck> {
        let outcome = self.force_close(&intent);
        self.risk.finish_liquidation(intent.account_id, &intent.symbol);
        self.run_triggered_stops();
        outcome
    }

    /// Move the mark price and return the positions it pushed past their
    /// liquidation price
    pub fn update_mark_price(&mut self, price: Price) -> Vec<LiquidationIntent> {
        self.risk.set_mark_price(&self.config.symbol, price);
        self.evaluate_liquidations()
    }

    pub fn evaluate_liquidations(&self) -> Vec<LiquidationIntent> {
        if self.config.kind != MarketKind::Perpetual {
            return Vec::new();
        }
        self.risk.evaluate_liquidations(Some(&self.config.symbol))
    }

    /// Accounts with a cross position on this symbol
    pub fn cross_accounts(&self) -> Vec<AccountId> {
        if self.config.kind != MarketKind::Perpetual {
            return Vec::new();
        }
        self.risk.cross_accounts(&self.config.symbol)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        self.book.snapshot(depth)
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.book.order(order_id).cloned()
    }

    pub fn open_orders(&self, account_id: AccountId) -> Vec<OrderId> {
        self.book.open_orders(account_id)
    }

    /// Amount an order still holds locked
    pub fn reserved(&self, order_id: &OrderId) -> Amount {
        self.reservations.get(order_id).copied().unwrap_or_default()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn process(&mut self, mut order: Order) -> Result<OrderAck, OrderRejectReason> {
        if self.switch.is_halted() {
            return Err(self.reject(order, OrderRejectReason::SymbolHalted));
        }
        let checked = self
            .book
            .validate(&order)
            .and_then(|()| self.risk.check_terms(&self.config, &order));
        if let Err(reason) = checked {
            return Err(self.reject(order, reason));
        }

        if order.is_stop_order() {
            if !self.book.would_trigger(&order) {
                return self.park(order);
            }
            order.activate_stop();
        }

        if self.book.would_self_trade(&order) {
            return Err(self.reject(order, OrderRejectReason::SelfTradePrevented));
        }

        let cost = self.cost(&order);
        let reservation = match self
            .risk
            .validate(&self.config, &order, cost, self.taker_fee_rate)
        {
            Ok(reservation) => reservation,
            Err(reason) => return Err(self.reject(order, reason)),
        };
        if reservation.amount > Decimal::ZERO {
            let lock = LedgerEntry::lock(
                order.account_id,
                reservation.asset.as_str(),
                reservation.amount,
            );
            if let Err(err) = self.ledger.post_entries(&[lock], PostingPolicy::Strict) {
                tracing::debug!(order_id = ?order.id, %err, "reservation refused");
                return Err(self.reject(order, OrderRejectReason::InsufficientMargin));
            }
        }
        self.reservations.insert(order.id, reservation.amount);

        self.event_handler.on_event(ExchangeEvent::OrderAccepted {
            order_id: order.id,
            account_id: order.account_id,
            symbol: self.config.symbol.clone(),
            timestamp: Utc::now(),
        });
        self.execute(order)
    }

    /// Stops wait in the trigger watch without reserving anything
    fn park(&mut self, order: Order) -> Result<OrderAck, OrderRejectReason> {
        let (order_id, account_id) = (order.id, order.account_id);
        let result = self.book.submit(order).inspect_err(|reason| {
            self.emit_rejected(order_id, account_id, *reason);
        })?;

        self.event_handler.on_event(ExchangeEvent::OrderAccepted {
            order_id,
            account_id,
            symbol: self.config.symbol.clone(),
            timestamp: Utc::now(),
        });
        Ok(OrderAck {
            order: result.order,
            trades: Vec::new(),
        })
    }

    fn execute(&mut self, order: Order) -> Result<OrderAck, OrderRejectReason> {
        let (order_id, account_id, side) = (order.id, order.account_id, order.side);

        let outcome = {
            let mut settlement = Settlement {
                kind: self.config.kind,
                symbol: &self.config.symbol,
                settler: &self.settler,
                ledger: &self.ledger,
                risk: &self.risk,
                reservations: &mut self.reservations,
                maker_fee_rate: self.maker_fee_rate,
                taker_fee_rate: self.taker_fee_rate,
            };
            self.book.submit_with(order, |fill| settlement.settle(fill))
        };

        match outcome {
            Ok(result) => self.finish(result),
            Err(reason) => {
                self.release(order_id, account_id, side);
                self.emit_rejected(order_id, account_id, reason);
                Err(reason)
            },
        }
    }

    fn finish(&mut self, result: MatchResult<LedgerError>) -> Result<OrderAck, OrderRejectReason> {
        let MatchResult {
            order,
            trades,
            maker_updates,
            settlement_error,
        } = result;
        let symbol = self.config.symbol.clone();
        let now = Utc::now();
        let mut events = Vec::with_capacity(trades.len() + maker_updates.len() + 1);

        events.extend(
            trades
                .iter()
                .map(|trade| ExchangeEvent::TradeExecuted { trade: trade.clone() }),
        );
        for maker in maker_updates.iter().filter(|m| m.is_terminal()) {
            self.release(maker.id, maker.account_id, maker.side);
            events.push(ExchangeEvent::OrderFilled {
                order_id: maker.id,
                account_id: maker.account_id,
                symbol: symbol.clone(),
                timestamp: now,
            });
        }
        if let Some(last) = trades.last() {
            self.risk.set_mark_price(&symbol, last.price);
        }

        if let Some(err) = settlement_error {
            self.release(order.id, order.account_id, order.side);
            events.push(ExchangeEvent::OrderRejected {
                order_id: order.id,
                account_id: order.account_id,
                symbol: symbol.clone(),
                reason: OrderRejectReason::InsufficientMargin,
                timestamp: now,
            });
            self.event_handler.on_events(events);
            self.switch.halt(&format!("settlement failed: {}", err));
            return Err(OrderRejectReason::InsufficientMargin);
        }

        match order.status() {
            OrderStatus::Filled => {
                self.release(order.id, order.account_id, order.side);
                events.push(ExchangeEvent::OrderFilled {
                    order_id: order.id,
                    account_id: order.account_id,
                    symbol,
                    timestamp: now,
                });
            },
            OrderStatus::Cancelled | OrderStatus::Rejected => {
                self.release(order.id, order.account_id, order.side);
                events.push(ExchangeEvent::OrderCancelled {
                    order_id: order.id,
                    account_id: order.account_id,
                    symbol,
                    timestamp: now,
                });
            },
            OrderStatus::Open | OrderStatus::PartiallyFilled => {
                events.push(ExchangeEvent::OrderRested {
                    order_id: order.id,
                    account_id: order.account_id,
                    symbol,
                    price: order.price.unwrap_or_default(),
                    quantity: order.remaining_quantity(),
                    timestamp: now,
                });
            },
        }

        self.event_handler.on_events(events);
        Ok(OrderAck { order, trades })
    }

    /// Liquidity the order is expected to take: crossing levels at their own
    /// prices, any limit remainder at the limit price
    fn cost(&self, order: &Order) -> OrderCost {
        let remaining = order.remaining_quantity();
        let limit = if order.is_market_order() { None } else { order.price };
        let crossing = self.book.estimate_fill(order.side, remaining, limit);

        match limit {
            Some(price) => OrderCost {
                quantity: remaining,
                notional: crossing.notional + (remaining - crossing.quantity) * price,
            },
            None => OrderCost {
                quantity: crossing.quantity,
                notional: crossing.notional,
            },
        }
    }

    fn force_close(&mut self, intent: &LiquidationIntent) -> Option<OrderAck> {
        let account_id = intent.account_id;
        self.risk
            .position(account_id, &self.config.symbol)
            .filter(|p| !p.is_flat())?;

        let cancelled = self.cancel_account_orders(account_id);
        if !cancelled.is_empty() {
            tracing::info!(
                account = %account_id,
                symbol = %self.config.symbol,
                count = cancelled.len(),
                "cancelled orders ahead of forced close"
            );
        }

        let position = self
            .risk
            .position(account_id, &self.config.symbol)
            .filter(|p| !p.is_flat())?;
        let liquidation_price = self.risk.liquidation_price(account_id, &self.config.symbol);
        let breached = liquidation_price
            .is_some_and(|liq| margin::is_breached(position.is_long(), position.mark_price, liq));
        if !breached {
            tracing::info!(
                account = %account_id,
                symbol = %self.config.symbol,
                "position recovered before forced close"
            );
            return None;
        }

        self.event_handler.on_event(ExchangeEvent::LiquidationTriggered {
            account_id,
            symbol: self.config.symbol.clone(),
            quantity: position.abs_size(),
            mark_price: position.mark_price,
            liquidation_price: liquidation_price.unwrap_or(intent.liquidation_price),
            timestamp: Utc::now(),
        });

        let order = LiquidationIntent {
            side: position.closing_side(),
            quantity: position.abs_size(),
            leverage: position.leverage,
            margin_mode: position.margin_mode,
            ..intent.clone()
        }
        .to_order();

        match self.process(order) {
            Ok(ack) => Some(ack),
            Err(reason) => {
                tracing::warn!(
                    account = %account_id,
                    symbol = %self.config.symbol,
                    %reason,
                    "forced close refused"
                );
                None
            },
        }
    }

    fn run_triggered_stops(&mut self) {
        loop {
            let triggered = self.book.take_triggered_stops();
            if triggered.is_empty() {
                break;
            }
            for order in triggered {
                tracing::info!(
                    symbol = %self.config.symbol,
                    order_id = ?order.id,
                    "stop triggered"
                );
                self.event_handler.on_event(ExchangeEvent::StopTriggered {
                    order_id: order.id,
                    account_id: order.account_id,
                    symbol: self.config.symbol.clone(),
                    timestamp: Utc::now(),
                });
                if let Err(reason) = self.process(order) {
                    tracing::debug!(
                        symbol = %self.config.symbol,
                        %reason,
                        "triggered stop refused"
                    );
                }
            }
        }
    }

    /// Unlock whatever the order still reserves. A refused unlock keeps the
    /// reservation on record and halts the symbol.
    fn release(&mut self, order_id: OrderId, account_id: AccountId, side: Side) {
        let Some(amount) = self.reservations.remove(&order_id) else {
            return;
        };
        if amount <= Decimal::ZERO {
            return;
        }
        let unlock = LedgerEntry::unlock(account_id, self.settler.reservation_asset(side), amount);
        if let Err(err) = self.ledger.post_entries(&[unlock], PostingPolicy::Strict) {
            tracing::error!(
                account = %account_id,
                ?order_id,
                %amount,
                %err,
                "failed to release reservation"
            );
            self.reservations.insert(order_id, amount);
            self.switch.halt(&format!("reservation release failed: {}", err));
        }
    }

    fn reject(&mut self, order: Order, reason: OrderRejectReason) -> OrderRejectReason {
        tracing::warn!(
            symbol = %self.config.symbol,
            order_id = ?order.id,
            account = %order.account_id,
            %reason,
            "order rejected"
        );
        self.emit_rejected(order.id, order.account_id, reason);
        self.book.archive(order);
        reason
    }

    fn emit_rejected(&self, order_id: OrderId, account_id: AccountId, reason: OrderRejectReason) {
        self.event_handler.on_event(ExchangeEvent::OrderRejected {
            order_id,
            account_id,
            symbol: self.config.symbol.clone(),
            reason,
            timestamp: Utc::now(),
        });
    }
}

// ============================================================================
// Fill Settlement
// ============================================================================

/// Borrowed view of the engine used to settle fills while the book is matching
struct Settlement<'a> {
    kind: MarketKind,
    symbol: &'a str,
    settler: &'a TradeSettler,
    ledger: &'a Ledger,
    risk: &'a MarginEngine,
    reservations: &'a mut HashMap<OrderId, Amount>,
    maker_fee_rate: Decimal,
    taker_fee_rate: Decimal,
}

impl Settlement<'_> {
    /// Post the trade's ledger batch, then apply it to both positions
    fn settle(&mut self, fill: Fill<'_>) -> Result<(), LedgerError> {
        let Fill { trade, maker, taker } = fill;

        let maker_party = self.party(trade, maker, self.maker_fee_rate);
        let taker_party = self.party(trade, taker, self.taker_fee_rate);
        let plan = self.settler.plan(trade, &maker_party, &taker_party);
        self.ledger.post_entries(&plan.entries, plan.policy)?;

        self.consume(maker.id, plan.maker_released);
        self.consume(taker.id, plan.taker_released);

        if self.kind == MarketKind::Perpetual {
            for order in [maker, taker] {
                self.risk.apply_fill(
                    order.account_id,
                    self.symbol,
                    order.side,
                    trade.quantity,
                    trade.price,
                    order.leverage,
                    order.margin_mode,
                );
            }
        }
        Ok(())
    }

    fn party(&self, trade: &Trade, order: &Order, fee_rate: Decimal) -> PartyFill {
        let effect = (self.kind == MarketKind::Perpetual).then(|| {
            self.risk.preview_fill(
                order.account_id,
                self.symbol,
                order.side,
                trade.quantity,
                trade.price,
                order.leverage,
                order.margin_mode,
            )
        });
        PartyFill {
            account_id: order.account_id,
            side: order.side,
            reserved: self.reservations.get(&order.id).copied().unwrap_or_default(),
            remaining: order.remaining_quantity(),
            fee_rate,
            effect,
        }
    }

    fn consume(&mut self, order_id: OrderId, released: Amount) {
        if let Some(reserved) = self.reservations.get_mut(&order_id) {
            *reserved = (*reserved - released).max(Decimal::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarginMode, NewOrder};
    use crate::interfaces::{ChannelEventHandler, NoOpEventHandler};

    const A: AccountId = AccountId::new(1);
    const B: AccountId = AccountId::new(2);
    const C: AccountId = AccountId::new(3);

    fn engine_with(
        config: SymbolConfig,
        handler: Arc<dyn EventHandler>,
    ) -> (MatchingEngine, Arc<Ledger>) {
        let exchange =
            ExchangeConfig::new(vec![config.clone()]).with_fees(Decimal::ZERO, Decimal::ZERO);
        let ledger = Arc::new(Ledger::default());
        let risk = Arc::new(MarginEngine::new(Arc::clone(&ledger), &exchange.symbols));
        let engine = MatchingEngine::new(config, &exchange, Arc::clone(&ledger), risk, handler);
        (engine, ledger)
    }

    fn spot() -> (MatchingEngine, Arc<Ledger>) {
        engine_with(SymbolConfig::spot("BTC-USD", "BTC", "USD"), Arc::new(NoOpEventHandler))
    }

    fn perp() -> (MatchingEngine, Arc<Ledger>) {
        engine_with(
            SymbolConfig::perpetual("BTC-PERP", "BTC", "USD", 20),
            Arc::new(NoOpEventHandler),
        )
    }

    fn order(request: NewOrder) -> Order {
        Order::new(OrderId::new(), request)
    }

    fn limit(account: AccountId, symbol: &str, side: Side, price: i64, quantity: Decimal) -> Order {
        order(NewOrder::limit(account, symbol, side, Decimal::from(price), quantity))
    }

    #[test]
    fn test_spot_scenario() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "USD", Decimal::from(10_000)).unwrap();
        ledger.deposit(B, "BTC", Decimal::ONE).unwrap();
        let tenth = Decimal::new(1, 1);

        let too_big = engine.submit(limit(A, "BTC-USD", Side::Buy, 50000, Decimal::ONE));
        assert_eq!(too_big.unwrap_err(), OrderRejectReason::InsufficientMargin);
        assert_eq!(ledger.balance(A, "USD").available, Decimal::from(10_000));

        let bid = engine.submit(limit(A, "BTC-USD", Side::Buy, 50000, tenth)).unwrap();
        assert_eq!(bid.order.status(), OrderStatus::Open);
        assert_eq!(ledger.balance(A, "USD").locked, Decimal::from(5000));

        let ask = engine.submit(limit(B, "BTC-USD", Side::Sell, 50000, tenth)).unwrap();
        assert_eq!(ask.trades.len(), 1);
        assert_eq!(ask.trades[0].price, Decimal::from(50000));
        assert_eq!(ask.order.status(), OrderStatus::Filled);
        assert_eq!(engine.order(&bid.order.id).unwrap().status(), OrderStatus::Filled);

        let a_usd = ledger.balance(A, "USD");
        assert_eq!(a_usd.available, Decimal::from(5000));
        assert_eq!(a_usd.locked, Decimal::ZERO);
        assert_eq!(ledger.balance(A, "BTC").available, tenth);
        assert_eq!(ledger.balance(B, "BTC").available, Decimal::new(9, 1));
        assert_eq!(ledger.balance(B, "USD").available, Decimal::from(5000));
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_rejected_order_is_queryable() {
        let (mut engine, _) = spot();
        let rejected = limit(A, "BTC-USD", Side::Buy, 100, Decimal::ONE);
        let id = rejected.id;
        assert!(engine.submit(rejected).is_err());
        assert_eq!(engine.order(&id).unwrap().status(), OrderStatus::Rejected);
    }

    #[test]
    fn test_self_trade_prevented_without_ledger_effect() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "USD", Decimal::from(1000)).unwrap();
        ledger.deposit(A, "BTC", Decimal::ONE).unwrap();

        engine.submit(limit(A, "BTC-USD", Side::Sell, 100, Decimal::ONE)).unwrap();
        let before = ledger.balance(A, "USD");

        let result = engine.submit(limit(A, "BTC-USD", Side::Buy, 100, Decimal::ONE));
        assert_eq!(result.unwrap_err(), OrderRejectReason::SelfTradePrevented);
        assert_eq!(ledger.balance(A, "USD"), before);
        assert_eq!(engine.book().resting_count(), 1);
    }

    #[test]
    fn test_cancel_releases_reservation_once() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "USD", Decimal::from(1000)).unwrap();

        let ack = engine.submit(limit(A, "BTC-USD", Side::Buy, 100, Decimal::from(5))).unwrap();
        assert_eq!(ledger.balance(A, "USD").locked, Decimal::from(500));

        engine.cancel(&ack.order.id).unwrap();
        assert_eq!(ledger.balance(A, "USD").available, Decimal::from(1000));

        let postings = ledger.posting_count();
        assert_eq!(
            engine.cancel(&ack.order.id).unwrap_err(),
            CancelFailReason::AlreadyTerminal
        );
        assert_eq!(ledger.posting_count(), postings);
        assert_eq!(
            engine.cancel(&OrderId::new()).unwrap_err(),
            CancelFailReason::NotFound
        );
    }

    #[test]
    fn test_refused_release_keeps_reservation_and_halts() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "USD", Decimal::from(1000)).unwrap();
        let ack = engine.submit(limit(A, "BTC-USD", Side::Buy, 100, Decimal::from(5))).unwrap();

        // Lock drained outside the engine, so the order's unlock cannot post
        ledger
            .post_entries(
                &[LedgerEntry::unlock(A, "USD", Decimal::from(500))],
                PostingPolicy::Strict,
            )
            .unwrap();

        engine.cancel(&ack.order.id).unwrap();
        assert_eq!(engine.reserved(&ack.order.id), Decimal::from(500));
        assert!(engine.is_halted());
        assert_eq!(ledger.balance(A, "USD").available, Decimal::from(1000));
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_partial_fill_keeps_remaining_reservation() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "USD", Decimal::from(1000)).unwrap();
        ledger.deposit(B, "BTC", Decimal::ONE).unwrap();

        let bid = engine.submit(limit(A, "BTC-USD", Side::Buy, 100, Decimal::from(4))).unwrap();
        engine.submit(limit(B, "BTC-USD", Side::Sell, 100, Decimal::ONE)).unwrap();

        assert_eq!(engine.reserved(&bid.order.id), Decimal::from(300));
        assert_eq!(ledger.balance(A, "USD").locked, Decimal::from(300));
        assert_eq!(ledger.balance(A, "USD").total, Decimal::from(900));
    }

    #[test]
    fn test_market_remainder_cancelled_and_released() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "USD", Decimal::from(1000)).unwrap();
        ledger.deposit(B, "BTC", Decimal::ONE).unwrap();
        engine.submit(limit(B, "BTC-USD", Side::Sell, 100, Decimal::ONE)).unwrap();

        let ack = engine
            .submit(order(NewOrder::market(A, "BTC-USD", Side::Buy, Decimal::from(3))))
            .unwrap();
        assert_eq!(ack.trades.len(), 1);
        assert_eq!(ack.order.status(), OrderStatus::Cancelled);
        assert_eq!(ledger.balance(A, "USD").available, Decimal::from(900));
        assert_eq!(ledger.balance(A, "USD").locked, Decimal::ZERO);
    }

    #[test]
    fn test_stop_triggers_after_trade() {
        let (mut engine, ledger) = spot();
        ledger.deposit(A, "BTC", Decimal::from(2)).unwrap();
        ledger.deposit(B, "USD", Decimal::from(1000)).unwrap();
        ledger.deposit(C, "USD", Decimal::from(1000)).unwrap();

        let stop = NewOrder::stop(A, "BTC-USD", Side::Sell, Decimal::from(95), None, Decimal::ONE);
        let stop = engine.submit(order(stop)).unwrap();
        assert_eq!(engine.book().stop_count(), 1);
        assert_eq!(ledger.balance(A, "BTC").locked, Decimal::ZERO);

        engine.submit(limit(B, "BTC-USD", Side::Buy, 95, Decimal::ONE)).unwrap();
        engine.submit(limit(C, "BTC-USD", Side::Buy, 90, Decimal::ONE)).unwrap();
        engine.submit(limit(A, "BTC-USD", Side::Sell, 95, Decimal::ONE)).unwrap();

        // Last trade at 95 fires the stop, which sells into C's bid
        assert_eq!(engine.book().stop_count(), 0);
        assert_eq!(engine.order(&stop.order.id).unwrap().status(), OrderStatus::Filled);
        assert_eq!(ledger.balance(C, "BTC").available, Decimal::ONE);
        assert_eq!(engine.book().last_trade_price(), Some(Decimal::from(90)));
    }

    #[test]
    fn test_halted_symbol_rejects() {
        let handler = Arc::new(ChannelEventHandler::new());
        let events = handler.subscribe_all();
        let (mut engine, _) = engine_with(SymbolConfig::spot("BTC-USD", "BTC", "USD"), handler);

        assert!(engine.halt_switch().halt("maintenance"));
        assert!(!engine.halt_switch().halt("again"));
        let result = engine.submit(limit(A, "BTC-USD", Side::Buy, 100, Decimal::ONE));
        assert_eq!(result.unwrap_err(), OrderRejectReason::SymbolHalted);

        assert!(engine.halt_switch().resume());
        assert!(!engine.is_halted());
        let kinds: Vec<_> = events.try_iter().collect();
        assert!(matches!(kinds[0], ExchangeEvent::SymbolHalted { .. }));
        assert!(matches!(
            kinds[1],
            ExchangeEvent::OrderRejected {
                reason: OrderRejectReason::SymbolHalted,
                ..
            }
        ));
        assert!(matches!(kinds[2], ExchangeEvent::SymbolResumed { .. }));
    }

    fn open_long(engine: &mut MatchingEngine, ledger: &Ledger) {
        ledger.deposit(A, "USD", Decimal::from(5000)).unwrap();
        ledger.deposit(B, "USD", Decimal::from(5000)).unwrap();
        let long = NewOrder::limit(A, "BTC-PERP", Side::Buy, Decimal::from(50000), Decimal::ONE)
            .with_leverage(10)
            .with_margin_mode(MarginMode::Isolated);
        let short = NewOrder::limit(B, "BTC-PERP", Side::Sell, Decimal::from(50000), Decimal::ONE)
            .with_leverage(10)
            .with_margin_mode(MarginMode::Isolated);
        engine.submit(order(long)).unwrap();
        engine.submit(order(short)).unwrap();
    }

    #[test]
    fn test_perpetual_fill_locks_position_margin() {
        let (mut engine, ledger) = perp();
        open_long(&mut engine, &ledger);

        let a = ledger.balance(A, "USD");
        assert_eq!(a.locked, Decimal::from(5000));
        assert_eq!(a.available, Decimal::ZERO);
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_losing_close_is_checked_before_it_rests() {
        let (mut engine, ledger) = perp();
        open_long(&mut engine, &ledger);

        let close = || {
            order(
                NewOrder::limit(A, "BTC-PERP", Side::Sell, Decimal::from(40000), Decimal::ONE)
                    .with_leverage(10)
                    .with_margin_mode(MarginMode::Isolated),
            )
        };
        assert_eq!(
            engine.submit(close()).unwrap_err(),
            OrderRejectReason::InsufficientMargin
        );

        ledger.deposit(C, "USD", Decimal::from(100_000)).unwrap();
        let bid = NewOrder::limit(C, "BTC-PERP", Side::Buy, Decimal::from(40000), Decimal::ONE)
            .with_leverage(10);
        let ack = engine.submit(order(bid)).unwrap();
        assert!(ack.trades.is_empty());
        assert!(!engine.is_halted());

        // With the loss funded the close settles against the resting bid
        ledger.deposit(A, "USD", Decimal::from(5000)).unwrap();
        let ack = engine.submit(close()).unwrap();
        assert_eq!(ack.trades.len(), 1);
        assert!(!engine.is_halted());
        assert_eq!(ledger.balance(A, "USD").total, Decimal::ZERO);
        assert!(engine.risk.position(A, "BTC-PERP").is_none());
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_liquidation_at_exact_price() {
        let (mut engine, ledger) = perp();
        open_long(&mut engine, &ledger);

        assert!(engine.update_mark_price(Decimal::from(45001)).is_empty());
        let intents = engine.update_mark_price(Decimal::from(45000));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].liquidation_price, Decimal::from(45000));

        ledger.deposit(C, "USD", Decimal::from(4500)).unwrap();
        let bid = NewOrder::limit(C, "BTC-PERP", Side::Buy, Decimal::from(45000), Decimal::ONE)
            .with_leverage(10);
        engine.submit(order(bid)).unwrap();

        let ack = engine.liquidate(intents[0].clone()).unwrap();
        assert!(ack.order.liquidation);
        assert_eq!(ack.trades.len(), 1);
        assert!(ack.trades[0].liquidation);

        let a = ledger.balance(A, "USD");
        assert_eq!(a.total, Decimal::ZERO);
        assert_eq!(ledger.balance(AccountId::INSURANCE_FUND, "USD").total, Decimal::ZERO);
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_liquidation_shortfall_hits_insurance_fund() {
        let (mut engine, ledger) = perp();
        open_long(&mut engine, &ledger);

        let intents = engine.update_mark_price(Decimal::from(44000));
        ledger.deposit(C, "USD", Decimal::from(4400)).unwrap();
        let bid = NewOrder::limit(C, "BTC-PERP", Side::Buy, Decimal::from(44000), Decimal::ONE)
            .with_leverage(10);
        engine.submit(order(bid)).unwrap();

        engine.liquidate(intents[0].clone()).unwrap();
        assert_eq!(ledger.balance(A, "USD").total, Decimal::ZERO);
        assert_eq!(
            ledger.balance(AccountId::INSURANCE_FUND, "USD").total,
            Decimal::from(-1000)
        );
    }

    #[test]
    fn test_recovered_position_is_not_closed() {
        let (mut engine, ledger) = perp();
        open_long(&mut engine, &ledger);

        let intents = engine.update_mark_price(Decimal::from(45000));
        engine.update_mark_price(Decimal::from(48000));
        assert!(engine.liquidate(intents[0].clone()).is_none());
        assert!(!engine.risk.is_liquidating(A, "BTC-PERP"));
    }
}
