// ============================================================================
// Exchange
// Facade routing requests to symbol workers, the ledger and the finality
// tracker
// ============================================================================

use super::liquidation_monitor::{LiquidationMonitor, LiquidationRouter};
use super::matching_engine::{MatchingEngine, OrderAck};
use super::worker::SymbolHandle;
use crate::book::OrderBookSnapshot;
use crate::domain::{
    AccountId, Balance, Deposit, DepositId, ExchangeConfig, NewOrder, Order, OrderId, Position,
};
use crate::errors::{CancelFailReason, ExchangeError, ExchangeResult};
use crate::interfaces::{EventHandler, ExchangeEvent};
use crate::ledger::Ledger;
use crate::numeric::{Amount, Price};
use crate::risk::MarginEngine;
use crate::settlement::{Block, DepositEvent, FinalityTracker};
use crate::utils;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Running exchange: one worker thread per symbol plus the shared ledger,
/// margin engine and finality tracker
pub struct Exchange {
    config: ExchangeConfig,
    ledger: Arc<Ledger>,
    risk: Arc<MarginEngine>,
    finality: FinalityTracker,
    symbols: SkipMap<String, SymbolHandle>,
    /// Symbol of recently handed out order ids
    routes: SkipMap<OrderId, String>,
    /// Route insertion order, oldest evicted first
    route_arrival: Mutex<VecDeque<OrderId>>,
    router: LiquidationRouter,
    monitor: Mutex<Option<LiquidationMonitor>>,
}

impl Exchange {
    /// Validate `config` and start a worker per symbol
    pub fn start(
        config: ExchangeConfig,
        event_handler: Arc<dyn EventHandler>,
    ) -> ExchangeResult<Self> {
        config.validate().map_err(ExchangeError::InvalidConfig)?;

        let ledger = Arc::new(Ledger::new(config.insurance_fund_account));
        let risk = Arc::new(MarginEngine::new(Arc::clone(&ledger), &config.symbols));
        let finality = FinalityTracker::new(
            Arc::clone(&ledger),
            config.confirmations.clone(),
            Arc::clone(&event_handler),
        )
        .with_retention(config.finality_retention_blocks);
        let router = LiquidationRouter::new(Arc::clone(&risk));

        let cores = if config.pin_workers {
            utils::assign_worker_cores(&utils::available_cores(), config.symbols.len())
        } else {
            Vec::new()
        };

        let symbols = SkipMap::new();
        for (index, symbol_config) in config.symbols.iter().enumerate() {
            let engine = MatchingEngine::new(
                symbol_config.clone(),
                &config,
                Arc::clone(&ledger),
                Arc::clone(&risk),
                Arc::clone(&event_handler),
            );
            let core = cores.get(index).copied();
            let handle = SymbolHandle::spawn(engine, core, Some(router.clone()))?;
            router.register(symbol_config.symbol.clone(), handle.liquidation_sender());
            symbols.insert(symbol_config.symbol.clone(), handle);
        }

        let monitor = if config.liquidation_interval_ms > 0 {
            let period = Duration::from_millis(config.liquidation_interval_ms);
            let monitor = LiquidationMonitor::start(router.clone(), period).map_err(|err| {
                let message = format!("failed to start liquidation monitor: {}", err);
                ExchangeError::InvalidConfig(message)
            })?;
            Some(monitor)
        } else {
            None
        };

        tracing::info!(symbols = config.symbols.len(), "exchange started");
        Ok(Self {
            config,
            ledger,
            risk,
            finality,
            symbols,
            routes: SkipMap::new(),
            route_arrival: Mutex::new(VecDeque::new()),
            router,
            monitor: Mutex::new(monitor),
        })
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|entry| entry.key().clone()).collect()
    }

    // ========================================================================
    // Orders
    // ========================================================================

    pub fn submit_order(&self, request: NewOrder) -> ExchangeResult<OrderAck> {
        let handle = self.handle(&request.symbol)?;
        let order = Order::new(OrderId::new(), request);
        self.remember_route(order.id, &order.symbol);
        handle.value().submit(order)?.map_err(ExchangeError::from)
    }

    /// Cancel through the order's symbol worker. An id whose route was
    /// evicted is offered to every worker in turn.
    pub fn cancel_order(&self, order_id: OrderId) -> ExchangeResult<Order> {
        let cancel_failed =
            |reason: CancelFailReason| ExchangeError::CancelFailed { order_id, reason };
        if let Some(symbol) = self.route(&order_id) {
            return self.handle(&symbol)?.value().cancel(order_id)?.map_err(cancel_failed);
        }

        for entry in self.symbols.iter() {
            match entry.value().cancel(order_id)? {
                Ok(order) => return Ok(order),
                Err(CancelFailReason::NotFound) => continue,
                Err(reason) => return Err(cancel_failed(reason)),
            }
        }
        Err(cancel_failed(CancelFailReason::NotFound))
    }

    /// Current state of an order; None if no worker knows the id
    pub fn order_status(&self, order_id: OrderId) -> ExchangeResult<Option<Order>> {
        if let Some(symbol) = self.route(&order_id) {
            return self.handle(&symbol)?.value().order_status(order_id);
        }
        for entry in self.symbols.iter() {
            if let Some(order) = entry.value().order_status(order_id)? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    pub fn order_book_snapshot(
        &self,
        symbol: &str,
        depth: usize,
    ) -> ExchangeResult<OrderBookSnapshot> {
        self.handle(symbol)?.value().snapshot(depth)
    }

    // ========================================================================
    // Margin
    // ========================================================================

    pub fn positions(&self, account_id: AccountId) -> Vec<Position> {
        self.risk.positions(account_id)
    }

    pub fn liquidation_price(&self, account_id: AccountId, symbol: &str) -> Option<Price> {
        self.risk.liquidation_price(account_id, symbol)
    }

    /// Set the mark price of `symbol`. Returns how many forced closes it
    /// enqueued on that symbol's worker.
    pub fn update_mark_price(&self, symbol: &str, price: Price) -> ExchangeResult<usize> {
        self.handle(symbol)?.value().update_mark_price(price)
    }

    /// Sweep every position now; returns how many forced closes were enqueued
    pub fn evaluate_liquidations(&self) -> usize {
        self.router.sweep(None)
    }

    // ========================================================================
    // Ledger
    // ========================================================================

    pub fn balances(&self, account_id: AccountId) -> HashMap<String, Balance> {
        self.ledger.balances(account_id)
    }

    pub fn balance(&self, account_id: AccountId, asset: &str) -> Balance {
        self.ledger.balance(account_id, asset)
    }

    /// Deposits seen on chain but not yet final
    pub fn incoming(&self, account_id: AccountId) -> HashMap<String, Amount> {
        self.ledger.incoming(account_id)
    }

    /// Credit funds directly, bypassing chain tracking
    pub fn deposit(
        &self,
        account_id: AccountId,
        asset: &str,
        amount: Amount,
    ) -> ExchangeResult<()> {
        self.ledger.deposit(account_id, asset, amount)?;
        tracing::info!(account = %account_id, asset, %amount, "funds credited");
        Ok(())
    }

    pub fn withdraw(
        &self,
        account_id: AccountId,
        asset: &str,
        amount: Amount,
    ) -> ExchangeResult<()> {
        self.ledger.withdraw(account_id, asset, amount)?;
        tracing::info!(account = %account_id, asset, %amount, "funds withdrawn");
        Ok(())
    }

    pub fn is_frozen(&self, account_id: AccountId) -> bool {
        self.ledger.is_frozen(account_id)
    }

    pub fn check_invariants(&self) -> bool {
        self.ledger.check_invariants()
    }

    // ========================================================================
    // Chain Finality
    // ========================================================================

    pub fn on_block(&self, block: Block) -> ExchangeResult<Vec<ExchangeEvent>> {
        self.finality.on_block(block)
    }

    pub fn on_deposit(&self, event: DepositEvent) -> ExchangeResult<Deposit> {
        self.finality.on_deposit(event)
    }

    /// The deposit, or `ReorgInvalidated` if a reorg orphaned it
    pub fn deposit_status(&self, deposit_id: &DepositId) -> ExchangeResult<Deposit> {
        self.finality.valid_deposit(deposit_id)
    }

    pub fn deposits(&self, account_id: AccountId) -> Vec<Deposit> {
        self.finality.deposits_for(account_id)
    }

    pub fn unfreeze_account(&self, account_id: AccountId) {
        self.finality.unfreeze_account(account_id);
    }

    pub fn finality(&self) -> &FinalityTracker {
        &self.finality
    }

    // ========================================================================
    // Trading Halts
    // ========================================================================

    /// Returns false if the symbol was already halted
    pub fn halt_symbol(&self, symbol: &str, reason: &str) -> ExchangeResult<bool> {
        Ok(self.handle(symbol)?.value().halt(reason))
    }

    /// Returns false if the symbol was not halted
    pub fn resume_symbol(&self, symbol: &str) -> ExchangeResult<bool> {
        Ok(self.handle(symbol)?.value().resume())
    }

    pub fn is_halted(&self, symbol: &str) -> ExchangeResult<bool> {
        Ok(self.handle(symbol)?.value().is_halted())
    }

    /// Halt every symbol and suspend withdrawals; returns how many symbols
    /// were running
    pub fn halt_all(&self, reason: &str) -> usize {
        tracing::warn!(reason, "halting all symbols and suspending withdrawals");
        self.ledger.suspend_withdrawals();
        self.symbols
            .iter()
            .filter(|entry| entry.value().halt(reason))
            .count()
    }

    /// Resume every symbol and withdrawals; returns how many symbols were
    /// halted
    pub fn resume_all(&self) -> usize {
        if self.ledger.resume_withdrawals() {
            tracing::info!("withdrawals resumed");
        }
        self.symbols
            .iter()
            .filter(|entry| entry.value().resume())
            .count()
    }

    pub fn withdrawals_suspended(&self) -> bool {
        self.ledger.withdrawals_suspended()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop the liquidation monitor and every symbol worker. Requests made
    /// afterwards fail with `EngineUnavailable`.
    pub fn shutdown(&self) {
        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        for entry in self.symbols.iter() {
            entry.value().shutdown();
        }
        tracing::info!("exchange stopped");
    }

    fn route(&self, order_id: &OrderId) -> Option<String> {
        self.routes.get(order_id).map(|entry| entry.value().clone())
    }

    fn remember_route(&self, order_id: OrderId, symbol: &str) {
        let limit = self
            .config
            .order_history_capacity
            .saturating_mul(self.symbols.len());
        self.routes.insert(order_id, symbol.to_string());

        let mut arrival = self.route_arrival.lock();
        arrival.push_back(order_id);
        while arrival.len() > limit {
            let Some(oldest) = arrival.pop_front() else {
                break;
            };
            self.routes.remove(&oldest);
        }
    }

    fn handle(&self, symbol: &str) -> ExchangeResult<Entry<'_, String, SymbolHandle>> {
        self.symbols
            .get(symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.shutdown();
    }
}
