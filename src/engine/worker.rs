// ============================================================================
// Symbol Worker
// Serialized command loop owning one symbol's matching engine
// ============================================================================

use super::liquidation_monitor::LiquidationRouter;
use super::matching_engine::{HaltSwitch, MatchingEngine, OrderAck};
use crate::book::OrderBookSnapshot;
use crate::domain::{AccountId, Order, OrderId, Trade};
use crate::errors::{CancelFailReason, ExchangeError, ExchangeResult, OrderRejectReason};
use crate::numeric::Price;
use crate::risk::LiquidationIntent;
use crate::utils;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

/// Requests served by a symbol worker, each with its reply channel
pub enum Command {
    Submit {
        order: Order,
        reply: Sender<Result<OrderAck, OrderRejectReason>>,
    },
    Cancel {
        order_id: OrderId,
        reply: Sender<Result<Order, CancelFailReason>>,
    },
    Snapshot {
        depth: usize,
        reply: Sender<OrderBookSnapshot>,
    },
    OrderStatus {
        order_id: OrderId,
        reply: Sender<Option<Order>>,
    },
    UpdateMark {
        price: Price,
        reply: Sender<usize>,
    },
    Shutdown,
}

// ============================================================================
// Handle
// ============================================================================

/// Caller side of a running symbol worker
pub struct SymbolHandle {
    symbol: String,
    commands: Sender<Command>,
    liquidations: Sender<LiquidationIntent>,
    switch: HaltSwitch,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SymbolHandle {
    /// Move `engine` onto its own thread, optionally pinned to `core`.
    ///
    /// With a `router`, fills and mark moves also re-check the affected
    /// accounts' cross positions on other symbols.
    pub fn spawn(
        engine: MatchingEngine,
        core: Option<usize>,
        router: Option<LiquidationRouter>,
    ) -> ExchangeResult<Self> {
        let symbol = engine.symbol().to_string();
        let switch = engine.halt_switch();
        let (commands, command_rx) = channel::unbounded();
        let (liquidations, liquidation_rx) = channel::unbounded();

        let worker = Worker {
            engine,
            requeue: liquidations.clone(),
            router,
        };
        let thread = thread::Builder::new()
            .name(format!("engine-{}", symbol))
            .spawn(move || {
                if let Some(core) = core {
                    utils::pin_current_thread_to_core(core);
                }
                worker.run(command_rx, liquidation_rx);
            })
            .map_err(|err| {
                let message = format!("failed to spawn worker for {}: {}", symbol, err);
                ExchangeError::InvalidConfig(message)
            })?;

        Ok(Self {
            symbol,
            commands,
            liquidations,
            switch,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn submit(&self, order: Order) -> ExchangeResult<Result<OrderAck, OrderRejectReason>> {
        self.request(|reply| Command::Submit { order, reply })
    }

    pub fn cancel(&self, order_id: OrderId) -> ExchangeResult<Result<Order, CancelFailReason>> {
        self.request(|reply| Command::Cancel { order_id, reply })
    }

    pub fn snapshot(&self, depth: usize) -> ExchangeResult<OrderBookSnapshot> {
        self.request(|reply| Command::Snapshot { depth, reply })
    }

    pub fn order_status(&self, order_id: OrderId) -> ExchangeResult<Option<Order>> {
        self.request(|reply| Command::OrderStatus { order_id, reply })
    }

    /// Returns how many forced closes the new mark enqueued
    pub fn update_mark_price(&self, price: Price) -> ExchangeResult<usize> {
        self.request(|reply| Command::UpdateMark { price, reply })
    }

    /// Queue a forced close ahead of every pending command
    pub fn enqueue_liquidation(&self, intent: LiquidationIntent) -> ExchangeResult<()> {
        self.liquidations
            .send(intent)
            .map_err(|_| ExchangeError::EngineUnavailable(self.symbol.clone()))
    }

    pub fn liquidation_sender(&self) -> Sender<LiquidationIntent> {
        self.liquidations.clone()
    }

    pub fn halt(&self, reason: &str) -> bool {
        self.switch.halt(reason)
    }

    pub fn resume(&self) -> bool {
        self.switch.resume()
    }

    pub fn is_halted(&self) -> bool {
        self.switch.is_halted()
    }

    /// Stop the worker after the commands already queued and wait for it
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        if thread.join().is_err() {
            tracing::error!(symbol = %self.symbol, "engine worker panicked");
        }
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> Command) -> ExchangeResult<T> {
        let (reply, response) = channel::bounded(1);
        self.commands
            .send(command(reply))
            .map_err(|_| ExchangeError::EngineUnavailable(self.symbol.clone()))?;
        response
            .recv()
            .map_err(|_| ExchangeError::EngineUnavailable(self.symbol.clone()))
    }
}

impl Drop for SymbolHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Worker Loop
// ============================================================================

struct Worker {
    engine: MatchingEngine,
    /// Own liquidation queue, fed after every mark move
    requeue: Sender<LiquidationIntent>,
    router: Option<LiquidationRouter>,
}

impl Worker {
    fn run(mut self, commands: Receiver<Command>, liquidations: Receiver<LiquidationIntent>) {
        tracing::info!(symbol = %self.engine.symbol(), "engine worker started");

        loop {
            // Forced closes jump every queued command
            while let Ok(intent) = liquidations.try_recv() {
                self.liquidate(intent);
            }

            let running = crossbeam::select! {
                recv(liquidations) -> intent => {
                    if let Ok(intent) = intent {
                        self.liquidate(intent);
                    }
                    true
                },
                recv(commands) -> command => match command {
                    Ok(Command::Shutdown) | Err(_) => false,
                    Ok(command) => {
                        self.handle(command);
                        true
                    },
                },
            };
            if !running {
                break;
            }
        }

        tracing::info!(symbol = %self.engine.symbol(), "engine worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { order, reply } => {
                let result = self.engine.submit(order);
                let trades = result
                    .as_ref()
                    .map(|ack| ack.trades.clone())
                    .unwrap_or_default();
                let _ = reply.send(result);
                if !trades.is_empty() {
                    let intents = self.engine.evaluate_liquidations();
                    self.enqueue(intents);
                    self.sweep_traders(&trades);
                }
            },
            Command::Cancel { order_id, reply } => {
                let _ = reply.send(self.engine.cancel(&order_id));
            },
            Command::Snapshot { depth, reply } => {
                let _ = reply.send(self.engine.snapshot(depth));
            },
            Command::OrderStatus { order_id, reply } => {
                let _ = reply.send(self.engine.order(&order_id));
            },
            Command::UpdateMark { price, reply } => {
                let intents = self.engine.update_mark_price(price);
                let mut count = self.enqueue(intents);
                if let Some(router) = &self.router {
                    count += router.sweep_accounts(&self.engine.cross_accounts());
                }
                let _ = reply.send(count);
            },
            Command::Shutdown => {},
        }
    }

    fn liquidate(&mut self, intent: LiquidationIntent) {
        if let Some(ack) = self.engine.liquidate(intent) {
            let intents = self.engine.evaluate_liquidations();
            self.enqueue(intents);
            self.sweep_traders(&ack.trades);
        }
    }

    /// Cross positions of both sides of `trades`, on any symbol
    fn sweep_traders(&self, trades: &[Trade]) -> usize {
        let Some(router) = &self.router else {
            return 0;
        };
        let mut accounts: Vec<AccountId> = trades
            .iter()
            .flat_map(|trade| [trade.maker_account_id, trade.taker_account_id])
            .collect();
        accounts.sort();
        accounts.dedup();
        router.sweep_accounts(&accounts)
    }

    fn enqueue(&self, intents: Vec<LiquidationIntent>) -> usize {
        let count = intents.len();
        for intent in intents {
            if self.requeue.send(intent).is_err() {
                break;
            }
        }
        count
    }
}
