// ============================================================================
// Liquidation Monitor
// Periodic margin sweep routing forced closes to symbol workers
// ============================================================================

use crate::domain::AccountId;
use crate::risk::{LiquidationIntent, MarginEngine};
use crossbeam::channel::{self, Sender};
use crossbeam_skiplist::SkipMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sends breached positions to the priority queue of their symbol's worker
#[derive(Clone)]
pub struct LiquidationRouter {
    risk: Arc<MarginEngine>,
    queues: Arc<SkipMap<String, Sender<LiquidationIntent>>>,
}

impl LiquidationRouter {
    pub fn new(risk: Arc<MarginEngine>) -> Self {
        Self {
            risk,
            queues: Arc::new(SkipMap::new()),
        }
    }

    pub fn register(&self, symbol: impl Into<String>, queue: Sender<LiquidationIntent>) {
        self.queues.insert(symbol.into(), queue);
    }

    /// Evaluate positions (all symbols when `symbol` is None) and route every
    /// breached one. Returns how many forced closes were enqueued.
    pub fn sweep(&self, symbol: Option<&str>) -> usize {
        self.route(self.risk.evaluate_liquidations(symbol))
    }

    /// Re-check the cross positions `accounts` hold on any symbol
    pub fn sweep_accounts(&self, accounts: &[AccountId]) -> usize {
        if accounts.is_empty() {
            return 0;
        }
        self.route(self.risk.evaluate_account_liquidations(accounts))
    }

    fn route(&self, intents: Vec<LiquidationIntent>) -> usize {
        let mut routed = 0;
        for intent in intents {
            let delivered = self
                .queues
                .get(&intent.symbol)
                .is_some_and(|queue| queue.value().send(intent.clone()).is_ok());
            if delivered {
                routed += 1;
            } else {
                tracing::warn!(
                    symbol = %intent.symbol,
                    account = %intent.account_id,
                    "no worker for forced close"
                );
                self.risk.finish_liquidation(intent.account_id, &intent.symbol);
            }
        }
        routed
    }
}

// ============================================================================
// Thread Monitor
// ============================================================================

/// Background thread sweeping every position on a fixed period
pub struct LiquidationMonitor {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl LiquidationMonitor {
    pub fn start(router: LiquidationRouter, period: Duration) -> io::Result<Self> {
        let (stop, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(period);

        let thread = thread::Builder::new()
            .name("liquidation-monitor".to_string())
            .spawn(move || {
                tracing::info!(
                    period_ms = period.as_millis() as u64,
                    "liquidation monitor started"
                );
                loop {
                    let running = crossbeam::select! {
                        recv(ticker) -> _ => {
                            let routed = router.sweep(None);
                            if routed > 0 {
                                tracing::info!(routed, "liquidation sweep enqueued forced closes");
                            }
                            true
                        },
                        recv(stop_rx) -> _ => false,
                    };
                    if !running {
                        break;
                    }
                }
                tracing::info!("liquidation monitor stopped");
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop.send(());
        if thread.join().is_err() {
            tracing::error!("liquidation monitor panicked");
        }
    }
}

impl Drop for LiquidationMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Async Monitor
// ============================================================================

/// Sweep on a tokio interval until `shutdown` flips to true or its sender is
/// dropped
#[cfg(feature = "async")]
pub async fn run_async_monitor(
    router: LiquidationRouter,
    period: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    use tokio::time::{interval, MissedTickBehavior};

    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let routed = router.sweep(None);
                if routed > 0 {
                    tracing::info!(routed, "liquidation sweep enqueued forced closes");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
