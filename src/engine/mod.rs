// ============================================================================
// Engine Module
// Per-symbol matching engines, their workers and the exchange facade
// ============================================================================

mod exchange;
mod liquidation_monitor;
mod matching_engine;
mod worker;

pub mod factory;

pub use exchange::Exchange;
pub use factory::{create_from_config, ExchangeBuilder};
#[cfg(feature = "async")]
pub use liquidation_monitor::run_async_monitor;
pub use liquidation_monitor::{LiquidationMonitor, LiquidationRouter};
pub use matching_engine::{HaltSwitch, MatchingEngine, OrderAck};
pub use worker::{Command, SymbolHandle};
