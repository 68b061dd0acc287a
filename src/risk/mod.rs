// ============================================================================
// Risk Module
// Margin requirements, positions and liquidation detection
// ============================================================================

pub mod margin;
mod margin_engine;

pub use margin_engine::{LiquidationIntent, MarginEngine, OrderCost, Reservation};
