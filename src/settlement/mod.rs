// ============================================================================
// Settlement Module
// Trade settlement batches and on-chain deposit finality
// ============================================================================

pub mod finality;
pub mod trade_settlement;

pub use finality::{
    Block, ChainTransaction, DepositEvent, FinalityTracker, DEFAULT_RETENTION_BLOCKS,
};
pub use trade_settlement::{PartyFill, SettlementPlan, TradeSettler};
