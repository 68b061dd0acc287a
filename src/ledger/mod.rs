// ============================================================================
// Ledger Module
// Balances, atomic entry batches and the insurance-fund shortfall policy
// ============================================================================

pub mod accounts;
pub mod entry;

pub use accounts::{AccountState, Ledger};
pub use entry::{EntryBatch, EntryKind, LedgerEntry, PostingPolicy};
