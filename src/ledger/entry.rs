// ============================================================================
// Ledger Entries
// ============================================================================

use crate::domain::{AccountId, Balance};
use crate::numeric::Amount;
use rust_decimal::Decimal;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntryKind {
    /// available += amount
    Credit,
    /// available -= amount
    Debit,
    /// available -> locked
    Lock,
    /// locked -> available
    Unlock,
    /// locked -= amount (spend a reservation)
    DebitLocked,
}

/// One balance movement inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LedgerEntry {
    pub account_id: AccountId,
    pub asset: String,
    pub kind: EntryKind,
    pub amount: Amount,
}

/// Most postings touch a handful of balances
pub type EntryBatch = SmallVec<[LedgerEntry; 8]>;

impl LedgerEntry {
    pub fn new(
        account_id: AccountId,
        asset: impl Into<String>,
        kind: EntryKind,
        amount: Amount,
    ) -> Self {
        Self {
            account_id,
            asset: asset.into(),
            kind,
            amount,
        }
    }

    pub fn credit(account_id: AccountId, asset: impl Into<String>, amount: Amount) -> Self {
        Self::new(account_id, asset, EntryKind::Credit, amount)
    }

    pub fn debit(account_id: AccountId, asset: impl Into<String>, amount: Amount) -> Self {
        Self::new(account_id, asset, EntryKind::Debit, amount)
    }

    pub fn lock(account_id: AccountId, asset: impl Into<String>, amount: Amount) -> Self {
        Self::new(account_id, asset, EntryKind::Lock, amount)
    }

    pub fn unlock(account_id: AccountId, asset: impl Into<String>, amount: Amount) -> Self {
        Self::new(account_id, asset, EntryKind::Unlock, amount)
    }

    pub fn debit_locked(account_id: AccountId, asset: impl Into<String>, amount: Amount) -> Self {
        Self::new(account_id, asset, EntryKind::DebitLocked, amount)
    }

    /// Signed change to available: positive credits, negative debits
    pub fn delta(account_id: AccountId, asset: impl Into<String>, delta: Amount) -> Self {
        if delta >= Decimal::ZERO {
            Self::credit(account_id, asset, delta)
        } else {
            Self::debit(account_id, asset, -delta)
        }
    }

    pub fn is_noop(&self) -> bool {
        self.amount.is_zero()
    }

    pub(crate) fn apply(&self, balance: &mut Balance) {
        match self.kind {
            EntryKind::Credit => balance.credit(self.amount),
            EntryKind::Debit => balance.debit(self.amount),
            EntryKind::Lock => balance.lock(self.amount),
            EntryKind::Unlock => balance.unlock(self.amount),
            EntryKind::DebitLocked => balance.debit_locked(self.amount),
        }
    }
}

/// How a batch treats a user balance that would go negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostingPolicy {
    /// Reject the whole batch
    #[default]
    Strict,
    /// Top up this account's negative available balances from the insurance
    /// fund, which may go into deficit. Used for forced liquidations and reorg
    /// reversals.
    CoverShortfall(AccountId),
}
