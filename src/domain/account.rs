// ============================================================================
// Account Domain Model
// ============================================================================

use rust_decimal::Decimal;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Account identifier.
///
/// Totally ordered: multi-account ledger batches lock accounts in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AccountId(u64);

impl AccountId {
    /// Sink account collecting trading fees
    pub const FEE_SINK: AccountId = AccountId(u64::MAX - 1);

    /// Insurance fund absorbing losses beyond a liquidated account's equity
    pub const INSURANCE_FUND: AccountId = AccountId(u64::MAX);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// System accounts may carry a negative balance (a deficit).
    pub fn is_system(&self) -> bool {
        *self == Self::FEE_SINK || *self == Self::INSURANCE_FUND
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::FEE_SINK => write!(f, "fee-sink"),
            Self::INSURANCE_FUND => write!(f, "insurance-fund"),
            Self(id) => write!(f, "{}", id),
        }
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Balance of a single asset.
///
/// Invariant: `total == available + locked`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Balance {
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn new(total: Decimal) -> Self {
        Self {
            total,
            available: total,
            locked: Decimal::ZERO,
        }
    }

    pub fn check_invariant(&self) -> bool {
        self.total == self.available + self.locked
    }

    /// Non-negative available and locked amounts
    pub fn is_solvent(&self) -> bool {
        self.available >= Decimal::ZERO && self.locked >= Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.total.is_zero() && self.locked.is_zero()
    }

    pub(crate) fn credit(&mut self, amount: Decimal) {
        self.available += amount;
        self.total += amount;
    }

    pub(crate) fn debit(&mut self, amount: Decimal) {
        self.available -= amount;
        self.total -= amount;
    }

    pub(crate) fn lock(&mut self, amount: Decimal) {
        self.available -= amount;
        self.locked += amount;
    }

    pub(crate) fn unlock(&mut self, amount: Decimal) {
        self.locked -= amount;
        self.available += amount;
    }

    pub(crate) fn debit_locked(&mut self, amount: Decimal) {
        self.locked -= amount;
        self.total -= amount;
    }
}
