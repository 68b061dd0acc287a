// ============================================================================
// Deposit Domain Model
// ============================================================================

use super::AccountId;
use crate::numeric::Amount;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepositId(Uuid);

impl DepositId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DepositId {
    fn default() -> Self {
        Self::new()
    }
}

/// Supported settlement chains
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Chain {
    Bitcoin,
    Ethereum,
    Solana,
    Tron,
    Other(String),
}

impl Chain {
    /// Confirmations before a deposit on this chain is spendable
    pub fn default_confirmations(&self) -> u64 {
        match self {
            Chain::Bitcoin => 3,
            Chain::Ethereum => 12,
            Chain::Solana => 30,
            Chain::Tron => 20,
            Chain::Other(_) => 6,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Bitcoin => write!(f, "BTC"),
            Chain::Ethereum => write!(f, "ETH"),
            Chain::Solana => write!(f, "SOL"),
            Chain::Tron => write!(f, "TRX"),
            Chain::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DepositStatus {
    Pending,
    Confirmed,
    ReorgInvalidated,
}

/// On-chain deposit tracked until it is final enough to spend
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Deposit {
    pub id: DepositId,
    pub tx_hash: String,
    pub chain: Chain,
    pub asset: String,
    pub amount: Amount,
    pub account_id: AccountId,
    /// Height of the including block; None while only seen in the mempool
    pub height: Option<u64>,
    pub confirmations: u64,
    pub required_confirmations: u64,
    pub observed_at: DateTime<Utc>,
    status: DepositStatus,
}

impl Deposit {
    pub fn new(
        tx_hash: impl Into<String>,
        chain: Chain,
        asset: impl Into<String>,
        amount: Amount,
        account_id: AccountId,
        required_confirmations: u64,
    ) -> Self {
        Self {
            id: DepositId::new(),
            tx_hash: tx_hash.into(),
            chain,
            asset: asset.into(),
            amount,
            account_id,
            height: None,
            confirmations: 0,
            required_confirmations,
            observed_at: Utc::now(),
            status: DepositStatus::Pending,
        }
    }

    pub fn status(&self) -> DepositStatus {
        self.status
    }

    /// Pending -> Confirmed; any other transition is refused
    pub(crate) fn confirm(&mut self) -> bool {
        if self.status == DepositStatus::Pending {
            self.status = DepositStatus::Confirmed;
            true
        } else {
            false
        }
    }

    /// Pending | Confirmed -> ReorgInvalidated
    pub(crate) fn invalidate(&mut self) -> bool {
        if self.status == DepositStatus::ReorgInvalidated {
            return false;
        }
        self.status = DepositStatus::ReorgInvalidated;
        true
    }

    pub fn is_final(&self) -> bool {
        self.confirmations >= self.required_confirmations
    }
}
