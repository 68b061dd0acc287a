// ============================================================================
// Error Taxonomy
// Order, cancel, ledger and reorg failures surfaced to callers
// ============================================================================

use crate::domain::{AccountId, DepositId, OrderId};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why an order intent was refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OrderRejectReason {
    #[error("insufficient margin")]
    InsufficientMargin,

    #[error("self-trade prevented")]
    SelfTradePrevented,

    #[error("invalid price")]
    InvalidPrice,

    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("symbol halted")]
    SymbolHalted,

    #[error("invalid leverage")]
    InvalidLeverage,

    #[error("margin mode conflicts with open position")]
    MarginModeConflict,
}

/// Why a cancel request failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CancelFailReason {
    #[error("order not found")]
    NotFound,

    #[error("order already terminal")]
    AlreadyTerminal,
}

/// Why a ledger batch was refused; no entry of the batch was applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LedgerError {
    #[error("insufficient {asset} balance on account {account_id}")]
    InsufficientBalance { account_id: AccountId, asset: String },

    #[error("account {account_id} is frozen")]
    AccountFrozen { account_id: AccountId },

    #[error("withdrawals are suspended")]
    WithdrawalsSuspended,
}

/// Top-level error returned by the exchange facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("order rejected: {reason}")]
    OrderRejected { reason: OrderRejectReason },

    #[error("cancel failed for {order_id:?}: {reason}")]
    CancelFailed {
        order_id: OrderId,
        reason: CancelFailReason,
    },

    #[error("ledger rejected: {0}")]
    LedgerRejected(#[from] LedgerError),

    #[error("deposit {deposit_id:?} on {chain} invalidated by reorg at height {height}")]
    ReorgInvalidated {
        deposit_id: DepositId,
        chain: String,
        height: u64,
    },

    #[error("deposit at height {height} on {chain} is below retained history")]
    StaleDeposit { chain: String, height: u64 },

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("unknown deposit {0:?}")]
    UnknownDeposit(DepositId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine for {0} is not running")]
    EngineUnavailable(String),
}

impl From<OrderRejectReason> for ExchangeError {
    fn from(reason: OrderRejectReason) -> Self {
        ExchangeError::OrderRejected { reason }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_display() {
        let err: ExchangeError = OrderRejectReason::SelfTradePrevented.into();
        assert_eq!(err.to_string(), "order rejected: self-trade prevented");
    }

    #[test]
    fn test_ledger_error_conversion() {
        let err: ExchangeError = LedgerError::AccountFrozen {
            account_id: AccountId::new(7),
        }
        .into();
        assert!(matches!(err, ExchangeError::LedgerRejected(_)));
        assert!(err.to_string().contains("frozen"));
    }
}
