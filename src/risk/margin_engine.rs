// ============================================================================
// Margin & Risk Engine
// Pre-trade checks, position bookkeeping and liquidation detection
// ============================================================================

use super::margin;
use crate::domain::{
    AccountId, FillEffect, MarginMode, MarketKind, Order, Position, Side, SymbolConfig,
};
use crate::errors::OrderRejectReason;
use crate::ledger::Ledger;
use crate::numeric::{round_up, Amount, Price, Quantity};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type PositionKey = (AccountId, String);

/// Liquidity an order is expected to consume, used to size its reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderCost {
    pub quantity: Quantity,
    pub notional: Amount,
}

/// Balance an order must lock before it may enter the book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub asset: String,
    pub amount: Amount,
}

/// Forced close of a position past its liquidation price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationIntent {
    pub account_id: AccountId,
    pub symbol: String,
    /// Side that closes the position
    pub side: Side,
    pub quantity: Quantity,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub mark_price: Price,
    pub liquidation_price: Price,
    pub detected_at: DateTime<Utc>,
}

impl LiquidationIntent {
    /// Market order that closes the position, tagged as a liquidation
    pub fn to_order(&self) -> Order {
        Order::liquidation(
            self.account_id,
            self.symbol.clone(),
            self.side,
            self.quantity,
            self.leverage,
            self.margin_mode,
        )
    }
}

/// Positions, marks and margin checks shared by every symbol worker.
///
/// A symbol's positions are only mutated by that symbol's worker; other
/// workers read them when computing cross-margin collateral.
pub struct MarginEngine {
    ledger: Arc<Ledger>,
    symbols: HashMap<String, SymbolConfig>,
    positions: RwLock<HashMap<PositionKey, Position>>,
    marks: RwLock<HashMap<String, Price>>,
    /// Positions with a forced close queued or running
    liquidating: Mutex<HashSet<PositionKey>>,
}

impl MarginEngine {
    pub fn new(ledger: Arc<Ledger>, symbols: &[SymbolConfig]) -> Self {
        Self {
            ledger,
            symbols: symbols
                .iter()
                .map(|config| (config.symbol.clone(), config.clone()))
                .collect(),
            positions: RwLock::new(HashMap::new()),
            marks: RwLock::new(HashMap::new()),
            liquidating: Mutex::new(HashSet::new()),
        }
    }

    // ========================================================================
    // Pre-trade validation
    // ========================================================================

    /// Check leverage, margin mode and available balance for `order`.
    ///
    /// Returns what the order must reserve. Nothing is locked here.
    pub fn validate(
        &self,
        config: &SymbolConfig,
        order: &Order,
        cost: OrderCost,
        fee_rate: Decimal,
    ) -> Result<Reservation, OrderRejectReason> {
        self.check_terms(config, order)?;

        let reservation = self.required_reservation(config, order, cost, fee_rate);
        if order.liquidation {
            return Ok(Reservation {
                amount: Decimal::ZERO,
                ..reservation
            });
        }

        let available = self
            .ledger
            .balance(order.account_id, &reservation.asset)
            .available;
        if available < reservation.amount {
            tracing::debug!(
                account = %order.account_id,
                symbol = %config.symbol,
                required = %reservation.amount,
                available = %available,
                "insufficient margin"
            );
            return Err(OrderRejectReason::InsufficientMargin);
        }
        Ok(reservation)
    }

    /// Leverage bounds and margin-mode consistency
    pub fn check_terms(
        &self,
        config: &SymbolConfig,
        order: &Order,
    ) -> Result<(), OrderRejectReason> {
        if order.leverage == 0 || order.leverage > config.max_leverage {
            return Err(OrderRejectReason::InvalidLeverage);
        }

        if config.kind == MarketKind::Perpetual {
            if let Some(position) = self.position(order.account_id, &config.symbol) {
                if !position.is_flat() && position.margin_mode != order.margin_mode {
                    return Err(OrderRejectReason::MarginModeConflict);
                }
            }
        }
        Ok(())
    }

    /// Reservation for an order of the given cost.
    ///
    /// Spot buys lock quote for notional plus a taker-fee buffer, spot sells
    /// lock the base quantity. Perpetual orders lock initial margin on the
    /// part that opens exposure, the closing loss its released margin does
    /// not cover, and the fee buffer.
    pub fn required_reservation(
        &self,
        config: &SymbolConfig,
        order: &Order,
        cost: OrderCost,
        fee_rate: Decimal,
    ) -> Reservation {
        match (config.kind, order.side) {
            (MarketKind::Spot, Side::Buy) => Reservation {
                asset: config.quote_asset.clone(),
                amount: round_up(cost.notional * (Decimal::ONE + fee_rate)),
            },
            (MarketKind::Spot, Side::Sell) => Reservation {
                asset: config.base_asset.clone(),
                amount: order.remaining_quantity(),
            },
            (MarketKind::Perpetual, side) => {
                let position = self.position(order.account_id, &config.symbol);
                let opening = position
                    .as_ref()
                    .map(|position| position.opening_quantity(side, cost.quantity))
                    .unwrap_or(cost.quantity);
                let average_price = if cost.quantity > Decimal::ZERO {
                    cost.notional / cost.quantity
                } else {
                    Decimal::ZERO
                };
                let initial = margin::initial_margin(average_price * opening, order.leverage);
                let uncovered = position
                    .map(|position| {
                        position.uncovered_close_loss(cost.quantity - opening, average_price)
                    })
                    .unwrap_or_default();
                Reservation {
                    asset: config.quote_asset.clone(),
                    amount: initial + uncovered + margin::fee(cost.notional, fee_rate),
                }
            },
        }
    }

    // ========================================================================
    // Fills
    // ========================================================================

    /// What a fill would do to the account's position, without applying it
    pub fn preview_fill(
        &self,
        account_id: AccountId,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        price: Price,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> FillEffect {
        let mut position = self
            .position(account_id, symbol)
            .unwrap_or_else(|| Position::new(account_id, symbol, leverage, margin_mode, price));
        position.apply_fill(side, quantity, price, leverage)
    }

    /// Apply a settled fill. Flat positions are removed.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_fill(
        &self,
        account_id: AccountId,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        price: Price,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Position {
        let key = (account_id, symbol.to_string());
        let mut positions = self.positions.write();
        let position = positions
            .entry(key.clone())
            .or_insert_with(|| Position::new(account_id, symbol, leverage, margin_mode, price));
        if position.is_flat() {
            position.margin_mode = margin_mode;
        }

        let effect = position.apply_fill(side, quantity, price, leverage);
        if effect.realized_pnl != Decimal::ZERO {
            tracing::debug!(
                account = %account_id,
                symbol = %symbol,
                pnl = %effect.realized_pnl,
                "realized pnl"
            );
        }

        let updated = position.clone();
        if updated.is_flat() {
            positions.remove(&key);
        }
        updated
    }

    // ========================================================================
    // Marks and liquidation
    // ========================================================================

    pub fn set_mark_price(&self, symbol: &str, price: Price) {
        self.marks.write().insert(symbol.to_string(), price);
        for position in self
            .positions
            .write()
            .values_mut()
            .filter(|p| p.symbol == symbol)
        {
            position.mark_price = price;
        }
    }

    pub fn mark_price(&self, symbol: &str) -> Option<Price> {
        self.marks.read().get(symbol).copied()
    }

    /// Collateral backing a cross position beyond its own margin: available
    /// quote plus the unrealized PnL of the account's other cross positions
    /// in the same quote asset
    pub fn free_collateral(&self, account_id: AccountId, symbol: &str) -> Amount {
        let Some(config) = self.symbols.get(symbol) else {
            return Decimal::ZERO;
        };
        let available = self
            .ledger
            .balance(account_id, &config.quote_asset)
            .available;

        let other_pnl: Amount = self
            .positions
            .read()
            .values()
            .filter(|p| {
                p.account_id == account_id
                    && p.symbol != symbol
                    && p.margin_mode == MarginMode::Cross
                    && self
                        .symbols
                        .get(&p.symbol)
                        .is_some_and(|c| c.quote_asset == config.quote_asset)
            })
            .map(|p| p.unrealized_pnl())
            .sum();

        available + other_pnl
    }

    pub fn liquidation_price(&self, account_id: AccountId, symbol: &str) -> Option<Price> {
        let position = self.position(account_id, symbol)?;
        self.liquidation_price_of(&position)
    }

    fn liquidation_price_of(&self, position: &Position) -> Option<Price> {
        let config = self.symbols.get(&position.symbol)?;
        let free = match position.margin_mode {
            MarginMode::Isolated => Decimal::ZERO,
            MarginMode::Cross => self.free_collateral(position.account_id, &position.symbol),
        };
        position.liquidation_price(free, config.maintenance_margin_rate)
    }

    /// Find positions whose mark has reached their liquidation price.
    ///
    /// Each returned intent is marked in flight and is not produced again
    /// until `finish_liquidation` is called for it.
    pub fn evaluate_liquidations(&self, symbol: Option<&str>) -> Vec<LiquidationIntent> {
        self.evaluate_where(|p| symbol.is_none_or(|s| p.symbol == s))
    }

    /// Evaluate the cross positions of `accounts` on every symbol. Their
    /// liquidation prices move with the PnL and balance of the whole account.
    pub fn evaluate_account_liquidations(&self, accounts: &[AccountId]) -> Vec<LiquidationIntent> {
        self.evaluate_where(|p| {
            p.margin_mode == MarginMode::Cross && accounts.contains(&p.account_id)
        })
    }

    /// Accounts holding a cross position on `symbol`
    pub fn cross_accounts(&self, symbol: &str) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self
            .positions
            .read()
            .values()
            .filter(|p| p.symbol == symbol && p.margin_mode == MarginMode::Cross)
            .map(|p| p.account_id)
            .collect();
        accounts.sort();
        accounts.dedup();
        accounts
    }

    fn evaluate_where(&self, filter: impl Fn(&Position) -> bool) -> Vec<LiquidationIntent> {
        let candidates: Vec<Position> = self
            .positions
            .read()
            .values()
            .filter(|p| !p.is_flat() && filter(p))
            .cloned()
            .collect();

        let mut intents = Vec::new();
        for position in candidates {
            let Some(liquidation_price) = self.liquidation_price_of(&position) else {
                continue;
            };
            if !margin::is_breached(position.is_long(), position.mark_price, liquidation_price) {
                continue;
            }

            let key = (position.account_id, position.symbol.clone());
            if !self.liquidating.lock().insert(key) {
                continue;
            }

            tracing::warn!(
                account = %position.account_id,
                symbol = %position.symbol,
                size = %position.size,
                mark = %position.mark_price,
                liquidation_price = %liquidation_price,
                "position breached liquidation price"
            );
            intents.push(LiquidationIntent {
                account_id: position.account_id,
                symbol: position.symbol.clone(),
                side: position.closing_side(),
                quantity: position.abs_size(),
                leverage: position.leverage,
                margin_mode: position.margin_mode,
                mark_price: position.mark_price,
                liquidation_price,
                detected_at: Utc::now(),
            });
        }
        intents
    }

    pub fn finish_liquidation(&self, account_id: AccountId, symbol: &str) {
        self.liquidating
            .lock()
            .remove(&(account_id, symbol.to_string()));
    }

    pub fn is_liquidating(&self, account_id: AccountId, symbol: &str) -> bool {
        self.liquidating
            .lock()
            .contains(&(account_id, symbol.to_string()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn position(&self, account_id: AccountId, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .get(&(account_id, symbol.to_string()))
            .cloned()
    }

    pub fn positions(&self, account_id: AccountId) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .read()
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }
}
