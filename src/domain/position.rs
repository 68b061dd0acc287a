// ============================================================================
// Position Domain Model
// ============================================================================

use super::{AccountId, MarginMode, Side};
use crate::numeric::{round_down, round_up, Amount, Price, Quantity};
use crate::risk::margin;
use rust_decimal::Decimal;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Open exposure of one account on one perpetual symbol
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub account_id: AccountId,
    pub symbol: String,
    /// Signed size, positive = long
    pub size: Quantity,
    /// Volume-weighted average entry
    pub entry_price: Price,
    pub mark_price: Price,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    /// Initial margin currently posted (locked on the ledger)
    pub margin: Amount,
    pub realized_pnl: Amount,
}

/// What a fill did to a position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillEffect {
    /// Quantity that increased exposure
    pub opened: Quantity,
    /// Quantity that reduced exposure
    pub closed: Quantity,
    pub realized_pnl: Amount,
    /// Margin released by the closed portion
    pub margin_released: Amount,
    /// Margin required by the opened portion
    pub margin_added: Amount,
}

impl Position {
    pub fn new(
        account_id: AccountId,
        symbol: impl Into<String>,
        leverage: u32,
        margin_mode: MarginMode,
        mark_price: Price,
    ) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            mark_price,
            leverage: leverage.max(1),
            margin_mode,
            margin: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    pub fn abs_size(&self) -> Quantity {
        self.size.abs()
    }

    /// Side that closes this position
    pub fn closing_side(&self) -> Side {
        if self.is_long() {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    /// Long: (mark - entry) * size; short: (entry - mark) * |size|
    pub fn unrealized_pnl(&self) -> Amount {
        (self.mark_price - self.entry_price) * self.size
    }

    pub fn notional(&self) -> Amount {
        self.mark_price * self.abs_size()
    }

    /// Quantity of an order on `side` that would increase exposure
    pub fn opening_quantity(&self, side: Side, quantity: Quantity) -> Quantity {
        let reduces = (side == Side::Buy && self.size < Decimal::ZERO)
            || (side == Side::Sell && self.size > Decimal::ZERO);
        if reduces {
            (quantity - self.abs_size()).max(Decimal::ZERO)
        } else {
            quantity
        }
    }

    /// Loss from closing `quantity` at `price` that the margin released by
    /// the close does not cover
    pub fn uncovered_close_loss(&self, quantity: Quantity, price: Price) -> Amount {
        let closing = quantity.min(self.abs_size());
        if closing <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let loss = if self.is_long() {
            (self.entry_price - price) * closing
        } else {
            (price - self.entry_price) * closing
        };
        let released = if closing == self.abs_size() {
            self.margin
        } else {
            round_down(self.margin * closing / self.abs_size())
        };
        round_up(loss - released).max(Decimal::ZERO)
    }

    /// Mark price at which this position's margin balance reaches its
    /// maintenance requirement. `free_collateral` is the extra equity at risk
    /// (zero for isolated positions).
    pub fn liquidation_price(
        &self,
        free_collateral: Amount,
        maintenance_margin_rate: Decimal,
    ) -> Option<Price> {
        if self.is_flat() {
            return None;
        }
        let at_risk = match self.margin_mode {
            MarginMode::Isolated => self.margin,
            MarginMode::Cross => self.margin + free_collateral,
        };
        margin::liquidation_price(
            self.is_long(),
            self.entry_price,
            self.abs_size(),
            at_risk,
            maintenance_margin_rate,
        )
    }

    /// Apply a fill of `quantity` at `price` on `side`, opening at `leverage`.
    pub fn apply_fill(
        &mut self,
        side: Side,
        quantity: Quantity,
        price: Price,
        leverage: u32,
    ) -> FillEffect {
        let mut effect = FillEffect::default();
        let signed = side.sign() * quantity;

        let opening = self.opening_quantity(side, quantity);
        let closing = quantity - opening;

        if closing > Decimal::ZERO {
            let before = self.abs_size();
            effect.closed = closing;
            effect.realized_pnl = if self.is_long() {
                (price - self.entry_price) * closing
            } else {
                (self.entry_price - price) * closing
            };
            effect.margin_released = if closing == before {
                self.margin
            } else {
                round_down(self.margin * closing / before)
            };
            self.margin -= effect.margin_released;
            self.realized_pnl += effect.realized_pnl;
            self.size += side.sign() * closing;
            if self.is_flat() {
                self.entry_price = Decimal::ZERO;
                self.margin = Decimal::ZERO;
            }
        }

        if opening > Decimal::ZERO {
            let leverage = leverage.max(1);
            let added = round_up(price * opening / Decimal::from(leverage));
            let before = self.abs_size();
            self.entry_price = if before.is_zero() {
                price
            } else {
                (self.entry_price * before + price * opening) / (before + opening)
            };
            self.size += side.sign() * opening;
            self.margin += added;
            self.leverage = leverage;
            effect.opened = opening;
            effect.margin_added = added;
        }

        debug_assert_eq!(effect.opened + effect.closed, signed.abs());
        self.mark_price = price;
        effect
    }
}
