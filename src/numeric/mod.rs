// ============================================================================
// Numeric Module
// Decimal aliases and deterministic rounding for money and margin math
// ============================================================================
//
// This module provides:
// - Price/Quantity/Amount aliases over rust_decimal::Decimal
// - Rounding helpers: requirements round up, availability rounds down
//
// Design principles:
// - No floating-point operations
// - A single scale for every stored amount

use rust_decimal::{Decimal, RoundingStrategy};

/// Price of one unit of base asset, quoted in the quote asset
pub type Price = Decimal;

/// Quantity of base asset
pub type Quantity = Decimal;

/// Balance amount of any asset
pub type Amount = Decimal;

/// Decimal places kept on every derived amount
pub const AMOUNT_SCALE: u32 = 12;

/// Round a requirement (margin, reservation) up, away from zero.
#[inline]
pub fn round_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero)
}

/// Round an amount released to the user down, toward zero.
#[inline]
pub fn round_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
}

/// True when `value` is an integer multiple of `step`.
///
/// A non-positive step disables the check.
pub fn is_multiple_of(value: Decimal, step: Decimal) -> bool {
    if step <= Decimal::ZERO {
        return true;
    }
    (value % step).is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding_direction() {
        let third = Decimal::ONE / Decimal::from(3);
        assert!(round_up(third) > round_down(third));
        assert_eq!(round_up(Decimal::from(5)), Decimal::from(5));
        assert_eq!(round_down(Decimal::from(5)), Decimal::from(5));
    }

    #[test]
    fn test_multiple_of() {
        assert!(is_multiple_of(Decimal::new(5010, 1), Decimal::new(5, 1)));
        assert!(!is_multiple_of(Decimal::new(5013, 1), Decimal::new(5, 1)));
        assert!(is_multiple_of(Decimal::new(5013, 1), Decimal::ZERO));
    }
}
