// ============================================================================
// Margin Math
// Deterministic requirement, liquidation and reservation formulas
// ============================================================================

use crate::numeric::{round_down, round_up, Amount, Price, Quantity};
use rust_decimal::Decimal;

/// `initial_margin = notional / leverage`, rounded up
pub fn initial_margin(notional: Amount, leverage: u32) -> Amount {
    round_up(notional / Decimal::from(leverage.max(1)))
}

/// `maintenance_margin = notional * rate`, rounded up
pub fn maintenance_margin(notional: Amount, rate: Decimal) -> Amount {
    round_up(notional * rate)
}

/// Fee owed on `notional` at `rate`, rounded up
pub fn fee(notional: Amount, rate: Decimal) -> Amount {
    round_up(notional * rate)
}

/// Share of a reservation released when `filled` of `remaining` executes.
///
/// Releasing the last unit returns everything still held so rounding never
/// strands locked funds.
pub fn proportional_release(reserved: Amount, filled: Quantity, remaining: Quantity) -> Amount {
    if remaining <= Decimal::ZERO || filled >= remaining {
        return reserved;
    }
    round_down(reserved * filled / remaining)
}

/// Mark price at which `at_risk` collateral, less maintenance, is exhausted.
///
/// LONG:  `entry - (at_risk - mm) / size`
/// SHORT: `entry + (at_risk - mm) / size`
///
/// `mm = entry * size * maintenance_rate`. A long whose collateral covers the
/// whole notional has no positive liquidation price and returns None.
pub fn liquidation_price(
    is_long: bool,
    entry_price: Price,
    size: Quantity,
    at_risk: Amount,
    maintenance_rate: Decimal,
) -> Option<Price> {
    if size <= Decimal::ZERO {
        return None;
    }
    let mm = entry_price * size * maintenance_rate;
    let offset = (at_risk - mm) / size;

    if is_long {
        let price = entry_price - offset;
        (price > Decimal::ZERO).then_some(price)
    } else {
        Some((entry_price + offset).max(Decimal::ZERO))
    }
}

/// Price at which the posted margin alone is exhausted
pub fn bankruptcy_price(
    is_long: bool,
    entry_price: Price,
    size: Quantity,
    margin: Amount,
) -> Option<Price> {
    liquidation_price(is_long, entry_price, size, margin, Decimal::ZERO)
}

/// Has the mark price reached the liquidation price on the losing side?
pub fn is_breached(is_long: bool, mark_price: Price, liquidation_price: Price) -> bool {
    if is_long {
        mark_price <= liquidation_price
    } else {
        mark_price >= liquidation_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_margin() {
        assert_eq!(initial_margin(Decimal::from(50000), 10), Decimal::from(5000));
        assert_eq!(initial_margin(Decimal::from(100), 0), Decimal::from(100));
        assert!(initial_margin(Decimal::from(10), 3) * Decimal::from(3) >= Decimal::from(10));
    }

    #[test]
    fn test_maintenance_margin() {
        assert_eq!(
            maintenance_margin(Decimal::from(100_000), Decimal::new(5, 3)),
            Decimal::from(500)
        );
    }

    #[test]
    fn test_liquidation_price_isolated_long() {
        // 1 BTC at 50000, 10x: 5000 margin, no maintenance
        let (entry, margin) = (Decimal::from(50000), Decimal::from(5000));
        let liq = liquidation_price(true, entry, Decimal::ONE, margin, Decimal::ZERO);
        assert_eq!(liq, Some(Decimal::from(45000)));
    }

    #[test]
    fn test_maintenance_moves_trigger_inside_bankruptcy() {
        let entry = Decimal::from(50000);
        let margin = Decimal::from(5000);
        let mmr = Decimal::new(5, 3);

        let bankrupt = bankruptcy_price(true, entry, Decimal::ONE, margin);
        let liq = liquidation_price(true, entry, Decimal::ONE, margin, mmr);
        assert_eq!(bankrupt, Some(Decimal::from(45000)));
        assert_eq!(liq, Some(Decimal::from(45250)));

        let short = liquidation_price(false, entry, Decimal::ONE, margin, mmr);
        assert_eq!(short, Some(Decimal::from(54750)));
    }

    #[test]
    fn test_fully_collateralized_long_has_no_liquidation() {
        let notional = Decimal::from(100);
        let liq = liquidation_price(true, notional, Decimal::ONE, notional, Decimal::ZERO);
        assert_eq!(liq, None);
    }

    #[test]
    fn test_breach_direction() {
        assert!(is_breached(true, Decimal::from(45000), Decimal::from(45000)));
        assert!(!is_breached(true, Decimal::from(45001), Decimal::from(45000)));
        assert!(is_breached(false, Decimal::from(55000), Decimal::from(55000)));
        assert!(!is_breached(false, Decimal::from(54999), Decimal::from(55000)));
    }

    #[test]
    fn test_proportional_release() {
        let reserved = Decimal::from(100);
        assert_eq!(
            proportional_release(reserved, Decimal::ONE, Decimal::from(4)),
            Decimal::from(25)
        );
        assert_eq!(proportional_release(reserved, Decimal::from(4), Decimal::from(4)), reserved);
    }
}
