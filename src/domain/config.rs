// ============================================================================
// Exchange Configuration
// Markets, fees, system accounts and chain finality thresholds
// ============================================================================

use super::{AccountId, Chain};
use crate::book::DEFAULT_HISTORY_CAPACITY;
use crate::settlement::DEFAULT_RETENTION_BLOCKS;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Market Kind
// ============================================================================

/// How fills on a symbol settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MarketKind {
    /// Base and quote assets change hands; leverage is fixed at 1
    Spot,
    /// Fills open and close positions collateralized in the quote asset
    Perpetual,
}

// ============================================================================
// Symbol Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SymbolConfig {
    /// The trading symbol (e.g., "BTC-USD", "BTC-PERP")
    pub symbol: String,

    pub base_asset: String,

    /// Settlement and collateral asset
    pub quote_asset: String,

    pub kind: MarketKind,

    /// Highest leverage an order may request
    pub max_leverage: u32,

    /// Maintenance margin as a fraction of entry notional; zero liquidates at
    /// the bankruptcy price
    pub maintenance_margin_rate: Decimal,

    /// Optional: Price tick size (minimum price increment)
    pub tick_size: Option<Decimal>,

    /// Optional: Lot size (minimum quantity increment)
    pub lot_size: Option<Decimal>,
}

impl SymbolConfig {
    pub fn spot(
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            kind: MarketKind::Spot,
            max_leverage: 1,
            maintenance_margin_rate: Decimal::ZERO,
            tick_size: None,
            lot_size: None,
        }
    }

    pub fn perpetual(
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        max_leverage: u32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
            kind: MarketKind::Perpetual,
            max_leverage,
            maintenance_margin_rate: Decimal::ZERO,
            tick_size: None,
            lot_size: None,
        }
    }

    /// Builder method: Set maintenance margin rate
    pub fn with_maintenance_margin_rate(mut self, rate: Decimal) -> Self {
        self.maintenance_margin_rate = rate;
        self
    }

    /// Builder method: Set price tick size
    pub fn with_tick_size(mut self, tick: Decimal) -> Self {
        self.tick_size = Some(tick);
        self
    }

    /// Builder method: Set lot size
    pub fn with_lot_size(mut self, lot: Decimal) -> Self {
        self.lot_size = Some(lot);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("Symbol cannot be empty".to_string());
        }

        if self.base_asset.is_empty() || self.quote_asset.is_empty() {
            return Err(format!("{}: assets cannot be empty", self.symbol));
        }

        if self.base_asset == self.quote_asset {
            return Err(format!("{}: base and quote must differ", self.symbol));
        }

        if self.max_leverage == 0 {
            return Err(format!("{}: max leverage must be at least 1", self.symbol));
        }

        if self.kind == MarketKind::Spot && self.max_leverage != 1 {
            return Err(format!("{}: spot markets trade at 1x only", self.symbol));
        }

        if self.maintenance_margin_rate < Decimal::ZERO {
            return Err(format!("{}: maintenance margin rate cannot be negative", self.symbol));
        }

        // Initial margin at max leverage must exceed maintenance, or positions
        // would open already liquidatable.
        let max_initial_rate = Decimal::ONE / Decimal::from(self.max_leverage);
        if self.maintenance_margin_rate >= max_initial_rate {
            return Err(format!(
                "{}: maintenance margin rate must be below 1/max_leverage",
                self.symbol
            ));
        }

        if let Some(tick) = self.tick_size {
            if tick <= Decimal::ZERO {
                return Err(format!("{}: tick size must be positive", self.symbol));
            }
        }

        if let Some(lot) = self.lot_size {
            if lot <= Decimal::ZERO {
                return Err(format!("{}: lot size must be positive", self.symbol));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Exchange Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExchangeConfig {
    pub symbols: Vec<SymbolConfig>,

    /// Fee charged to the resting side, in quote asset per unit notional
    pub maker_fee_rate: Decimal,

    /// Fee charged to the aggressive side; also the pre-check fee buffer
    pub taker_fee_rate: Decimal,

    pub fee_account: AccountId,

    pub insurance_fund_account: AccountId,

    /// Required confirmations per chain, overriding the chain defaults
    pub confirmations: HashMap<Chain, u64>,

    /// Background liquidation sweep period; zero disables the monitor
    pub liquidation_interval_ms: u64,

    /// Pin each symbol worker to its own core (requires the `numa` feature)
    pub pin_workers: bool,

    /// Terminal orders per symbol kept whole for status lookups
    pub order_history_capacity: usize,

    /// Blocks kept beyond each chain's confirmation depth; settled deposits
    /// and block hashes older than that are dropped
    pub finality_retention_blocks: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            maker_fee_rate: Decimal::new(2, 4), // 0.02%
            taker_fee_rate: Decimal::new(5, 4), // 0.05%
            fee_account: AccountId::FEE_SINK,
            insurance_fund_account: AccountId::INSURANCE_FUND,
            confirmations: HashMap::new(),
            liquidation_interval_ms: 0,
            pin_workers: false,
            order_history_capacity: DEFAULT_HISTORY_CAPACITY,
            finality_retention_blocks: DEFAULT_RETENTION_BLOCKS,
        }
    }
}

impl ExchangeConfig {
    pub fn new(symbols: Vec<SymbolConfig>) -> Self {
        Self {
            symbols,
            ..Self::default()
        }
    }

    /// Builder method: Add a symbol
    pub fn with_symbol(mut self, symbol: SymbolConfig) -> Self {
        self.symbols.push(symbol);
        self
    }

    /// Builder method: Set maker and taker fee rates
    pub fn with_fees(mut self, maker: Decimal, taker: Decimal) -> Self {
        self.maker_fee_rate = maker;
        self.taker_fee_rate = taker;
        self
    }

    /// Builder method: Override required confirmations for a chain
    pub fn with_confirmations(mut self, chain: Chain, confirmations: u64) -> Self {
        self.confirmations.insert(chain, confirmations);
        self
    }

    /// Builder method: Enable the background liquidation monitor
    pub fn with_liquidation_interval_ms(mut self, interval_ms: u64) -> Self {
        self.liquidation_interval_ms = interval_ms;
        self
    }

    /// Builder method: Set how many terminal orders per symbol stay queryable
    pub fn with_order_history_capacity(mut self, capacity: usize) -> Self {
        self.order_history_capacity = capacity;
        self
    }

    /// Builder method: Set how far past finality chain history is kept
    pub fn with_finality_retention_blocks(mut self, blocks: u64) -> Self {
        self.finality_retention_blocks = blocks;
        self
    }

    /// Builder method: Pin symbol workers to cores
    pub fn with_pinned_workers(mut self) -> Self {
        self.pin_workers = true;
        self
    }

    pub fn required_confirmations(&self, chain: &Chain) -> u64 {
        self.confirmations
            .get(chain)
            .copied()
            .unwrap_or_else(|| chain.default_confirmations())
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("At least one symbol must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            symbol.validate()?;
            if !seen.insert(symbol.symbol.as_str()) {
                return Err(format!("Duplicate symbol {}", symbol.symbol));
            }
        }

        if self.maker_fee_rate < Decimal::ZERO || self.taker_fee_rate < Decimal::ZERO {
            return Err("Fee rates cannot be negative".to_string());
        }

        if self.maker_fee_rate >= Decimal::ONE || self.taker_fee_rate >= Decimal::ONE {
            return Err("Fee rates must be below 1".to_string());
        }

        if self.fee_account == self.insurance_fund_account {
            return Err("Fee and insurance accounts must differ".to_string());
        }

        if self.order_history_capacity == 0 {
            return Err("Order history capacity must be positive".to_string());
        }

        if self.confirmations.values().any(|c| *c == 0) {
            return Err("Required confirmations must be at least 1".to_string());
        }

        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Preset Configurations (Factory Methods)
// ============================================================================

impl ExchangeConfig {
    /// Spot venue with a single BTC-USD market
    pub fn spot_btc_usd() -> Self {
        Self::new(vec![SymbolConfig::spot("BTC-USD", "BTC", "USD")
            .with_tick_size(Decimal::new(1, 2))])
    }

    /// Derivatives venue with BTC and ETH perpetuals collateralized in USD
    pub fn perpetuals() -> Self {
        Self::new(vec![
            SymbolConfig::perpetual("BTC-PERP", "BTC", "USD", 100)
                .with_maintenance_margin_rate(Decimal::new(5, 3)),
            SymbolConfig::perpetual("ETH-PERP", "ETH", "USD", 50)
                .with_maintenance_margin_rate(Decimal::new(1, 2)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = ExchangeConfig::spot_btc_usd();

        assert_eq!(config.symbols.len(), 1);
        assert_eq!(config.symbol("BTC-USD").map(|s| s.kind), Some(MarketKind::Spot));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ExchangeConfig::perpetuals()
            .with_fees(Decimal::ZERO, Decimal::ZERO)
            .with_confirmations(Chain::Bitcoin, 1)
            .with_symbol(
                SymbolConfig::spot("ETH-USD", "ETH", "USD").with_lot_size(Decimal::new(1, 3)),
            );

        assert_eq!(config.symbols.len(), 3);
        assert_eq!(config.required_confirmations(&Chain::Bitcoin), 1);
        assert_eq!(config.required_confirmations(&Chain::Tron), 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(ExchangeConfig::default().validate().is_err());

        let duplicate = ExchangeConfig::spot_btc_usd()
            .with_symbol(SymbolConfig::spot("BTC-USD", "BTC", "USD"));
        assert!(duplicate.validate().is_err());

        let mut spot_leverage = SymbolConfig::spot("X-USD", "X", "USD");
        spot_leverage.max_leverage = 5;
        assert!(spot_leverage.validate().is_err());

        let too_much_maintenance = SymbolConfig::perpetual("X-PERP", "X", "USD", 20)
            .with_maintenance_margin_rate(Decimal::new(5, 2));
        assert!(too_much_maintenance.validate().is_err());

        let no_history = ExchangeConfig::spot_btc_usd().with_order_history_capacity(0);
        assert!(no_history.validate().is_err());
    }
}
