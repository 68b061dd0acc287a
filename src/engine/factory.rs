// ============================================================================
// Exchange Factory
// Creates running exchanges from configuration
// ============================================================================

use crate::domain::{AccountId, Chain, ExchangeConfig, SymbolConfig};
use crate::engine::Exchange;
use crate::errors::ExchangeResult;
use crate::interfaces::{EventHandler, NoOpEventHandler};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Factory Functions
// ============================================================================

/// Start an exchange from configuration
///
/// # Arguments
/// * `config` - Markets, fees, system accounts and chain thresholds
/// * `event_handler` - Receives order, trade, deposit and halt events
///
/// # Example
/// ```
/// use exchange_core::prelude::*;
/// use exchange_core::engine::factory::create_from_config;
/// use std::sync::Arc;
///
/// let config = ExchangeConfig::spot_btc_usd();
/// let exchange = create_from_config(config, Arc::new(NoOpEventHandler)).unwrap();
/// assert_eq!(exchange.symbols(), vec!["BTC-USD".to_string()]);
/// ```
pub fn create_from_config(
    config: ExchangeConfig,
    event_handler: Arc<dyn EventHandler>,
) -> ExchangeResult<Exchange> {
    Exchange::start(config, event_handler)
}

// ============================================================================
// Builder Pattern for Advanced Configuration
// ============================================================================

/// Builder for starting an exchange with a fluent API
///
/// # Example
/// ```
/// use exchange_core::prelude::*;
/// use exchange_core::engine::factory::ExchangeBuilder;
/// use rust_decimal::Decimal;
///
/// let exchange = ExchangeBuilder::new()
///     .spot_market("BTC-USD", "BTC", "USD")
///     .perpetual_market("BTC-PERP", "BTC", "USD", 20)
///     .with_fees(Decimal::ZERO, Decimal::new(5, 4))
///     .build()
///     .unwrap();
/// assert_eq!(exchange.symbols().len(), 2);
/// ```
pub struct ExchangeBuilder {
    config: ExchangeConfig,
    event_handler: Arc<dyn EventHandler>,
}

impl ExchangeBuilder {
    pub fn new() -> Self {
        Self::from_config(ExchangeConfig::default())
    }

    pub fn from_config(config: ExchangeConfig) -> Self {
        Self {
            config,
            event_handler: Arc::new(NoOpEventHandler),
        }
    }

    // ========================================================================
    // Markets
    // ========================================================================

    pub fn spot_market(
        self,
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        self.with_symbol(SymbolConfig::spot(symbol, base_asset, quote_asset))
    }

    pub fn perpetual_market(
        self,
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
        max_leverage: u32,
    ) -> Self {
        self.with_symbol(SymbolConfig::perpetual(symbol, base_asset, quote_asset, max_leverage))
    }

    pub fn with_symbol(mut self, symbol: SymbolConfig) -> Self {
        self.config = self.config.with_symbol(symbol);
        self
    }

    // ========================================================================
    // Accounts and Fees
    // ========================================================================

    pub fn with_fees(mut self, maker: Decimal, taker: Decimal) -> Self {
        self.config = self.config.with_fees(maker, taker);
        self
    }

    pub fn with_fee_account(mut self, account_id: AccountId) -> Self {
        self.config.fee_account = account_id;
        self
    }

    pub fn with_insurance_fund(mut self, account_id: AccountId) -> Self {
        self.config.insurance_fund_account = account_id;
        self
    }

    // ========================================================================
    // Settlement and Runtime
    // ========================================================================

    pub fn with_confirmations(mut self, chain: Chain, confirmations: u64) -> Self {
        self.config = self.config.with_confirmations(chain, confirmations);
        self
    }

    /// Run the background liquidation sweep every `period`
    pub fn with_liquidation_monitor(mut self, period: Duration) -> Self {
        self.config = self
            .config
            .with_liquidation_interval_ms(period.as_millis() as u64);
        self
    }

    /// Terminal orders per symbol kept whole for status lookups
    pub fn with_order_history_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_order_history_capacity(capacity);
        self
    }

    /// Chain history kept past the confirmation depth
    pub fn with_finality_retention_blocks(mut self, blocks: u64) -> Self {
        self.config = self.config.with_finality_retention_blocks(blocks);
        self
    }

    pub fn with_pinned_workers(mut self) -> Self {
        self.config = self.config.with_pinned_workers();
        self
    }

    pub fn with_event_handler(mut self, event_handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Validate the configuration and start the exchange
    pub fn build(self) -> ExchangeResult<Exchange> {
        create_from_config(self.config, self.event_handler)
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }
}

impl Default for ExchangeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
