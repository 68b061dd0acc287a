// ============================================================================
// Trade Settlement
// Turns a matched trade into one atomic ledger batch
// ============================================================================

use crate::domain::{AccountId, FillEffect, MarketKind, Side, SymbolConfig, Trade};
use crate::ledger::{EntryBatch, LedgerEntry, PostingPolicy};
use crate::numeric::{Amount, Quantity};
use crate::risk::margin;
use rust_decimal::Decimal;

/// One side of a trade as the settler needs to see it
#[derive(Debug, Clone)]
pub struct PartyFill {
    pub account_id: AccountId,
    pub side: Side,
    /// Amount still reserved for the order before this fill
    pub reserved: Amount,
    /// Order quantity remaining before this fill
    pub remaining: Quantity,
    pub fee_rate: Decimal,
    /// Position change, perpetual markets only
    pub effect: Option<FillEffect>,
}

/// Ledger batch for a trade plus what it did to each order's reservation
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub entries: EntryBatch,
    pub policy: PostingPolicy,
    pub maker_released: Amount,
    pub taker_released: Amount,
    pub fees: Amount,
}

/// Builds settlement batches for one symbol
#[derive(Debug, Clone)]
pub struct TradeSettler {
    kind: MarketKind,
    base_asset: String,
    quote_asset: String,
    fee_account: AccountId,
}

impl TradeSettler {
    pub fn new(config: &SymbolConfig, fee_account: AccountId) -> Self {
        Self {
            kind: config.kind,
            base_asset: config.base_asset.clone(),
            quote_asset: config.quote_asset.clone(),
            fee_account,
        }
    }

    /// Asset an order on `side` reserves
    pub fn reservation_asset(&self, side: Side) -> &str {
        match (self.kind, side) {
            (MarketKind::Spot, Side::Sell) => &self.base_asset,
            _ => &self.quote_asset,
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    pub fn plan(&self, trade: &Trade, maker: &PartyFill, taker: &PartyFill) -> SettlementPlan {
        let mut entries = EntryBatch::new();

        let (maker_released, maker_fee) = self.party_entries(trade, maker, &mut entries);
        let (taker_released, taker_fee) = self.party_entries(trade, taker, &mut entries);

        let fees = maker_fee + taker_fee;
        if fees > Decimal::ZERO {
            entries.push(LedgerEntry::credit(self.fee_account, self.quote_asset.as_str(), fees));
        }

        // A forced close may cost more than the account holds; the insurance
        // fund takes the rest.
        let policy = if trade.liquidation {
            PostingPolicy::CoverShortfall(trade.taker_account_id)
        } else {
            PostingPolicy::Strict
        };

        SettlementPlan {
            entries,
            policy,
            maker_released,
            taker_released,
            fees,
        }
    }

    fn party_entries(
        &self,
        trade: &Trade,
        party: &PartyFill,
        entries: &mut EntryBatch,
    ) -> (Amount, Amount) {
        match self.kind {
            MarketKind::Spot => self.spot_entries(trade, party, entries),
            MarketKind::Perpetual => self.perpetual_entries(trade, party, entries),
        }
    }

    fn spot_entries(
        &self,
        trade: &Trade,
        party: &PartyFill,
        entries: &mut EntryBatch,
    ) -> (Amount, Amount) {
        let notional = trade.notional_value();
        let fee = margin::fee(notional, party.fee_rate);
        let account = party.account_id;
        let base = self.base_asset.as_str();
        let quote = self.quote_asset.as_str();

        let released = match party.side {
            Side::Buy => {
                let cost = notional + fee;
                let released = release_for(party, trade.quantity, cost);
                entries.push(LedgerEntry::unlock(account, quote, released));
                entries.push(LedgerEntry::debit(account, quote, cost));
                entries.push(LedgerEntry::credit(account, base, trade.quantity));
                released
            },
            Side::Sell => {
                let released = release_for(party, trade.quantity, trade.quantity);
                entries.push(LedgerEntry::unlock(account, base, released));
                entries.push(LedgerEntry::debit(account, base, trade.quantity));
                entries.push(LedgerEntry::credit(account, quote, notional - fee));
                released
            },
        };
        (released, fee)
    }

    fn perpetual_entries(
        &self,
        trade: &Trade,
        party: &PartyFill,
        entries: &mut EntryBatch,
    ) -> (Amount, Amount) {
        let fee = margin::fee(trade.notional_value(), party.fee_rate);
        let effect = party.effect.unwrap_or_default();
        let account = party.account_id;
        let quote = self.quote_asset.as_str();

        let released = release_for(party, trade.quantity, effect.margin_added + fee);

        // Reservation and closed margin return to available, the new position
        // margin is locked, then PnL and fee settle against available.
        entries.push(LedgerEntry::unlock(account, quote, released + effect.margin_released));
        entries.push(LedgerEntry::lock(account, quote, effect.margin_added));
        entries.push(LedgerEntry::delta(account, quote, effect.realized_pnl));
        entries.push(LedgerEntry::debit(account, quote, fee));
        (released, fee)
    }
}

/// Reservation released by a fill: the proportional share, raised to what the
/// fill actually needs, never more than is still held
fn release_for(party: &PartyFill, quantity: Quantity, needed: Amount) -> Amount {
    let proportional = margin::proportional_release(party.reserved, quantity, party.remaining);
    proportional.max(needed).min(party.reserved).max(Decimal::ZERO)
}
