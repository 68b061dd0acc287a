// ============================================================================
// Finality Tracker
// Deposit confirmations, reorg detection and ledger rollback per chain
// ============================================================================

use crate::domain::{AccountId, Chain, Deposit, DepositId, DepositStatus};
use crate::errors::{ExchangeError, ExchangeResult};
use crate::interfaces::{EventHandler, ExchangeEvent};
use crate::ledger::{Ledger, LedgerEntry, PostingPolicy};
use crate::numeric::Amount;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Chain Input
// ============================================================================

/// Transaction inside an observed block
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChainTransaction {
    pub tx_hash: String,
    pub asset: String,
    pub amount: Amount,
    /// Set when the transaction pays into a user deposit address
    pub account_id: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    pub chain: Chain,
    pub height: u64,
    pub hash: String,
    pub transactions: Vec<ChainTransaction>,
}

impl Block {
    pub fn new(chain: Chain, height: u64, hash: impl Into<String>) -> Self {
        Self {
            chain,
            height,
            hash: hash.into(),
            transactions: Vec::new(),
        }
    }

    pub fn with_deposit(
        mut self,
        tx_hash: impl Into<String>,
        account_id: AccountId,
        asset: impl Into<String>,
        amount: Amount,
    ) -> Self {
        self.transactions.push(ChainTransaction {
            tx_hash: tx_hash.into(),
            asset: asset.into(),
            amount,
            account_id: Some(account_id),
        });
        self
    }
}

/// Deposit observed by a chain watcher, possibly before inclusion
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DepositEvent {
    pub chain: Chain,
    pub tx_hash: String,
    pub account_id: AccountId,
    pub asset: String,
    pub amount: Amount,
    /// None while the transaction is only in the mempool
    pub height: Option<u64>,
}

// ============================================================================
// Tracker State
// ============================================================================

#[derive(Debug, Default)]
struct ChainState {
    /// Height -> hash of the canonical chain as currently known
    blocks: BTreeMap<u64, String>,
    tip: u64,
    /// Accounts frozen by a reorg on this chain, with the fork height that
    /// must become final before they are released
    frozen: Vec<(u64, AccountId)>,
    /// Lowest height still tracked; older blocks and settled deposits are gone
    horizon: u64,
}

#[derive(Debug, Default)]
struct TrackerState {
    chains: HashMap<Chain, ChainState>,
    deposits: HashMap<DepositId, Deposit>,
    /// Live deposit record per (chain, tx hash)
    by_tx: HashMap<(Chain, String), DepositId>,
}

/// Tracks deposits until final and rolls the ledger back on reorgs
pub struct FinalityTracker {
    ledger: Arc<Ledger>,
    confirmations: HashMap<Chain, u64>,
    event_handler: Arc<dyn EventHandler>,
    /// Blocks kept past the confirmation depth
    retention: u64,
    state: Mutex<TrackerState>,
}

pub const DEFAULT_RETENTION_BLOCKS: u64 = 10_000;

impl FinalityTracker {
    pub fn new(
        ledger: Arc<Ledger>,
        confirmations: HashMap<Chain, u64>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            ledger,
            confirmations,
            event_handler,
            retention: DEFAULT_RETENTION_BLOCKS,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Builder method: Keep `blocks` of history beyond the confirmation depth.
    /// Reorgs deeper than that are no longer detected.
    pub fn with_retention(mut self, blocks: u64) -> Self {
        self.retention = blocks;
        self
    }

    pub fn required_confirmations(&self, chain: &Chain) -> u64 {
        self.confirmations
            .get(chain)
            .copied()
            .unwrap_or_else(|| chain.default_confirmations())
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Record a deposit. Repeated events for the same live transaction update
    /// the existing record instead of creating another.
    pub fn on_deposit(&self, event: DepositEvent) -> ExchangeResult<Deposit> {
        let mut state = self.state.lock();
        let mut events = Vec::new();
        let deposit = self.observe(&mut state, event, &mut events)?;
        drop(state);

        self.event_handler.on_events(events);
        Ok(deposit)
    }

    /// Process a block. A block at an already recorded height with a different
    /// hash is a reorg: everything at or above that height is rolled back
    /// before the new block is applied.
    pub fn on_block(&self, block: Block) -> ExchangeResult<Vec<ExchangeEvent>> {
        let mut state = self.state.lock();
        let mut events = Vec::new();

        if block.height < horizon(&state, &block.chain) {
            tracing::warn!(
                chain = %block.chain,
                height = block.height,
                "block below retained history ignored"
            );
            return Ok(events);
        }

        let recorded = state
            .chains
            .get(&block.chain)
            .and_then(|chain| chain.blocks.get(&block.height).cloned());

        match recorded {
            Some(hash) if hash == block.hash => {
                tracing::debug!(
                    chain = %block.chain,
                    height = block.height,
                    "duplicate block ignored"
                );
                return Ok(events);
            },
            Some(old_hash) => {
                self.rollback(&mut state, &block, old_hash, &mut events)?;
            },
            None => {},
        }

        {
            let chain = state.chains.entry(block.chain.clone()).or_default();
            chain.blocks.insert(block.height, block.hash.clone());
            chain.tip = chain.tip.max(block.height);
        }

        for tx in &block.transactions {
            let Some(account_id) = tx.account_id else {
                continue;
            };
            self.observe(
                &mut state,
                DepositEvent {
                    chain: block.chain.clone(),
                    tx_hash: tx.tx_hash.clone(),
                    account_id,
                    asset: tx.asset.clone(),
                    amount: tx.amount,
                    height: Some(block.height),
                },
                &mut events,
            )?;
        }

        self.refresh_confirmations(&mut state, &block.chain, &mut events)?;
        self.release_frozen(&mut state, &block.chain, &mut events);
        self.compact(&mut state, &block.chain);
        drop(state);

        self.event_handler.on_events(events.clone());
        Ok(events)
    }

    /// Release a reorg freeze by hand
    pub fn unfreeze_account(&self, account_id: AccountId) {
        let mut state = self.state.lock();
        for chain in state.chains.values_mut() {
            chain.frozen.retain(|(_, id)| *id != account_id);
        }
        drop(state);

        self.ledger.unfreeze(account_id);
        tracing::info!(account = %account_id, "account unfrozen manually");
        self.event_handler.on_event(ExchangeEvent::AccountUnfrozen {
            account_id,
            timestamp: Utc::now(),
        });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn deposit(&self, deposit_id: &DepositId) -> Option<Deposit> {
        self.state.lock().deposits.get(deposit_id).cloned()
    }

    /// The deposit, or `ReorgInvalidated` if a reorg orphaned it
    pub fn valid_deposit(&self, deposit_id: &DepositId) -> ExchangeResult<Deposit> {
        let deposit = self
            .deposit(deposit_id)
            .ok_or_else(|| ExchangeError::UnknownDeposit(*deposit_id))?;
        if deposit.status() == DepositStatus::ReorgInvalidated {
            return Err(ExchangeError::ReorgInvalidated {
                deposit_id: *deposit_id,
                chain: deposit.chain.to_string(),
                height: deposit.height.unwrap_or_default(),
            });
        }
        Ok(deposit)
    }

    pub fn deposits_for(&self, account_id: AccountId) -> Vec<Deposit> {
        let mut deposits: Vec<Deposit> = self
            .state
            .lock()
            .deposits
            .values()
            .filter(|d| d.account_id == account_id)
            .cloned()
            .collect();
        deposits.sort_by_key(|d| d.observed_at);
        deposits
    }

    pub fn tip_height(&self, chain: &Chain) -> Option<u64> {
        self.state.lock().chains.get(chain).map(|c| c.tip)
    }

    /// Highest height with at least the required confirmations
    pub fn finalized_height(&self, chain: &Chain) -> Option<u64> {
        let tip = self.tip_height(chain)?;
        let required = self.required_confirmations(chain);
        tip.checked_sub(required.saturating_sub(1))
    }

    // ========================================================================
    // Private methods
    // ========================================================================

    fn observe(
        &self,
        state: &mut TrackerState,
        event: DepositEvent,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<Deposit> {
        let floor = horizon(state, &event.chain);
        if let Some(height) = event.height.filter(|h| *h < floor) {
            return Err(ExchangeError::StaleDeposit {
                chain: event.chain.to_string(),
                height,
            });
        }
        let key = (event.chain.clone(), event.tx_hash.clone());

        if let Some(existing) = state.by_tx.get(&key).and_then(|id| state.deposits.get_mut(id)) {
            if existing.height.is_none() {
                existing.height = event.height;
            }
            let deposit = existing.clone();
            self.refresh_confirmations(state, &event.chain, events)?;
            return Ok(state.deposits.get(&deposit.id).cloned().unwrap_or(deposit));
        }

        let required = self.required_confirmations(&event.chain);
        let mut deposit = Deposit::new(
            event.tx_hash,
            event.chain.clone(),
            event.asset,
            event.amount,
            event.account_id,
            required,
        );
        deposit.height = event.height;

        tracing::info!(
            chain = %deposit.chain,
            tx = %deposit.tx_hash,
            account = %deposit.account_id,
            amount = %deposit.amount,
            "deposit observed"
        );
        self.ledger
            .adjust_incoming(deposit.account_id, &deposit.asset, deposit.amount);

        let id = deposit.id;
        state.by_tx.insert(key, id);
        state.deposits.insert(id, deposit);
        self.refresh_confirmations(state, &event.chain, events)?;

        state
            .deposits
            .get(&id)
            .cloned()
            .ok_or(ExchangeError::UnknownDeposit(id))
    }

    /// Recount confirmations on `chain` and credit deposits that became final
    fn refresh_confirmations(
        &self,
        state: &mut TrackerState,
        chain: &Chain,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<()> {
        let Some(tip) = state.chains.get(chain).map(|c| c.tip) else {
            return Ok(());
        };

        for deposit in state.deposits.values_mut() {
            if &deposit.chain != chain || deposit.status() != DepositStatus::Pending {
                continue;
            }
            let Some(height) = deposit.height else {
                continue;
            };
            deposit.confirmations = if tip >= height { tip - height + 1 } else { 0 };

            if deposit.is_final() {
                self.ledger
                    .deposit(deposit.account_id, &deposit.asset, deposit.amount)?;
                self.ledger
                    .adjust_incoming(deposit.account_id, &deposit.asset, -deposit.amount);
                deposit.confirm();
                tracing::info!(
                    chain = %deposit.chain,
                    tx = %deposit.tx_hash,
                    account = %deposit.account_id,
                    confirmations = deposit.confirmations,
                    "deposit credited"
                );
                events.push(ExchangeEvent::DepositCredited {
                    deposit: deposit.clone(),
                });
            }
        }
        Ok(())
    }

    /// Undo everything the orphaned branch from `block.height` upward did
    fn rollback(
        &self,
        state: &mut TrackerState,
        block: &Block,
        old_hash: String,
        events: &mut Vec<ExchangeEvent>,
    ) -> ExchangeResult<()> {
        let fork_height = block.height;
        tracing::error!(
            chain = %block.chain,
            height = fork_height,
            old = %old_hash,
            new = %block.hash,
            "reorg detected"
        );
        events.push(ExchangeEvent::ReorgDetected {
            chain: block.chain.clone(),
            height: fork_height,
            old_hash,
            new_hash: block.hash.clone(),
            timestamp: Utc::now(),
        });

        let mut affected = BTreeSet::new();
        let orphaned: Vec<DepositId> = state
            .deposits
            .values()
            .filter(|d| {
                d.chain == block.chain
                    && d.status() != DepositStatus::ReorgInvalidated
                    && d.height.is_some_and(|h| h >= fork_height)
            })
            .map(|d| d.id)
            .collect();

        for id in orphaned {
            let Some(deposit) = state.deposits.get_mut(&id) else {
                continue;
            };
            match deposit.status() {
                DepositStatus::Confirmed => {
                    // Funds may already be spent; the insurance fund absorbs
                    // whatever the account cannot return.
                    let reversal = LedgerEntry::debit(
                        deposit.account_id,
                        deposit.asset.as_str(),
                        deposit.amount,
                    );
                    self.ledger.post_entries(
                        &[reversal],
                        PostingPolicy::CoverShortfall(deposit.account_id),
                    )?;
                },
                _ => {
                    self.ledger
                        .adjust_incoming(deposit.account_id, &deposit.asset, -deposit.amount);
                },
            }
            deposit.invalidate();
            deposit.confirmations = 0;
            affected.insert(deposit.account_id);

            tracing::warn!(
                chain = %deposit.chain,
                tx = %deposit.tx_hash,
                account = %deposit.account_id,
                "deposit invalidated by reorg"
            );
            events.push(ExchangeEvent::DepositInvalidated {
                deposit: deposit.clone(),
                fork_height,
            });

            // Let the transaction be observed again on the new branch
            let key = (deposit.chain.clone(), deposit.tx_hash.clone());
            if state.by_tx.get(&key) == Some(&id) {
                state.by_tx.remove(&key);
            }
        }

        let chain = state.chains.entry(block.chain.clone()).or_default();
        chain.blocks.retain(|height, _| *height < fork_height);
        chain.tip = fork_height.saturating_sub(1);

        for account_id in affected {
            self.ledger.freeze(account_id);
            chain.frozen.push((fork_height, account_id));
            events.push(ExchangeEvent::AccountFrozen {
                account_id,
                reason: format!("reorg on {} at height {}", block.chain, fork_height),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }

    /// Drop block hashes and settled deposits more than the retention window
    /// below finality
    fn compact(&self, state: &mut TrackerState, chain: &Chain) {
        let depth = self.required_confirmations(chain).saturating_add(self.retention);
        let horizon = {
            let Some(chain_state) = state.chains.get_mut(chain) else {
                return;
            };
            let Some(horizon) = chain_state.tip.checked_sub(depth) else {
                return;
            };
            if horizon <= chain_state.horizon {
                return;
            }
            chain_state.horizon = horizon;
            chain_state.blocks = chain_state.blocks.split_off(&horizon);
            horizon
        };

        let before = state.deposits.len();
        state.deposits.retain(|_, d| {
            &d.chain != chain
                || d.status() == DepositStatus::Pending
                || d.height.is_none_or(|h| h >= horizon)
        });
        let deposits = &state.deposits;
        state.by_tx.retain(|_, id| deposits.contains_key(id));

        let dropped = before - state.deposits.len();
        if dropped > 0 {
            tracing::debug!(chain = %chain, horizon, dropped, "settled deposits compacted");
        }
    }

    /// Unfreeze accounts whose fork height is now final
    fn release_frozen(
        &self,
        state: &mut TrackerState,
        chain: &Chain,
        events: &mut Vec<ExchangeEvent>,
    ) {
        let required = self.required_confirmations(chain);
        let Some(chain_state) = state.chains.get_mut(chain) else {
            return;
        };
        let Some(finalized) = chain_state.tip.checked_sub(required.saturating_sub(1)) else {
            return;
        };

        let (ready, waiting): (Vec<_>, Vec<_>) = chain_state
            .frozen
            .drain(..)
            .partition(|(fork_height, _)| *fork_height <= finalized);
        chain_state.frozen = waiting;

        let still_held: BTreeSet<AccountId> = state
            .chains
            .values()
            .flat_map(|c| c.frozen.iter().map(|(_, id)| *id))
            .collect();

        for (_, account_id) in ready {
            if still_held.contains(&account_id) {
                continue;
            }
            self.ledger.unfreeze(account_id);
            tracing::info!(
                account = %account_id,
                chain = %chain,
                "account re-verified after reorg"
            );
            events.push(ExchangeEvent::AccountUnfrozen {
                account_id,
                timestamp: Utc::now(),
            });
        }
    }
}

fn horizon(state: &TrackerState, chain: &Chain) -> u64 {
    state.chains.get(chain).map(|c| c.horizon).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::NoOpEventHandler;
    use rust_decimal::Decimal;

    fn tracker() -> (Arc<Ledger>, FinalityTracker) {
        let ledger = Arc::new(Ledger::default());
        let handler = Arc::new(NoOpEventHandler);
        let tracker = FinalityTracker::new(Arc::clone(&ledger), HashMap::new(), handler);
        (ledger, tracker)
    }

    /// Bitcoin block paying `amount` BTC to `account` in transaction "tx1"
    fn btc_deposit(height: u64, hash: &str, account: AccountId, amount: Decimal) -> Block {
        Block::new(Chain::Bitcoin, height, hash).with_deposit("tx1", account, "BTC", amount)
    }

    #[test]
    fn test_deposit_credited_at_threshold() {
        let (ledger, tracker) = tracker();
        let alice = AccountId::new(1);

        tracker.on_block(btc_deposit(100, "a100", alice, Decimal::ONE)).unwrap();
        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ZERO);
        assert_eq!(ledger.incoming(alice).get("BTC"), Some(&Decimal::ONE));

        tracker.on_block(Block::new(Chain::Bitcoin, 101, "a101")).unwrap();
        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ZERO);

        let events = tracker.on_block(Block::new(Chain::Bitcoin, 102, "a102")).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExchangeEvent::DepositCredited { .. })));
        assert_eq!(ledger.balance(alice, "BTC").available, Decimal::ONE);
        assert!(ledger.incoming(alice).is_empty());
    }

    #[test]
    fn test_mempool_deposit_confirms_once_included() {
        let (ledger, tracker) = tracker();
        let alice = AccountId::new(1);

        let pending = tracker
            .on_deposit(DepositEvent {
                chain: Chain::Other("DOGE".to_string()),
                tx_hash: "tx9".to_string(),
                account_id: alice,
                asset: "DOGE".to_string(),
                amount: Decimal::from(50),
                height: None,
            })
            .unwrap();
        assert_eq!(pending.status(), DepositStatus::Pending);
        assert_eq!(pending.required_confirmations, 6);

        let doge = Chain::Other("DOGE".to_string());
        let included = Block::new(doge.clone(), 10, "d10");
        let included = included.with_deposit("tx9", alice, "DOGE", Decimal::from(50));
        tracker.on_block(included).unwrap();
        for height in 11..16 {
            tracker.on_block(Block::new(doge.clone(), height, format!("d{}", height))).unwrap();
        }

        assert_eq!(
            tracker.deposit(&pending.id).map(|d| d.status()),
            Some(DepositStatus::Confirmed)
        );
        assert_eq!(ledger.balance(alice, "DOGE").total, Decimal::from(50));
    }

    #[test]
    fn test_reorg_rolls_back_confirmed_deposit() {
        let (ledger, tracker) = tracker();
        let alice = AccountId::new(1);

        tracker.on_block(btc_deposit(100, "a100", alice, Decimal::ONE)).unwrap();
        tracker.on_block(Block::new(Chain::Bitcoin, 101, "a101")).unwrap();
        tracker.on_block(Block::new(Chain::Bitcoin, 102, "a102")).unwrap();
        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ONE);
        let deposit_id = tracker.deposits_for(alice)[0].id;

        let events = tracker.on_block(Block::new(Chain::Bitcoin, 100, "b100")).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExchangeEvent::ReorgDetected { height: 100, .. })));

        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ZERO);
        assert!(ledger.is_frozen(alice));
        assert!(matches!(
            tracker.valid_deposit(&deposit_id),
            Err(ExchangeError::ReorgInvalidated { height: 100, .. })
        ));
        assert_eq!(tracker.tip_height(&Chain::Bitcoin), Some(100));

        // New branch becomes final past the fork: account re-verified
        tracker.on_block(Block::new(Chain::Bitcoin, 101, "b101")).unwrap();
        assert!(ledger.is_frozen(alice));
        tracker.on_block(Block::new(Chain::Bitcoin, 102, "b102")).unwrap();
        assert!(!ledger.is_frozen(alice));
    }

    #[test]
    fn test_reorg_replays_transaction_on_new_branch() {
        let (ledger, tracker) = tracker();
        let alice = AccountId::new(1);

        tracker.on_block(btc_deposit(100, "a100", alice, Decimal::ONE)).unwrap();
        tracker.on_block(btc_deposit(100, "b100", alice, Decimal::ONE)).unwrap();

        let deposits = tracker.deposits_for(alice);
        assert_eq!(deposits.len(), 2);
        assert_eq!(
            deposits.iter().filter(|d| d.status() == DepositStatus::Pending).count(),
            1
        );
        assert_eq!(ledger.incoming(alice).get("BTC"), Some(&Decimal::ONE));
    }

    #[test]
    fn test_reorg_of_spent_deposit_charges_insurance_fund() {
        let (ledger, tracker) = tracker();
        let alice = AccountId::new(1);

        tracker.on_block(btc_deposit(1, "a1", alice, Decimal::from(2))).unwrap();
        tracker.on_block(Block::new(Chain::Bitcoin, 2, "a2")).unwrap();
        tracker.on_block(Block::new(Chain::Bitcoin, 3, "a3")).unwrap();
        ledger.withdraw(alice, "BTC", Decimal::ONE).unwrap();

        tracker.on_block(Block::new(Chain::Bitcoin, 1, "b1")).unwrap();
        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ZERO);
        assert_eq!(
            ledger.balance(AccountId::INSURANCE_FUND, "BTC").total,
            Decimal::from(-1)
        );
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_settled_history_is_compacted() {
        let (ledger, tracker) = tracker();
        let tracker = tracker.with_retention(0);
        let alice = AccountId::new(1);

        tracker.on_block(btc_deposit(100, "a100", alice, Decimal::ONE)).unwrap();
        let deposit_id = tracker.deposits_for(alice)[0].id;
        for height in 101..=104 {
            tracker.on_block(Block::new(Chain::Bitcoin, height, format!("a{}", height))).unwrap();
        }

        assert!(tracker.deposit(&deposit_id).is_none());
        assert!(tracker.deposits_for(alice).is_empty());
        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ONE);

        // Replays below the horizon are refused rather than credited again
        let replay = DepositEvent {
            chain: Chain::Bitcoin,
            tx_hash: "tx1".to_string(),
            account_id: alice,
            asset: "BTC".to_string(),
            amount: Decimal::ONE,
            height: Some(100),
        };
        assert!(matches!(
            tracker.on_deposit(replay),
            Err(ExchangeError::StaleDeposit { height: 100, .. })
        ));
        assert!(tracker.on_block(Block::new(Chain::Bitcoin, 100, "b100")).unwrap().is_empty());
        assert_eq!(ledger.balance(alice, "BTC").total, Decimal::ONE);

        // Inside the window reorgs are still seen
        let events = tracker.on_block(Block::new(Chain::Bitcoin, 102, "b102")).unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, ExchangeEvent::ReorgDetected { height: 102, .. })));
    }

    #[test]
    fn test_duplicate_block_is_ignored() {
        let (ledger, tracker) = tracker();
        let alice = AccountId::new(1);
        let block = btc_deposit(5, "h5", alice, Decimal::ONE);

        tracker.on_block(block.clone()).unwrap();
        tracker.on_block(block).unwrap();
        assert_eq!(tracker.deposits_for(alice).len(), 1);
        assert_eq!(ledger.incoming(alice).get("BTC"), Some(&Decimal::ONE));
    }
}
