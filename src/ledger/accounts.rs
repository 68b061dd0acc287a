// ============================================================================
// Ledger
// Per-account balances with atomic multi-account batches
// ============================================================================

use super::entry::{LedgerEntry, PostingPolicy};
use crate::domain::{AccountId, Balance};
use crate::errors::LedgerError;
use crate::numeric::Amount;
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Balances and flags of one account, guarded by its own mutex
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    balances: HashMap<String, Balance>,
    /// Pending deposits, display only
    incoming: HashMap<String, Amount>,
    frozen: bool,
}

impl AccountState {
    pub fn balance(&self, asset: &str) -> Balance {
        self.balances.get(asset).cloned().unwrap_or_default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

/// Account table.
///
/// Each account has its own lock. A batch touching several accounts takes
/// their locks in ascending account id order, applies every entry to scratch
/// copies and commits only if no user balance ends negative.
pub struct Ledger {
    accounts: SkipMap<AccountId, Arc<Mutex<AccountState>>>,
    insurance_fund: AccountId,
    postings: AtomicU64,
    /// Ledger-wide stop on external withdrawals
    withdrawals_suspended: AtomicBool,
}

impl Ledger {
    pub fn new(insurance_fund: AccountId) -> Self {
        Self {
            accounts: SkipMap::new(),
            insurance_fund,
            postings: AtomicU64::new(0),
            withdrawals_suspended: AtomicBool::new(false),
        }
    }

    pub fn insurance_fund(&self) -> AccountId {
        self.insurance_fund
    }

    // ========================================================================
    // Posting
    // ========================================================================

    /// Apply `entries` all-or-nothing
    pub fn post_entries(
        &self,
        entries: &[LedgerEntry],
        policy: PostingPolicy,
    ) -> Result<(), LedgerError> {
        let mut ids: BTreeSet<AccountId> = entries.iter().map(|e| e.account_id).collect();
        if matches!(policy, PostingPolicy::CoverShortfall(_)) {
            ids.insert(self.insurance_fund);
        }

        // BTreeSet iterates ascending, which fixes the lock order
        let handles: Vec<(AccountId, Arc<Mutex<AccountState>>)> =
            ids.iter().map(|id| (*id, self.account(*id))).collect();
        let mut guards: Vec<(AccountId, MutexGuard<'_, AccountState>)> = handles
            .iter()
            .map(|(id, handle)| (*id, handle.lock()))
            .collect();

        let mut scratch: BTreeMap<(AccountId, String), Balance> = BTreeMap::new();
        for entry in entries.iter().filter(|e| !e.is_noop()) {
            let balance = load(&mut scratch, &guards, entry.account_id, &entry.asset);
            entry.apply(balance);
        }

        if let PostingPolicy::CoverShortfall(covered) = policy {
            let shortfalls: Vec<(String, Amount)> = scratch
                .iter()
                .filter(|((id, _), balance)| *id == covered && balance.available < Decimal::ZERO)
                .map(|((_, asset), balance)| (asset.clone(), -balance.available))
                .collect();

            for (asset, shortfall) in shortfalls {
                tracing::warn!(
                    account = %covered,
                    asset = %asset,
                    shortfall = %shortfall,
                    "insurance fund covering shortfall"
                );
                load(&mut scratch, &guards, covered, &asset).credit(shortfall);
                load(&mut scratch, &guards, self.insurance_fund, &asset).debit(shortfall);
            }
        }

        for ((id, asset), balance) in &scratch {
            let refused = if self.may_run_deficit(*id) {
                balance.locked < Decimal::ZERO
            } else {
                !balance.is_solvent()
            };
            if refused {
                tracing::debug!(account = %id, asset = %asset, "ledger batch refused");
                return Err(LedgerError::InsufficientBalance {
                    account_id: *id,
                    asset: asset.clone(),
                });
            }
        }

        for ((id, asset), balance) in scratch {
            if let Some(state) = guard_mut(&mut guards, id) {
                state.balances.insert(asset, balance);
            }
        }
        self.postings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Credit an external deposit
    pub fn deposit(
        &self,
        account_id: AccountId,
        asset: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let credit = LedgerEntry::credit(account_id, asset, amount);
        self.post_entries(&[credit], PostingPolicy::Strict)
    }

    /// Debit an external withdrawal; refused while the account is frozen or
    /// withdrawals are suspended
    pub fn withdraw(
        &self,
        account_id: AccountId,
        asset: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if self.withdrawals_suspended() {
            return Err(LedgerError::WithdrawalsSuspended);
        }
        let handle = self.account(account_id);
        let mut state = handle.lock();
        if state.frozen {
            return Err(LedgerError::AccountFrozen { account_id });
        }

        let mut balance = state.balance(asset);
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        if balance.available < amount {
            return Err(LedgerError::InsufficientBalance {
                account_id,
                asset: asset.to_string(),
            });
        }
        balance.debit(amount);
        state.balances.insert(asset.to_string(), balance);
        self.postings.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // ========================================================================
    // Flags and display values
    // ========================================================================

    pub fn freeze(&self, account_id: AccountId) {
        self.account(account_id).lock().frozen = true;
    }

    pub fn unfreeze(&self, account_id: AccountId) {
        self.account(account_id).lock().frozen = false;
    }

    /// Returns false if withdrawals were already suspended
    pub fn suspend_withdrawals(&self) -> bool {
        !self.withdrawals_suspended.swap(true, Ordering::AcqRel)
    }

    /// Returns false if withdrawals were not suspended
    pub fn resume_withdrawals(&self) -> bool {
        self.withdrawals_suspended.swap(false, Ordering::AcqRel)
    }

    pub fn withdrawals_suspended(&self) -> bool {
        self.withdrawals_suspended.load(Ordering::Acquire)
    }

    pub fn is_frozen(&self, account_id: AccountId) -> bool {
        self.accounts
            .get(&account_id)
            .is_some_and(|entry| entry.value().lock().frozen)
    }

    /// Adjust the pending-deposit display value by `delta`
    pub fn adjust_incoming(&self, account_id: AccountId, asset: &str, delta: Amount) {
        let handle = self.account(account_id);
        let mut state = handle.lock();
        let incoming = state.incoming.entry(asset.to_string()).or_default();
        *incoming = (*incoming + delta).max(Decimal::ZERO);
        if incoming.is_zero() {
            state.incoming.remove(asset);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn balance(&self, account_id: AccountId, asset: &str) -> Balance {
        self.accounts
            .get(&account_id)
            .map(|entry| entry.value().lock().balance(asset))
            .unwrap_or_default()
    }

    /// Every non-empty balance of an account
    pub fn balances(&self, account_id: AccountId) -> HashMap<String, Balance> {
        self.accounts
            .get(&account_id)
            .map(|entry| {
                entry
                    .value()
                    .lock()
                    .balances
                    .iter()
                    .filter(|(_, balance)| !balance.is_zero())
                    .map(|(asset, balance)| (asset.clone(), balance.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn incoming(&self, account_id: AccountId) -> HashMap<String, Amount> {
        self.accounts
            .get(&account_id)
            .map(|entry| entry.value().lock().incoming.clone())
            .unwrap_or_default()
    }

    /// Sum of `total` for `asset` across every account, system accounts included
    pub fn total_supply(&self, asset: &str) -> Amount {
        self.accounts
            .iter()
            .map(|entry| entry.value().lock().balance(asset).total)
            .sum()
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|entry| *entry.key()).collect()
    }

    /// `total == available + locked` everywhere and no user balance negative
    pub fn check_invariants(&self) -> bool {
        self.accounts.iter().all(|entry| {
            let id = *entry.key();
            let state = entry.value().lock();
            state
                .balances
                .values()
                .all(|b| b.check_invariant() && (self.may_run_deficit(id) || b.is_solvent()))
        })
    }

    pub fn posting_count(&self) -> u64 {
        self.postings.load(Ordering::Relaxed)
    }

    /// System accounts and the configured insurance fund may hold a negative
    /// available balance
    fn may_run_deficit(&self, account_id: AccountId) -> bool {
        account_id.is_system() || account_id == self.insurance_fund
    }

    fn account(&self, account_id: AccountId) -> Arc<Mutex<AccountState>> {
        if let Some(entry) = self.accounts.get(&account_id) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .accounts
            .get_or_insert(account_id, Arc::new(Mutex::new(AccountState::default())));
        Arc::clone(entry.value())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(AccountId::INSURANCE_FUND)
    }
}

fn guard_mut<'a, 'g>(
    guards: &'a mut [(AccountId, MutexGuard<'g, AccountState>)],
    account_id: AccountId,
) -> Option<&'a mut AccountState> {
    guards
        .binary_search_by_key(&account_id, |(id, _)| *id)
        .ok()
        .map(|index| &mut *guards[index].1)
}

/// Scratch copy of a balance, loaded from the locked account on first touch
fn load<'s>(
    scratch: &'s mut BTreeMap<(AccountId, String), Balance>,
    guards: &[(AccountId, MutexGuard<'_, AccountState>)],
    account_id: AccountId,
    asset: &str,
) -> &'s mut Balance {
    match scratch.entry((account_id, asset.to_string())) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let current = guards
                .binary_search_by_key(&account_id, |(id, _)| *id)
                .ok()
                .map(|index| guards[index].1.balance(asset))
                .unwrap_or_default();
            entry.insert(current)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn funded(account: u64, usd: i64) -> Ledger {
        let ledger = Ledger::default();
        ledger.deposit(AccountId::new(account), "USD", Decimal::from(usd)).unwrap();
        ledger
    }

    #[test]
    fn test_batch_is_atomic() {
        let ledger = funded(1, 100);
        let a = AccountId::new(1);
        let b = AccountId::new(2);

        let result = ledger.post_entries(
            &[
                LedgerEntry::credit(b, "USD", Decimal::from(50)),
                LedgerEntry::debit(a, "USD", Decimal::from(150)),
            ],
            PostingPolicy::Strict,
        );

        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                account_id: a,
                asset: "USD".to_string()
            })
        );
        assert_eq!(ledger.balance(b, "USD").total, Decimal::ZERO);
        assert_eq!(ledger.balance(a, "USD").total, Decimal::from(100));
    }

    #[test]
    fn test_transfer_between_accounts() {
        let ledger = funded(1, 100);
        let a = AccountId::new(1);
        let b = AccountId::new(2);

        ledger
            .post_entries(
                &[
                    LedgerEntry::lock(a, "USD", Decimal::from(40)),
                    LedgerEntry::debit_locked(a, "USD", Decimal::from(40)),
                    LedgerEntry::credit(b, "USD", Decimal::from(40)),
                ],
                PostingPolicy::Strict,
            )
            .unwrap();

        assert_eq!(ledger.balance(a, "USD"), Balance::new(Decimal::from(60)));
        assert_eq!(ledger.balance(b, "USD"), Balance::new(Decimal::from(40)));
        assert_eq!(ledger.total_supply("USD"), Decimal::from(100));
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_shortfall_drawn_from_insurance_fund() {
        let ledger = funded(1, 10);
        let a = AccountId::new(1);
        let b = AccountId::new(2);

        ledger
            .post_entries(
                &[
                    LedgerEntry::debit(a, "USD", Decimal::from(25)),
                    LedgerEntry::credit(b, "USD", Decimal::from(25)),
                ],
                PostingPolicy::CoverShortfall(a),
            )
            .unwrap();

        assert_eq!(ledger.balance(a, "USD").total, Decimal::ZERO);
        assert_eq!(ledger.balance(b, "USD").total, Decimal::from(25));
        assert_eq!(ledger.balance(AccountId::INSURANCE_FUND, "USD").total, Decimal::from(-15));
        assert!(ledger.check_invariants());
    }

    #[test]
    fn test_cover_applies_only_to_named_account() {
        let ledger = funded(1, 10);
        let result = ledger.post_entries(
            &[LedgerEntry::debit(AccountId::new(2), "USD", Decimal::ONE)],
            PostingPolicy::CoverShortfall(AccountId::new(1)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_frozen_account_cannot_withdraw() {
        let ledger = funded(1, 100);
        let a = AccountId::new(1);

        ledger.freeze(a);
        assert_eq!(
            ledger.withdraw(a, "USD", Decimal::ONE),
            Err(LedgerError::AccountFrozen { account_id: a })
        );

        ledger.unfreeze(a);
        ledger.withdraw(a, "USD", Decimal::from(30)).unwrap();
        assert_eq!(ledger.balance(a, "USD").available, Decimal::from(70));
        assert!(ledger.withdraw(a, "USD", Decimal::from(71)).is_err());
    }

    #[test]
    fn test_suspended_withdrawals_refused_for_every_account() {
        let ledger = funded(1, 100);
        let a = AccountId::new(1);

        assert!(ledger.suspend_withdrawals());
        assert!(!ledger.suspend_withdrawals());
        assert_eq!(
            ledger.withdraw(a, "USD", Decimal::ONE),
            Err(LedgerError::WithdrawalsSuspended)
        );
        // Deposits still land
        ledger.deposit(a, "USD", Decimal::ONE).unwrap();

        assert!(ledger.resume_withdrawals());
        ledger.withdraw(a, "USD", Decimal::from(101)).unwrap();
        assert_eq!(ledger.balance(a, "USD").total, Decimal::ZERO);
    }

    #[test]
    fn test_incoming_display() {
        let ledger = Ledger::default();
        let a = AccountId::new(1);
        ledger.adjust_incoming(a, "BTC", Decimal::ONE);
        assert_eq!(ledger.incoming(a).get("BTC"), Some(&Decimal::ONE));
        ledger.adjust_incoming(a, "BTC", -Decimal::ONE);
        assert!(ledger.incoming(a).is_empty());
    }

    #[test]
    fn test_concurrent_opposing_transfers() {
        let ledger = Arc::new(Ledger::default());
        let a = AccountId::new(1);
        let b = AccountId::new(2);
        ledger.deposit(a, "USD", Decimal::from(1000)).unwrap();
        ledger.deposit(b, "USD", Decimal::from(1000)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _ = ledger.post_entries(
                            &[
                                LedgerEntry::debit(from, "USD", Decimal::ONE),
                                LedgerEntry::credit(to, "USD", Decimal::ONE),
                            ],
                            PostingPolicy::Strict,
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.total_supply("USD"), Decimal::from(2000));
        assert!(ledger.check_invariants());
    }

    #[quickcheck]
    fn prop_invariant_survives_any_batch(ops: Vec<(u8, u8, u16)>) -> bool {
        let ledger = Ledger::default();
        for account in 0..3u64 {
            ledger.deposit(AccountId::new(account), "USD", Decimal::from(500)).unwrap();
        }

        for chunk in ops.chunks(3) {
            let batch: Vec<LedgerEntry> = chunk
                .iter()
                .map(|(kind, account, amount)| {
                    let account = AccountId::new(u64::from(*account % 3));
                    let amount = Decimal::from(*amount % 300);
                    match kind % 5 {
                        0 => LedgerEntry::credit(account, "USD", amount),
                        1 => LedgerEntry::debit(account, "USD", amount),
                        2 => LedgerEntry::lock(account, "USD", amount),
                        3 => LedgerEntry::unlock(account, "USD", amount),
                        _ => LedgerEntry::debit_locked(account, "USD", amount),
                    }
                })
                .collect();
            let _ = ledger.post_entries(&batch, PostingPolicy::Strict);
            if !ledger.check_invariants() {
                return false;
            }
        }
        true
    }
}
