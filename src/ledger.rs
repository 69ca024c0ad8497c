// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The balance ledger.
//!
//! The [`Ledger`] owns every account in memory and is the only component that
//! mutates them. Each operation validates its input, applies the change to the
//! account, persists the full state through its [`Store`], and only then
//! reports the result.
//!
//! # Operations
//!
//! | Operation | Effect on balance | History entry |
//! |-----------|-------------------|---------------|
//! | [`Ledger::get_or_create_account`] | none (new accounts get the starting balance) | seed entry on creation |
//! | [`Ledger::save_profile`] | optional overwrite | `manual-save`, delta 0 |
//! | [`Ledger::charge`] | debit, never below zero | `-wager` |
//! | [`Ledger::payout`] | credit | `+amount` |
//! | [`Ledger::admin_set_balance`] | overwrite | `admin-adjust`, `new - old` |
//! | [`Ledger::admin_delete_user`] | account removed | whole history removed |
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`] of `Arc<Account>`, each behind its own
//! mutex. The full check → mutate → persist sequence of an operation runs
//! while holding the account's lock, so concurrent charges cannot
//! double-spend, while different accounts proceed in parallel.
//!
//! Lock discipline:
//! - A map guard and an account lock are never held together. Handles are
//!   cloned out of the map before locking.
//! - Account lock, then the persisted-state lock. Never the reverse.

use crate::account::{Account, AccountRecord, ChargeOutcome, Lifecycle};
use crate::base::{Username, whole_units};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::history::HistoryEntry;
use crate::store::{LedgerState, Store};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Username and balance of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub username: Username,
    pub balance: u64,
}

/// Full view of one account, history included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserDetail {
    pub username: Username,
    pub balance: u64,
    pub history: Vec<HistoryEntry>,
}

/// What a mutation closure wants done with its draft.
enum Step<T> {
    /// Persist the draft and install it.
    Commit(T),
    /// Discard the draft.
    Skip(T),
}

/// Per-user game currency ledger backed by a durable [`Store`].
///
/// # Invariants
///
/// - Balances are never negative; a charge above the balance is refused.
/// - History is append-only; every mutation appends exactly one entry.
/// - In-memory state never runs ahead of the store. A failed save leaves the
///   account as it was before the operation.
pub struct Ledger<S> {
    /// Accounts indexed by username.
    accounts: DashMap<Username, Arc<Account>>,
    /// Mirror of what the store last accepted.
    persisted: Mutex<LedgerState>,
    store: S,
    config: LedgerConfig,
}

impl<S: Store> Ledger<S> {
    /// Loads the persisted state from `store` and builds the ledger around it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] if the store cannot be read or initialized.
    pub fn open(store: S, config: LedgerConfig) -> Result<Self, LedgerError> {
        let state = store.load()?;
        let accounts = DashMap::with_capacity(state.players.len());
        for (username, record) in &state.players {
            let account = Account::restored(username.clone(), record.clone());
            accounts.insert(username.clone(), Arc::new(account));
        }
        info!(
            accounts = state.players.len(),
            starting_balance = config.starting_balance,
            "ledger opened"
        );

        Ok(Self {
            accounts,
            persisted: Mutex::new(state),
            store,
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn starting_balance(&self) -> u64 {
        self.config.starting_balance
    }

    /// Number of persisted accounts.
    pub fn len(&self) -> usize {
        self.persisted.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the account for `username`, creating it if needed.
    ///
    /// New accounts start with the configured balance and a single seed entry,
    /// and are persisted before this returns.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UsernameRequired`] - Username is blank.
    /// - [`LedgerError::Storage`] - The new account could not be persisted.
    pub fn get_or_create_account(&self, username: &str) -> Result<Profile, LedgerError> {
        let username = Username::parse(username)?;
        let balance = self.transact(&username, |record| Ok(Step::Skip(record.balance)))?;
        Ok(Profile { username, balance })
    }

    /// Records a session save, overwriting the balance when a finite one is given.
    ///
    /// The balance is floored and clamped at zero. Returns the resulting balance.
    pub fn save_profile(&self, username: &str, balance: Option<f64>) -> Result<u64, LedgerError> {
        let username = Username::parse(username)?;
        let balance = whole_units(balance);
        let saved = self.transact(&username, |record| Ok(Step::Commit(record.save_profile(balance))))?;
        debug!(%username, balance = saved, "profile saved");
        Ok(saved)
    }

    /// Debits a wager from the account.
    ///
    /// Returns [`ChargeOutcome::InsufficientFunds`] with the unchanged balance
    /// when the account cannot cover the wager; nothing is written in that case.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UsernameRequired`] - Username is blank.
    /// - [`LedgerError::InvalidAmount`] - Amount floors to zero or less, or is
    ///   not a finite number. Checked before the account is looked up.
    /// - [`LedgerError::Storage`] - The debit could not be persisted.
    pub fn charge(
        &self,
        username: &str,
        game: Option<&str>,
        amount: Option<f64>,
        desc: Option<&str>,
    ) -> Result<ChargeOutcome, LedgerError> {
        let username = Username::parse(username)?;
        let wager = positive_units(amount)?;
        let outcome = self.transact(&username, |record| {
            let outcome = record.charge(game, wager, desc)?;
            Ok(if outcome.is_charged() {
                Step::Commit(outcome)
            } else {
                Step::Skip(outcome)
            })
        })?;

        match outcome {
            ChargeOutcome::Charged { balance } => {
                debug!(%username, wager, balance, "charge applied")
            }
            ChargeOutcome::InsufficientFunds { balance } => {
                debug!(%username, wager, balance, "charge refused, insufficient funds")
            }
        }
        Ok(outcome)
    }

    /// Credits winnings to the account. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UsernameRequired`] - Username is blank.
    /// - [`LedgerError::InvalidAmount`] - Amount floors to zero or less, or is
    ///   not a finite number. Checked before the account is looked up.
    /// - [`LedgerError::BalanceOverflow`] - The credit does not fit.
    /// - [`LedgerError::Storage`] - The credit could not be persisted.
    pub fn payout(
        &self,
        username: &str,
        game: Option<&str>,
        amount: Option<f64>,
        desc: Option<&str>,
    ) -> Result<u64, LedgerError> {
        let username = Username::parse(username)?;
        let amount = positive_units(amount)?;
        let balance =
            self.transact(&username, |record| Ok(Step::Commit(record.payout(game, amount, desc)?)))?;
        debug!(%username, amount, balance, "payout applied");
        Ok(balance)
    }

    /// Sets the balance outright, recording `new - old` as the entry's delta.
    ///
    /// A missing or non-finite balance sets it to zero. Returns the new balance.
    /// Callers are trusted; gate this behind whatever admin check the
    /// deployment needs.
    pub fn admin_set_balance(
        &self,
        username: &str,
        balance: Option<f64>,
        note: Option<&str>,
    ) -> Result<u64, LedgerError> {
        let username = Username::parse(username)?;
        let target = whole_units(balance).unwrap_or(0);
        let (balance, delta) = self.transact(&username, |record| {
            let delta = record.set_balance(target, note);
            Ok(Step::Commit((record.balance, delta)))
        })?;
        info!(%username, balance, delta, "balance set by admin");
        Ok(balance)
    }

    /// Removes the account and its whole history.
    ///
    /// Returns `false`, without touching the store, if there was no such account.
    pub fn admin_delete_user(&self, username: &str) -> Result<bool, LedgerError> {
        let username = Username::parse(username)?;
        let Some(account) = self.lookup(&username) else {
            return Ok(false);
        };

        let mut data = account.lock();
        if data.lifecycle != Lifecycle::Live {
            return Ok(false);
        }
        self.persist(&username, None)?;
        data.lifecycle = Lifecycle::Removed;
        drop(data);

        self.unlink(&account);
        info!(%username, "account deleted");
        Ok(true)
    }

    /// Username and balance of every account, in no particular order.
    pub fn list_users(&self) -> Vec<Profile> {
        let handles: Vec<Arc<Account>> = self
            .accounts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        handles
            .iter()
            .filter_map(|account| {
                let data = account.lock();
                (data.lifecycle == Lifecycle::Live).then(|| Profile {
                    username: account.username().clone(),
                    balance: data.record.balance,
                })
            })
            .collect()
    }

    /// Balance and full history of one account.
    ///
    /// Returns `None` for an unknown username; the lookup never creates an account.
    pub fn get_user_detail(&self, username: &str) -> Result<Option<UserDetail>, LedgerError> {
        let username = Username::parse(username)?;
        let Some(account) = self.lookup(&username) else {
            return Ok(None);
        };

        let data = account.lock();
        if data.lifecycle != Lifecycle::Live {
            return Ok(None);
        }
        Ok(Some(UserDetail {
            username,
            balance: data.record.balance,
            history: data.record.history.clone(),
        }))
    }

    fn lookup(&self, username: &Username) -> Option<Arc<Account>> {
        self.accounts.get(username).map(|entry| Arc::clone(entry.value()))
    }

    /// Existing handle for `username`, or a fresh unsaved account.
    fn handle(&self, username: &Username) -> Arc<Account> {
        if let Some(account) = self.lookup(username) {
            return account;
        }
        let entry = self.accounts.entry(username.clone()).or_insert_with(|| {
            Arc::new(Account::fresh(username.clone(), self.config.starting_balance))
        });
        Arc::clone(entry.value())
    }

    /// Drops `account` from the map unless it was already replaced.
    fn unlink(&self, account: &Arc<Account>) {
        self.accounts
            .remove_if(account.username(), |_, current| Arc::ptr_eq(current, account));
    }

    /// Runs `op` on a copy of the account's record under the account lock.
    ///
    /// The account is created (and its seed persisted) first if needed. A
    /// [`Step::Commit`] is persisted before the copy replaces the record.
    fn transact<T>(
        &self,
        username: &Username,
        mut op: impl FnMut(&mut AccountRecord) -> Result<Step<T>, LedgerError>,
    ) -> Result<T, LedgerError> {
        loop {
            let account = self.handle(username);
            let mut data = account.lock();

            match data.lifecycle {
                Lifecycle::Removed => {
                    // Deleted after we fetched the handle; look it up again.
                    drop(data);
                    self.unlink(&account);
                    continue;
                }
                Lifecycle::Unsaved => {
                    if let Err(err) = self.persist(username, Some(&data.record)) {
                        data.lifecycle = Lifecycle::Removed;
                        drop(data);
                        self.unlink(&account);
                        return Err(err);
                    }
                    data.lifecycle = Lifecycle::Live;
                    info!(%username, balance = data.record.balance, "account created");
                }
                Lifecycle::Live => {}
            }

            let mut draft = data.record.clone();
            return match op(&mut draft)? {
                Step::Commit(value) => {
                    self.persist(username, Some(&draft))?;
                    data.record = draft;
                    Ok(value)
                }
                Step::Skip(value) => Ok(value),
            };
        }
    }

    /// Writes one account's new state (or its removal) through the store.
    ///
    /// The mirror is rolled back if the store refuses the write.
    fn persist(&self, username: &Username, record: Option<&AccountRecord>) -> Result<(), LedgerError> {
        let mut state = self.persisted.lock();
        let previous = match record {
            Some(record) => state.players.insert(username.clone(), record.clone()),
            None => state.players.remove(username),
        };

        if let Err(err) = self.store.save(&state) {
            match previous {
                Some(previous) => {
                    state.players.insert(username.clone(), previous);
                }
                None => {
                    state.players.remove(username);
                }
            }
            return Err(err.into());
        }
        Ok(())
    }
}

/// Floors `amount` to whole units and rejects anything not above zero.
fn positive_units(amount: Option<f64>) -> Result<u64, LedgerError> {
    match whole_units(amount) {
        Some(units) if units > 0 => Ok(units),
        _ => Err(LedgerError::InvalidAmount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::open(MemoryStore::new(), LedgerConfig::default()).unwrap()
    }

    #[test]
    fn positive_units_rules() {
        assert_eq!(positive_units(Some(2.9)).unwrap(), 2);
        assert!(matches!(positive_units(Some(0.9)), Err(LedgerError::InvalidAmount)));
        assert!(matches!(positive_units(Some(-3.0)), Err(LedgerError::InvalidAmount)));
        assert!(matches!(positive_units(None), Err(LedgerError::InvalidAmount)));
    }

    #[test]
    fn removed_handle_is_replaced_on_next_access() {
        let ledger = ledger();
        ledger.get_or_create_account("alice").unwrap();
        let stale = ledger.lookup(&Username::parse("alice").unwrap()).unwrap();

        assert!(ledger.admin_delete_user("alice").unwrap());
        assert_eq!(stale.lock().lifecycle, Lifecycle::Removed);

        let fresh = ledger.get_or_create_account("alice").unwrap();
        assert_eq!(fresh.balance, 1000);
        let current = ledger.lookup(&Username::parse("alice").unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&stale, &current));
    }

    #[test]
    fn failed_creation_leaves_no_account_behind() {
        let ledger = ledger();
        ledger.store().set_failing(true);

        let result = ledger.get_or_create_account("bob");
        assert!(matches!(result, Err(LedgerError::Storage(_))));
        assert!(ledger.lookup(&Username::parse("bob").unwrap()).is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn unsaved_account_is_invisible_to_reads() {
        let ledger = ledger();
        let username = Username::parse("carol").unwrap();
        ledger
            .accounts
            .insert(username.clone(), Arc::new(Account::fresh(username, 1000)));

        assert!(ledger.list_users().is_empty());
        assert!(ledger.get_user_detail("carol").unwrap().is_none());
        assert!(!ledger.admin_delete_user("carol").unwrap());
    }
}
