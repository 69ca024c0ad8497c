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

//! Account management.
//!
//! An [`AccountRecord`] is the plain balance + history pair that gets
//! persisted. An `Account` wraps a record in a mutex together with its
//! lifecycle state so the ledger can run the whole
//! check → mutate → persist sequence under one per-account lock.
//!
//! # Example
//!
//! ```
//! use arcade_ledger::{AccountRecord, ChargeOutcome};
//!
//! let mut record = AccountRecord::seeded(1000);
//! assert_eq!(record.charge(Some("slots"), 200, None).unwrap(), ChargeOutcome::Charged { balance: 800 });
//! assert_eq!(record.history.len(), 2);
//! ```

use crate::base::{MAX_UNITS, Username};
use crate::error::LedgerError;
use crate::history::HistoryEntry;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Result of a charge that passed input validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The wager was debited.
    Charged { balance: u64 },
    /// The balance does not cover the wager. Nothing changed.
    InsufficientFunds { balance: u64 },
}

impl ChargeOutcome {
    pub fn balance(&self) -> u64 {
        match self {
            Self::Charged { balance } | Self::InsufficientFunds { balance } => *balance,
        }
    }

    pub fn is_charged(&self) -> bool {
        matches!(self, Self::Charged { .. })
    }
}

/// Persisted state of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub balance: u64,
    /// Oldest first.
    pub history: Vec<HistoryEntry>,
}

impl AccountRecord {
    /// A new account holding `starting_balance` with its seed entry.
    pub fn seeded(starting_balance: u64) -> Self {
        Self {
            balance: starting_balance.min(MAX_UNITS),
            history: vec![HistoryEntry::seed()],
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance <= MAX_UNITS,
            "Invariant violated: balance above representable range: {}",
            self.balance
        );
    }

    /// Overwrites the balance when one is given and records a session save.
    pub fn save_profile(&mut self, balance: Option<u64>) -> u64 {
        if let Some(balance) = balance {
            self.balance = balance.min(MAX_UNITS);
        }
        self.history.push(HistoryEntry::manual_save());
        self.assert_invariants();
        self.balance
    }

    /// Debits `wager` if the balance covers it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] if `wager` is zero or above [`MAX_UNITS`].
    pub fn charge(
        &mut self,
        game: Option<&str>,
        wager: u64,
        desc: Option<&str>,
    ) -> Result<ChargeOutcome, LedgerError> {
        if wager == 0 || wager > MAX_UNITS {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < wager {
            return Ok(ChargeOutcome::InsufficientFunds {
                balance: self.balance,
            });
        }
        self.balance -= wager;
        self.history.push(HistoryEntry::charge(game, wager, desc));
        self.assert_invariants();
        Ok(ChargeOutcome::Charged {
            balance: self.balance,
        })
    }

    /// Credits `amount`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] if `amount` is zero or above [`MAX_UNITS`].
    /// - [`LedgerError::BalanceOverflow`] if the new balance would exceed [`MAX_UNITS`].
    pub fn payout(
        &mut self,
        game: Option<&str>,
        amount: u64,
        desc: Option<&str>,
    ) -> Result<u64, LedgerError> {
        if amount == 0 || amount > MAX_UNITS {
            return Err(LedgerError::InvalidAmount);
        }
        let balance = self
            .balance
            .checked_add(amount)
            .filter(|b| *b <= MAX_UNITS)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.balance = balance;
        self.history.push(HistoryEntry::payout(game, amount, desc));
        self.assert_invariants();
        Ok(self.balance)
    }

    /// Sets the balance outright and records the difference.
    ///
    /// Returns the recorded delta.
    pub fn set_balance(&mut self, balance: u64, note: Option<&str>) -> i64 {
        let balance = balance.min(MAX_UNITS);
        let delta = balance as i128 - self.balance as i128;
        let delta = i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX });
        self.balance = balance;
        self.history.push(HistoryEntry::admin_adjust(delta, note));
        self.assert_invariants();
        delta
    }
}

/// Where an in-memory account stands relative to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    /// Created in memory; the seed state has not been persisted yet.
    Unsaved,
    /// Persisted and visible.
    Live,
    /// Deleted. Holders of a stale handle must look the username up again.
    Removed,
}

#[derive(Debug)]
pub(crate) struct AccountData {
    pub(crate) record: AccountRecord,
    pub(crate) lifecycle: Lifecycle,
}

/// Ledger account.
#[derive(Debug)]
pub(crate) struct Account {
    username: Username,
    inner: Mutex<AccountData>,
}

impl Account {
    pub(crate) fn fresh(username: Username, starting_balance: u64) -> Self {
        Self {
            username,
            inner: Mutex::new(AccountData {
                record: AccountRecord::seeded(starting_balance),
                lifecycle: Lifecycle::Unsaved,
            }),
        }
    }

    pub(crate) fn restored(username: Username, record: AccountRecord) -> Self {
        Self {
            username,
            inner: Mutex::new(AccountData {
                record,
                lifecycle: Lifecycle::Live,
            }),
        }
    }

    pub(crate) fn username(&self) -> &Username {
        &self.username
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_record_has_one_entry() {
        let record = AccountRecord::seeded(1000);
        assert_eq!(record.balance, 1000);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.history[0].game, "seed");
        assert_eq!(record.history[0].delta, 0);
    }

    #[test]
    fn charge_exact_balance_drains_to_zero() {
        let mut record = AccountRecord::seeded(100);
        let outcome = record.charge(None, 100, None).unwrap();
        assert_eq!(outcome, ChargeOutcome::Charged { balance: 0 });
        assert_eq!(record.history.last().unwrap().delta, -100);
    }

    #[test]
    fn insufficient_funds_leaves_record_untouched() {
        let mut record = AccountRecord::seeded(100);
        let before = record.clone();
        let outcome = record.charge(Some("slots"), 101, None).unwrap();
        assert_eq!(outcome, ChargeOutcome::InsufficientFunds { balance: 100 });
        assert!(!outcome.is_charged());
        assert_eq!(record, before);
    }

    #[test]
    fn zero_amounts_are_invalid() {
        let mut record = AccountRecord::seeded(100);
        assert!(matches!(record.charge(None, 0, None), Err(LedgerError::InvalidAmount)));
        assert!(matches!(record.payout(None, 0, None), Err(LedgerError::InvalidAmount)));
        assert_eq!(record.history.len(), 1);
    }

    #[test]
    fn payout_overflow_is_rejected() {
        let mut record = AccountRecord::seeded(MAX_UNITS);
        let result = record.payout(None, 1, None);
        assert!(matches!(result, Err(LedgerError::BalanceOverflow)));
        assert_eq!(record.balance, MAX_UNITS);
        assert_eq!(record.history.len(), 1);
    }

    #[test]
    fn set_balance_records_difference() {
        let mut record = AccountRecord::seeded(1300);
        assert_eq!(record.set_balance(1000, Some("reset")), -300);
        assert_eq!(record.balance, 1000);
        assert_eq!(record.set_balance(2500, None), 1500);

        let last = record.history.last().unwrap();
        assert_eq!(last.game, "admin-adjust");
        assert_eq!(last.desc, "admin set balance");
    }

    #[test]
    fn save_profile_always_appends() {
        let mut record = AccountRecord::seeded(1000);
        assert_eq!(record.save_profile(None), 1000);
        assert_eq!(record.save_profile(Some(42)), 42);
        assert_eq!(record.history.len(), 3);
        assert!(record.history[1..].iter().all(|e| e.game == "manual-save" && e.delta == 0));
    }

    #[test]
    fn fresh_account_starts_unsaved() {
        let account = Account::fresh(Username::parse("alice").unwrap(), 1000);
        let data = account.lock();
        assert_eq!(data.lifecycle, Lifecycle::Unsaved);
        assert_eq!(data.record.balance, 1000);
        assert_eq!(data.record.history.len(), 1);
        drop(data);
        assert_eq!(account.username().as_str(), "alice");
    }
}
