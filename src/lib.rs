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

//! # Arcade Ledger
//!
//! This library tracks a per-user game currency balance with an append-only
//! history, persisted to disk after every change. Game clients charge wagers
//! and pay out winnings; an admin panel lists, inspects, adjusts and deletes
//! accounts.
//!
//! ## Core Components
//!
//! - [`Ledger`]: In-memory authority over all accounts and their mutation rules
//! - [`Store`]: Persistence boundary ([`JsonFileStore`], [`MemoryStore`])
//! - [`AccountRecord`]: Balance plus ordered [`HistoryEntry`] list
//! - [`LedgerError`]: Error types for ledger operations
//! - [`server`]: JSON-over-HTTP API around a [`Ledger`]
//!
//! ## Example
//!
//! ```
//! use arcade_ledger::{ChargeOutcome, Ledger, LedgerConfig, MemoryStore};
//!
//! let ledger = Ledger::open(MemoryStore::new(), LedgerConfig::default()).unwrap();
//!
//! // First reference creates the account with the starting balance
//! let profile = ledger.get_or_create_account("alice").unwrap();
//! assert_eq!(profile.balance, 1000);
//!
//! // Charge a wager
//! let outcome = ledger.charge("alice", Some("slots"), Some(200.0), None).unwrap();
//! assert_eq!(outcome, ChargeOutcome::Charged { balance: 800 });
//!
//! // Charges above the balance are refused without touching the account
//! let outcome = ledger.charge("alice", Some("slots"), Some(900.0), None).unwrap();
//! assert_eq!(outcome, ChargeOutcome::InsufficientFunds { balance: 800 });
//! ```
//!
//! ## Thread Safety
//!
//! The ledger locks per account, so concurrent operations on different users
//! run in parallel while operations on the same user are serialized.

pub mod account;
mod base;
mod config;
pub mod error;
mod history;
mod ledger;
pub mod server;
pub mod store;

pub use account::{AccountRecord, ChargeOutcome};
pub use base::{MAX_UNITS, Username, whole_units};
pub use config::{DEFAULT_STARTING_BALANCE, LedgerConfig};
pub use error::{LedgerError, StoreError};
pub use history::{ADMIN_ADJUST_GAME, HistoryEntry, MANUAL_SAVE_GAME, SEED_GAME, UNKNOWN_GAME};
pub use ledger::{Ledger, Profile, UserDetail};
pub use store::{DEFAULT_DATA_FILE, JsonFileStore, LedgerState, MemoryStore, Store};
