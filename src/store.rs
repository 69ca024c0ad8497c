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

//! Durable storage for ledger state.
//!
//! The ledger persists its full state through a [`Store`] after every
//! mutation. [`JsonFileStore`] keeps it in a single JSON document:
//!
//! ```json
//! {
//!   "players": {
//!     "alice": {
//!       "balance": 800,
//!       "history": [
//!         { "ts": "2025-01-01T00:00:00Z", "game": "seed", "delta": 0, "desc": "initial seed" },
//!         { "ts": "2025-01-01T00:01:00Z", "game": "slots", "delta": -200, "desc": "charge" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Unreadable documents are not fatal: [`Store::load`] logs them and starts
//! from an empty state.

use crate::account::AccountRecord;
use crate::base::Username;
use crate::error::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Default file name of the ledger document.
pub const DEFAULT_DATA_FILE: &str = "balances.json";

/// Full persisted ledger: every account keyed by username.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub players: BTreeMap<Username, AccountRecord>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Persistence boundary for [`LedgerState`].
pub trait Store: Send + Sync + 'static {
    /// Reads the persisted state.
    ///
    /// A missing resource is initialized with an empty state. Content that does
    /// not parse yields an empty state.
    ///
    /// # Errors
    ///
    /// Storage faults other than corruption, e.g. permission errors.
    fn load(&self) -> Result<LedgerState, StoreError>;

    /// Replaces the persisted state with `state`.
    ///
    /// The write is durable once this returns `Ok`.
    fn save(&self, state: &LedgerState) -> Result<(), StoreError>;
}

/// Stores the ledger as one JSON file, replaced atomically on every save.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))
            }
            _ => Ok(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Store for JsonFileStore {
    fn load(&self) -> Result<LedgerState, StoreError> {
        self.ensure_parent_dir()?;

        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no ledger file found, initializing empty state");
                let state = LedgerState::new();
                self.save(&state)?;
                return Ok(state);
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        match serde_json::from_slice::<LedgerState>(&raw) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    accounts = state.players.len(),
                    "loaded ledger state"
                );
                Ok(state)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ledger file is unreadable, starting from an empty state"
                );
                Ok(LedgerState::new())
            }
        }
    }

    fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.ensure_parent_dir()?;

        // Write to a sibling temp file then rename over the target
        let temp_path = self.temp_path();
        let file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush().map_err(|e| StoreError::io(&temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(writer);

        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        debug!(path = %self.path.display(), accounts = state.players.len(), "ledger saved");
        Ok(())
    }
}

/// In-process store, for tests and benchmarks.
///
/// Can be switched into a failing mode where every save returns
/// [`StoreError::Unavailable`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<LedgerState>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `state`.
    pub fn with_state(state: LedgerState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved state, if any.
    pub fn snapshot(&self) -> Option<LedgerState> {
        self.state.lock().clone()
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<LedgerState, StoreError> {
        let existing = self.state.lock().clone();
        match existing {
            Some(state) => Ok(state),
            None => {
                let state = LedgerState::new();
                self.save(&state)?;
                Ok(state)
            }
        }
    }

    fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        *self.state.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
