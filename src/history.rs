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

//! Account history entries.
//!
//! Every balance-affecting (or zero-delta) event appends exactly one
//! [`HistoryEntry`]. Entries are never edited or removed except when the whole
//! account is deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Game label of the entry written when an account is created.
pub const SEED_GAME: &str = "seed";
/// Game label for profile saves.
pub const MANUAL_SAVE_GAME: &str = "manual-save";
/// Game label for administrative balance adjustments.
pub const ADMIN_ADJUST_GAME: &str = "admin-adjust";
/// Game label used when a charge or payout does not name its source.
pub const UNKNOWN_GAME: &str = "unknown-game";

/// One immutable record in an account's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    pub game: String,
    pub delta: i64,
    pub desc: String,
}

impl HistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(game: impl Into<String>, delta: i64, desc: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            game: game.into(),
            delta,
            desc: desc.into(),
        }
    }

    /// Uses the labels already found in existing data files.
    pub(crate) fn seed() -> Self {
        Self::new(SEED_GAME, 0, "initial seed")
    }

    pub(crate) fn manual_save() -> Self {
        Self::new(MANUAL_SAVE_GAME, 0, "session save")
    }

    pub(crate) fn charge(game: Option<&str>, wager: u64, desc: Option<&str>) -> Self {
        Self::new(
            label_or(game, UNKNOWN_GAME),
            -(wager as i64),
            label_or(desc, "charge"),
        )
    }

    pub(crate) fn payout(game: Option<&str>, amount: u64, desc: Option<&str>) -> Self {
        Self::new(
            label_or(game, UNKNOWN_GAME),
            amount as i64,
            label_or(desc, "payout"),
        )
    }

    pub(crate) fn admin_adjust(delta: i64, note: Option<&str>) -> Self {
        Self::new(ADMIN_ADJUST_GAME, delta, label_or(note, "admin set balance"))
    }
}

/// Blank labels count as absent.
fn label_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => default,
    }
}
