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

//! Core value types: account usernames and whole-unit amounts.

use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Largest amount, in whole units, a single operation may move.
///
/// Keeps every history delta representable as an `i64`.
pub const MAX_UNITS: u64 = i64::MAX as u64;

/// Unique, case-sensitive identifier for an account.
///
/// Always non-empty and free of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Username(String);

impl Username {
    /// Trims `raw` and validates that something is left.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::UsernameRequired`] if `raw` is empty or only whitespace.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::UsernameRequired);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = LedgerError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Converts a caller-supplied number into whole currency units.
///
/// Finite values are floored and clamped to `0..=MAX_UNITS`. Absent or
/// non-finite values (`NaN`, infinities) yield `None`.
pub fn whole_units(value: Option<f64>) -> Option<u64> {
    let value = value.filter(|v| v.is_finite())?;
    let floored = value.floor();
    if floored <= 0.0 {
        Some(0)
    } else if floored >= MAX_UNITS as f64 {
        Some(MAX_UNITS)
    } else {
        Some(floored as u64)
    }
}
