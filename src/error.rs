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

//! Error types for ledger operations and persistence.
//!
//! Business outcomes that the caller is expected to react to (insufficient
//! funds, unknown user on admin lookup) are not errors; they are returned as
//! values. See [`crate::ChargeOutcome`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Username is missing or blank after trimming
    #[error("username is required")]
    UsernameRequired,

    /// Charge or payout amount resolved to zero or less
    #[error("invalid amount (must be a positive whole number)")]
    InvalidAmount,

    /// Credit would exceed the representable balance
    #[error("balance would overflow")]
    BalanceOverflow,

    /// Persisting or loading ledger state failed
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl LedgerError {
    /// Machine-readable code surfaced to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UsernameRequired => "USERNAME_REQUIRED",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::BalanceOverflow => "BALANCE_OVERFLOW",
            Self::Storage(_) => "SERVER_ERROR",
        }
    }

    /// True for errors caused by caller input rather than by the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Durable store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem access to the backing file failed
    #[error("i/o error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Ledger state could not be encoded
    #[error("failed to encode ledger state: {0}")]
    Encode(#[from] serde_json::Error),

    /// Store was configured to refuse writes
    #[error("store is unavailable")]
    Unavailable,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
