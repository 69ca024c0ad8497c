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

use anyhow::{Context, Result, bail};
use arcade_ledger::{
    DEFAULT_DATA_FILE, DEFAULT_STARTING_BALANCE, JsonFileStore, Ledger, LedgerConfig, Store, server,
};
use clap::{Parser, Subcommand};
use csv::Writer;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Arcade Ledger - game currency balances with a durable history
///
/// Serves the JSON API by default. The `users` and `history` subcommands
/// export ledger contents as CSV to stdout instead.
#[derive(Parser, Debug)]
#[command(name = "arcade-ledger")]
#[command(about = "A durable game currency ledger service", long_about = None)]
struct Args {
    /// Path to the ledger JSON document
    ///
    /// Created, along with its directory, if missing.
    #[arg(long, env = "LEDGER_DATA_FILE", default_value = DEFAULT_DATA_FILE)]
    data_file: PathBuf,

    /// Balance given to an account on first reference
    #[arg(long, env = "LEDGER_STARTING_BALANCE", default_value_t = DEFAULT_STARTING_BALANCE)]
    starting_balance: u64,

    /// Address to bind the API to
    #[arg(long, env = "LEDGER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the API to
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (the default)
    Serve,
    /// Write every account's username and balance as CSV
    Users,
    /// Write one account's history as CSV
    History {
        /// Account to export
        username: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let store = JsonFileStore::new(&args.data_file);
    let config = LedgerConfig::with_starting_balance(args.starting_balance);
    let ledger = Ledger::open(store, config)
        .with_context(|| format!("Failed to open ledger `{}`", args.data_file.display()))?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(ledger, &args.host, args.port),
        Command::Users => {
            write_users(&ledger, std::io::stdout()).context("Failed to write users")
        }
        Command::History { username } => write_history(&ledger, &username, std::io::stdout()),
    }
}

/// Logs go to stderr so CSV exports on stdout stay clean.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arcade_ledger=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_server<S: Store>(ledger: Ledger<S>, host: &str, port: u16) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind {host}:{port}"))?;
        server::serve(listener, Arc::new(ledger))
            .await
            .context("Server error")
    })
}

/// Write all accounts as CSV, sorted by username.
///
/// # CSV Format
///
/// ```csv
/// username,balance
/// alice,800
/// bob,1000
/// ```
pub fn write_users<S: Store, W: Write>(ledger: &Ledger<S>, writer: W) -> Result<(), csv::Error> {
    let mut users = ledger.list_users();
    users.sort_by(|a, b| a.username.cmp(&b.username));

    let mut wtr = Writer::from_writer(writer);
    for user in &users {
        wtr.serialize(user)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write one account's history as CSV, oldest entry first.
///
/// # CSV Format
///
/// ```csv
/// ts,game,delta,desc
/// 2025-01-01T00:00:00Z,seed,0,initial seed
/// 2025-01-01T00:01:00Z,slots,-200,charge
/// ```
///
/// # Errors
///
/// Fails if the account does not exist; the export never creates one.
pub fn write_history<S: Store, W: Write>(
    ledger: &Ledger<S>,
    username: &str,
    writer: W,
) -> Result<()> {
    let Some(detail) = ledger.get_user_detail(username)? else {
        bail!("No such user `{}`", username.trim());
    };

    let mut wtr = Writer::from_writer(writer);
    for entry in &detail.history {
        wtr.serialize(entry)?;
    }
    wtr.flush()?;
    Ok(())
}
