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

//! Concurrency and deadlock detection tests using parking_lot's built-in
//! deadlock detector.
//!
//! These tests drive the real ledger from many threads and check that the
//! per-account locking neither deadlocks nor lets concurrent charges
//! double-spend.

use arcade_ledger::{ChargeOutcome, JsonFileStore, Ledger, LedgerConfig, MemoryStore, Store};
use parking_lot::deadlock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn new_ledger(starting_balance: u64) -> Arc<Ledger<MemoryStore>> {
    let config = LedgerConfig::with_starting_balance(starting_balance);
    Arc::new(Ledger::open(MemoryStore::new(), config).unwrap())
}

/// In-memory state must match what the store last accepted.
fn assert_mirrors_store(ledger: &Ledger<MemoryStore>) {
    let state = ledger.store().snapshot().unwrap();
    let users = ledger.list_users();
    assert_eq!(users.len(), state.players.len());
    for user in users {
        let detail = ledger.get_user_detail(user.username.as_str()).unwrap().unwrap();
        let record = &state.players[user.username.as_str()];
        assert_eq!(record.balance, detail.balance, "balance of {}", user.username);
        assert_eq!(record.history, detail.history, "history of {}", user.username);
    }
}

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
}

// === Tests ===

/// Many threads racing to spend the same balance: exactly as many charges
/// succeed as the balance covers.
#[test]
fn concurrent_charges_cannot_double_spend() {
    let detector = start_deadlock_detector();
    let ledger = new_ledger(1000);
    ledger.get_or_create_account("alice").unwrap();

    const NUM_THREADS: usize = 100;
    const WAGER: f64 = 20.0;

    let charged = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(NUM_THREADS);

    for _ in 0..NUM_THREADS {
        let ledger = ledger.clone();
        let charged = charged.clone();
        handles.push(thread::spawn(move || {
            let outcome = ledger.charge("alice", Some("slots"), Some(WAGER), None).unwrap();
            if outcome.is_charged() {
                charged.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(charged.load(Ordering::SeqCst), 50);
    let detail = ledger.get_user_detail("alice").unwrap().unwrap();
    assert_eq!(detail.balance, 0);
    assert_eq!(detail.history.len(), 51);
    assert_mirrors_store(&ledger);
}

/// High contention on one account with mixed charges and payouts.
#[test]
fn no_deadlock_high_contention_single_account() {
    let detector = start_deadlock_detector();
    let ledger = new_ledger(500);

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let charged = Arc::new(AtomicU64::new(0));
    let paid = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();
        let charged = charged.clone();
        let paid = paid.clone();

        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                if (thread_id + i) % 3 == 0 {
                    ledger.payout("hot", Some("dice"), Some(2.0), None).unwrap();
                    paid.fetch_add(2, Ordering::SeqCst);
                } else {
                    match ledger.charge("hot", Some("dice"), Some(5.0), None).unwrap() {
                        ChargeOutcome::Charged { .. } => {
                            charged.fetch_add(5, Ordering::SeqCst);
                        }
                        ChargeOutcome::InsufficientFunds { balance } => assert!(balance < 5),
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let expected = 500 + paid.load(Ordering::SeqCst) - charged.load(Ordering::SeqCst);
    assert_eq!(ledger.get_user_detail("hot").unwrap().unwrap().balance, expected);
    assert_mirrors_store(&ledger);
}

/// Operations spread across accounts while reading others.
#[test]
fn no_deadlock_cross_account_operations() {
    let detector = start_deadlock_detector();
    let ledger = new_ledger(1000);

    const NUM_THREADS: usize = 20;
    const NUM_ACCOUNTS: usize = 10;
    const OPS_PER_THREAD: usize = 50;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();

        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let user = format!("player-{}", (thread_id + i) % NUM_ACCOUNTS);
                if i % 2 == 0 {
                    ledger.payout(&user, None, Some(5.0), None).unwrap();
                } else {
                    ledger.charge(&user, None, Some(1.0), None).unwrap();
                }

                // Also read from a different account
                let other = format!("player-{}", (thread_id + i + 1) % NUM_ACCOUNTS);
                let _ = ledger.get_user_detail(&other).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(ledger.len(), NUM_ACCOUNTS);
    // 500 payouts of 5 and 500 charges of 1, none of which can be refused
    let total: u64 = ledger.list_users().iter().map(|u| u.balance).sum();
    assert_eq!(total, NUM_ACCOUNTS as u64 * 1000 + 500 * 5 - 500);
    assert_mirrors_store(&ledger);
}

/// Listing all accounts while others are being created and mutated.
#[test]
fn no_deadlock_iteration_during_mutation() {
    let detector = start_deadlock_detector();
    let ledger = new_ledger(1000);
    let running = Arc::new(AtomicBool::new(true));

    let mut writers = Vec::new();
    for thread_id in 0..8 {
        let ledger = ledger.clone();
        writers.push(thread::spawn(move || {
            for i in 0..200 {
                let user = format!("w{thread_id}-{}", i % 25);
                ledger.charge(&user, Some("roulette"), Some(3.0), None).unwrap();
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..4 {
        let ledger = ledger.clone();
        let running = running.clone();
        readers.push(thread::spawn(move || {
            let mut iterations = 0usize;
            while running.load(Ordering::SeqCst) {
                for user in ledger.list_users() {
                    assert!(user.balance <= 1000);
                }
                iterations += 1;
            }
            iterations
        }));
    }

    for handle in writers {
        handle.join().expect("Thread panicked");
    }
    running.store(false, Ordering::SeqCst);
    for handle in readers {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(ledger.list_users().len(), 8 * 25);
    assert_mirrors_store(&ledger);
}

/// Deleting and recreating the same user under load.
#[test]
fn no_deadlock_delete_and_recreate_churn() {
    let detector = start_deadlock_detector();
    let ledger = new_ledger(1000);

    const NUM_THREADS: usize = 16;
    const OPS_PER_THREAD: usize = 200;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let ledger = ledger.clone();
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                match (thread_id + i) % 5 {
                    0 => {
                        ledger.admin_delete_user("churn").unwrap();
                    }
                    1 => {
                        ledger.admin_set_balance("churn", Some(250.0), None).unwrap();
                    }
                    2 => {
                        ledger.payout("churn", None, Some(10.0), None).unwrap();
                    }
                    3 => {
                        let _ = ledger.list_users();
                    }
                    _ => {
                        ledger.charge("churn", None, Some(10.0), None).unwrap();
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Whatever survived must be a well-formed account that starts with a seed
    if let Some(detail) = ledger.get_user_detail("churn").unwrap() {
        assert_eq!(detail.history[0].game, "seed");
        assert_eq!(detail.history.iter().filter(|e| e.game == "seed").count(), 1);
    }
    assert!(ledger.len() <= 1);
    assert_mirrors_store(&ledger);
}

/// The file-backed store under concurrent writers ends with a consistent document.
#[test]
fn no_deadlock_file_store_concurrent_writers() {
    let detector = start_deadlock_detector();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("balances.json");
    let ledger = Arc::new(Ledger::open(JsonFileStore::new(&path), LedgerConfig::default()).unwrap());

    let mut handles = Vec::new();
    for thread_id in 0..8 {
        let ledger = ledger.clone();
        handles.push(thread::spawn(move || {
            let user = format!("file-{thread_id}");
            for _ in 0..10 {
                ledger.charge(&user, None, Some(7.0), None).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    let on_disk = JsonFileStore::new(&path).load().unwrap();
    assert_eq!(on_disk.players.len(), 8);
    for record in on_disk.players.values() {
        assert_eq!(record.balance, 1000 - 70);
        assert_eq!(record.history.len(), 11);
    }
}
