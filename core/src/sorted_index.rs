//! Balance-ordered counterparty index.
//!
//! One instance tracks, per (market, side), the set of users with a
//! positive balance in one field of their position, keyed by that raw
//! unit balance. Every entry of an index scales by the same exchange
//! index, so unit order is underlying order and keys stay exact as the
//! index grows. Backed by a `BTreeMap` so every operation is O(log n);
//! an unordered structure would make counterparty selection O(n) and
//! is rejected.
//!
//! Equal balances are tie-broken by insertion order through a monotone
//! sequence number, so extraction is deterministic and replayable:
//! among equal balances `extract_largest` yields the oldest entry and
//! `extract_smallest` the newest.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Sort key: balance first, then an age component derived from the
/// insertion sequence (`u64::MAX - seq`), so that newer entries sort
/// below older ones within the same balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct SortKey {
    balance: U256,
    age: u64,
}

/// Balance-ordered set of (user, balance) entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "IndexSnapshot", into = "IndexSnapshot")]
pub struct SortedIndex {
    entries: BTreeMap<SortKey, Address>,
    by_user: HashMap<Address, SortKey>,
    next_seq: u64,
}

impl SortedIndex {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_user: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, user: &Address) -> bool {
        self.by_user.contains_key(user)
    }

    pub fn balance_of(&self, user: &Address) -> Option<U256> {
        self.by_user.get(user).map(|key| key.balance)
    }

    /// Insert or reposition a user at the given balance. A zero balance
    /// removes the entry; a balance change removes and reinserts it so
    /// the sort key stays consistent.
    pub fn upsert(&mut self, user: Address, balance: U256) {
        if let Some(old) = self.by_user.remove(&user) {
            self.entries.remove(&old);
        }
        if balance.is_zero() {
            return;
        }
        let key = SortKey {
            balance,
            age: u64::MAX - self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, user);
        self.by_user.insert(user, key);
    }

    /// Remove a user's entry, returning its balance if present
    pub fn remove(&mut self, user: &Address) -> Option<U256> {
        let key = self.by_user.remove(user)?;
        self.entries.remove(&key);
        Some(key.balance)
    }

    /// Remove and return the entry with the largest balance
    /// (oldest first among equals)
    pub fn extract_largest(&mut self) -> Option<(Address, U256)> {
        let (key, user) = self.entries.pop_last()?;
        self.by_user.remove(&user);
        Some((user, key.balance))
    }

    /// Remove and return the entry with the smallest balance
    /// (newest first among equals)
    pub fn extract_smallest(&mut self) -> Option<(Address, U256)> {
        let (key, user) = self.entries.pop_first()?;
        self.by_user.remove(&user);
        Some((user, key.balance))
    }

    pub fn peek_largest(&self) -> Option<(Address, U256)> {
        self.entries
            .last_key_value()
            .map(|(key, user)| (*user, key.balance))
    }

    pub fn peek_smallest(&self) -> Option<(Address, U256)> {
        self.entries
            .first_key_value()
            .map(|(key, user)| (*user, key.balance))
    }
}

impl Default for SortedIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized form: ordered entry list plus the sequence counter, since
/// JSON map keys must be strings and the tree key is composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    next_seq: u64,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    user: Address,
    balance: U256,
    age: u64,
}

impl From<SortedIndex> for IndexSnapshot {
    fn from(index: SortedIndex) -> Self {
        Self {
            next_seq: index.next_seq,
            entries: index
                .entries
                .into_iter()
                .map(|(key, user)| IndexEntry {
                    user,
                    balance: key.balance,
                    age: key.age,
                })
                .collect(),
        }
    }
}

impl From<IndexSnapshot> for SortedIndex {
    fn from(snapshot: IndexSnapshot) -> Self {
        let mut index = SortedIndex::new();
        index.next_seq = snapshot.next_seq;
        for entry in snapshot.entries {
            let key = SortKey {
                balance: entry.balance,
                age: entry.age,
            };
            index.entries.insert(key, entry.user);
            index.by_user.insert(entry.user, key);
        }
        index
    }
}
