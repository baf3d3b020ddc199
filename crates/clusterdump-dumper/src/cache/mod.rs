//! In-memory identity cache shared by all workers of one run
//!
//! The cache records which identities a run has already seen. Its overwrite
//! policy is fixed at construction:
//!
//! | existing entry | `strict` | `expect_overwrite` | outcome |
//! |---|---|---|---|
//! | no  | any   | any   | stored |
//! | yes | true  | any   | rejected with the existing value |
//! | yes | false | false | duplicate counted and logged, overwritten |
//! | yes | false | true  | overwritten silently |
//!
//! One mutex guards the whole table, so every put and read is linearizable.

mod key;

pub use key::{CacheKey, ObjectKey, UidKey};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Overwrite policy of a [`MemCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Reject a put for a key that already exists (test-and-set)
    #[serde(default)]
    pub strict: bool,

    /// Overwrites are expected; do not count or log them
    #[serde(default)]
    pub expect_overwrite: bool,
}

impl CacheOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            expect_overwrite: false,
        }
    }

    pub fn expect_overwrite() -> Self {
        Self {
            strict: false,
            expect_overwrite: true,
        }
    }
}

/// A strict-mode put found an existing entry.
///
/// Carries the value that is still stored under the key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConflict<V> {
    pub key: String,
    pub existing: V,
}

impl<V> fmt::Display for CacheConflict<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache entry {} already exists", self.key)
    }
}

impl<V: fmt::Debug> std::error::Error for CacheConflict<V> {}

/// Write accounting for one shard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub writes: u64,
    pub duplicates: u64,
}

/// Snapshot of per-shard accounting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub shards: BTreeMap<String, ShardStats>,
}

impl CacheStats {
    pub fn shard(&self, shard: &str) -> ShardStats {
        self.shards.get(shard).copied().unwrap_or_default()
    }

    pub fn total_writes(&self) -> u64 {
        self.shards.values().map(|s| s.writes).sum()
    }

    pub fn total_duplicates(&self) -> u64 {
        self.shards.values().map(|s| s.duplicates).sum()
    }
}

struct Table<V> {
    entries: HashMap<String, V>,
    stats: BTreeMap<String, ShardStats>,
}

/// Shared keyed store with a configurable overwrite policy
pub struct MemCache<V> {
    table: Mutex<Table<V>>,
    options: CacheOptions,
}

impl<V> MemCache<V>
where
    V: Clone + fmt::Debug,
{
    pub fn new(options: CacheOptions) -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                stats: BTreeMap::new(),
            }),
            options,
        }
    }

    pub fn options(&self) -> CacheOptions {
        self.options
    }

    // A panic while holding the lock cannot leave a half-applied put: each
    // put mutates the table with a single insert after its checks.
    fn lock(&self) -> MutexGuard<'_, Table<V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key` according to the overwrite policy
    pub fn put<K>(&self, key: &K, value: V) -> std::result::Result<(), CacheConflict<V>>
    where
        K: CacheKey + ?Sized,
    {
        let id = key.key();
        let mut guard = self.lock();
        let table = &mut *guard;

        let stats = table.stats.entry(key.shard().to_string()).or_default();
        stats.writes += 1;

        if let Some(existing) = table.entries.get(&id) {
            if self.options.strict {
                return Err(CacheConflict {
                    key: id,
                    existing: existing.clone(),
                });
            }

            if !self.options.expect_overwrite {
                warn!(key = %id, old = ?existing, new = ?value, "Overwriting cache entry");
                stats.duplicates += 1;
            }
        }

        table.entries.insert(id, value);
        Ok(())
    }

    pub fn get<K>(&self, key: &K) -> Option<V>
    where
        K: CacheKey + ?Sized,
    {
        self.lock().entries.get(&key.key()).cloned()
    }

    pub fn contains<K>(&self, key: &K) -> bool
    where
        K: CacheKey + ?Sized,
    {
        self.lock().entries.contains_key(&key.key())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            shards: self.lock().stats.clone(),
        }
    }

    /// Nothing is buffered in memory, so there is nothing to flush
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// The table lives as long as the run that owns the cache
    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}
