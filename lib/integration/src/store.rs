//! Shared key/expiry store used for rate-limit windows, cached responses
//! and last-sync markers.
//!
//! The store lives outside process memory in production (see
//! `RedisStore` with the `redis` feature) so that rate-limit and
//! cache guarantees hold across cooperating processes. [`MemoryStore`]
//! covers single-process deployments and tests.

use crate::error::StoreError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Trait for the shared key/expiry and sorted-set service.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Returns the string stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, Report<StoreError>>;

    /// Stores a string, optionally expiring after `ttl`.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), Report<StoreError>>;

    /// Deletes a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> Result<bool, Report<StoreError>>;

    /// Deletes every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, Report<StoreError>>;

    /// Returns the number of members in a sorted set.
    async fn sorted_set_len(&self, key: &str) -> Result<u64, Report<StoreError>>;

    /// Admits one member into a bounded rolling window, atomically.
    ///
    /// Removes members scored at or below `expired_at`, then, if fewer than
    /// `max` remain, adds `member` with `score` and sets the key to expire
    /// after `ttl`. Returns the window size after the insert, or `None` if
    /// the window was full and nothing was added.
    async fn sorted_set_admit(
        &self,
        key: &str,
        expired_at: i64,
        member: &str,
        score: i64,
        max: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, Report<StoreError>>;
}

#[derive(Debug, Clone)]
enum Slot {
    Text(String),
    SortedSet(BTreeMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// An in-process store.
///
/// Guarantees only hold within one process. Expiry is evaluated lazily on
/// access using the tokio clock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    /// Returns true if no live keys are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Report<StoreError>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Text(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }
            .into()),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), Report<StoreError>> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Text(value.to_string()),
                expires_at: ttl.and_then(deadline),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Report<StoreError>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, Report<StoreError>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut live_removed = 0u64;
        entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if entry.is_live(now) {
                    live_removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(live_removed)
    }

    async fn sorted_set_len(&self, key: &str) -> Result<u64, Report<StoreError>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                slot: Slot::SortedSet(members),
                ..
            }) => Ok(members.len() as u64),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }
            .into()),
        }
    }

    async fn sorted_set_admit(
        &self,
        key: &str,
        expired_at: i64,
        member: &str,
        score: i64,
        max: u64,
        ttl: Duration,
    ) -> Result<Option<u64>, Report<StoreError>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::SortedSet(BTreeMap::new()),
            expires_at: None,
        });
        let Slot::SortedSet(members) = &mut entry.slot else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            }
            .into());
        };

        members.retain(|_, scored| *scored > expired_at);
        if members.len() as u64 >= max {
            return Ok(None);
        }
        members.insert(member.to_string(), score);
        let size = members.len() as u64;
        entry.expires_at = deadline(ttl);
        Ok(Some(size))
    }
}
