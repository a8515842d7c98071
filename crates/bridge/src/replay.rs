//! Replay-nonce cache
//!
//! One cache per target federation. A nonce is remembered while
//! `now - inserted_at < window`; a proof is accepted only while
//! `now - timestamp < window`, and is refused before the cache is consulted
//! otherwise, because its nonce may already have been forgotten. Both bounds
//! are exclusive, so an acceptable proof's nonce is never evicted as long as
//! it was inserted no earlier than the proof's timestamp.
//!
//! The cache is split into shards, each behind its own mutex, so concurrent
//! relays only contend when their nonces hash to the same shard. Eviction
//! locks one shard at a time and never blocks the whole cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

pub const SHARD_COUNT: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Duplicate nonce detected: {0}")]
    DuplicateNonce(String),

    #[error("Timestamp too old: {age_ms} ms ago (window: {window_ms} ms)")]
    TimestampTooOld { age_ms: u64, window_ms: u64 },

    #[error("Timestamp too far in future: {ahead_ms} ms ahead (max skew: {skew_ms} ms)")]
    TimestampTooFuture { ahead_ms: u64, skew_ms: u64 },

    #[error("Nonce capacity of {capacity} exhausted")]
    Saturated { capacity: usize },

    #[error("Replay cache lock poisoned")]
    LockPoisoned,
}

pub type ReplayResult<T> = Result<T, ReplayError>;

pub struct ReplayCache {
    /// nonce -> insertion time (Unix ms)
    shards: Vec<Mutex<HashMap<String, u64>>>,
    len: AtomicUsize,
    capacity: usize,
    window_ms: u64,
    max_skew_ms: u64,
}

impl ReplayCache {
    pub fn new(capacity: usize, window: Duration, max_skew: Duration) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            len: AtomicUsize::new(0),
            capacity,
            window_ms: window.as_millis() as u64,
            max_skew_ms: max_skew.as_millis() as u64,
        }
    }

    /// Shared by the timestamp check and eviction
    fn within_window(&self, age_ms: u64) -> bool {
        age_ms < self.window_ms
    }

    fn shard(&self, nonce: &str) -> &Mutex<HashMap<String, u64>> {
        let mut hasher = DefaultHasher::new();
        nonce.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Reject timestamps the cache cannot vouch for
    pub fn check_timestamp(&self, timestamp_ms: u64, now_ms: u64) -> ReplayResult<()> {
        if timestamp_ms <= now_ms {
            let age_ms = now_ms - timestamp_ms;
            if !self.within_window(age_ms) {
                return Err(ReplayError::TimestampTooOld {
                    age_ms,
                    window_ms: self.window_ms,
                });
            }
        } else {
            let ahead_ms = timestamp_ms - now_ms;
            if ahead_ms > self.max_skew_ms {
                return Err(ReplayError::TimestampTooFuture {
                    ahead_ms,
                    skew_ms: self.max_skew_ms,
                });
            }
        }
        Ok(())
    }

    /// Record `nonce` unless it is already present.
    ///
    /// Check and insert happen under the shard lock, so of two concurrent
    /// calls with the same nonce exactly one succeeds.
    pub fn insert_if_absent(&self, nonce: &str, now_ms: u64) -> ReplayResult<()> {
        let mut shard = self.shard(nonce).lock().map_err(|_| ReplayError::LockPoisoned)?;

        if shard.contains_key(nonce) {
            return Err(ReplayError::DuplicateNonce(nonce.to_string()));
        }

        if !self.reserve_slot() {
            // Reclaim what this shard can before refusing
            let before = shard.len();
            shard.retain(|_, inserted| self.within_window(now_ms.saturating_sub(*inserted)));
            self.len.fetch_sub(before - shard.len(), Ordering::SeqCst);

            if !self.reserve_slot() {
                return Err(ReplayError::Saturated {
                    capacity: self.capacity,
                });
            }
        }

        shard.insert(nonce.to_string(), now_ms);
        Ok(())
    }

    fn reserve_slot(&self) -> bool {
        let capacity = self.capacity;
        self.len
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |len| {
                (len < capacity).then_some(len + 1)
            })
            .is_ok()
    }

    /// Forget a nonce recorded by a relay that failed afterwards
    pub fn release(&self, nonce: &str) -> ReplayResult<bool> {
        let mut shard = self.shard(nonce).lock().map_err(|_| ReplayError::LockPoisoned)?;
        let removed = shard.remove(nonce).is_some();
        if removed {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    pub fn contains(&self, nonce: &str) -> bool {
        self.shard(nonce)
            .lock()
            .map(|s| s.contains_key(nonce))
            .unwrap_or(false)
    }

    /// Drop nonces older than the window; returns how many were dropped
    pub fn evict_expired(&self, now_ms: u64) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let Ok(mut shard) = shard.lock() else {
                continue;
            };
            let before = shard.len();
            shard.retain(|_, inserted| self.within_window(now_ms.saturating_sub(*inserted)));
            evicted += before - shard.len();
        }
        self.len.fetch_sub(evicted, Ordering::SeqCst);
        evicted
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for ReplayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("window_ms", &self.window_ms)
            .finish()
    }
}
