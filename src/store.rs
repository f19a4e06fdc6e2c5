/*!
 * Partitioned Store
 *
 * A fixed array of shards. Every key lives in exactly one shard, chosen by
 * an xxh3 hash of the key bytes modulo the shard count. The shard count is
 * fixed at construction so the routing never changes for a store instance.
 *
 * Locking rules:
 * - single-key operations take exactly one shard lock
 * - batch operations group keys per shard and take each shard lock once
 * - an operation that needs two write locks at the same time takes them in
 *   ascending shard id order, never in argument order
 * - nothing here holds a lock while calling back out of the store
 */

use crate::glob::{Pattern, PatternError};
use crate::shard::Shard;
use bytes::Bytes;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Store operation failures; `Display` is the client-facing error text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("ERR invalid pattern: {0}")]
    InvalidPattern(#[from] PatternError),
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

/// The sharded keyspace
pub struct Store {
    shards: Box<[Shard]>,
}

impl Store {
    /// Create a store with `shards` empty partitions
    ///
    /// # Panics
    /// If `shards` is zero.
    pub fn new(shards: usize) -> Self {
        assert!(shards > 0, "shard count must be > 0");
        Self {
            shards: (0..shards).map(Shard::new).collect(),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard that owns `key`
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (xxh3_64(key) % self.shards.len() as u64) as usize
    }

    #[inline]
    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Bucket items by owning shard; bucket `i` belongs to shard `i`
    fn group_by_shard<T>(
        &self,
        items: impl IntoIterator<Item = T>,
        key: impl Fn(&T) -> &[u8],
    ) -> Vec<Vec<T>> {
        let mut groups: Vec<Vec<T>> = (0..self.shards.len()).map(|_| Vec::new()).collect();
        for it in items {
            let idx = self.shard_index(key(&it));
            groups[idx].push(it);
        }
        groups
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.shard_for(key).read().get(key).cloned()
    }

    pub fn set(&self, key: Bytes, value: Bytes) {
        self.shard_for(&key).write().set(key, value);
    }

    /// Insert only if absent; returns whether the insert happened
    pub fn set_if_absent(&self, key: Bytes, value: Bytes) -> bool {
        self.shard_for(&key).write().set_nx(key, value)
    }

    /// Remove every listed key, one write-lock acquisition per shard touched
    ///
    /// Returns how many of the keys existed. A key listed twice is counted
    /// once, since the second removal finds nothing.
    pub fn delete(&self, keys: &[Bytes]) -> usize {
        let groups = self.group_by_shard(keys.iter(), |k| &k[..]);
        let mut removed = 0;
        for (shard, group) in self.shards.iter().zip(groups) {
            if group.is_empty() {
                continue;
            }
            let mut dict = shard.write();
            removed += group.into_iter().filter(|k| dict.del(k)).count();
        }
        removed
    }

    /// Count how many of the listed keys exist; repeats count each time
    pub fn exists(&self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|k| self.shard_for(k).read().exists(k)).count()
    }

    /// Look up each key independently, preserving input order
    ///
    /// There is no snapshot across keys: each lookup takes its own shard's
    /// read lock.
    pub fn get_many(&self, keys: &[Bytes]) -> Vec<Option<Bytes>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Apply pairs grouped by shard, each group under one write lock
    ///
    /// Within a group, later pairs win over earlier ones for the same key.
    /// Groups for different shards are not applied atomically together.
    pub fn set_many(&self, pairs: Vec<(Bytes, Bytes)>) {
        let groups = self.group_by_shard(pairs, |(k, _)| &k[..]);
        for (shard, group) in self.shards.iter().zip(groups) {
            if group.is_empty() {
                continue;
            }
            let mut dict = shard.write();
            for (k, v) in group {
                dict.set(k, v);
            }
        }
    }

    /// Move the value at `from` to `to`
    ///
    /// When the keys live in different shards both write locks are held for
    /// the move, acquired lower id first.
    pub fn rename(&self, from: &[u8], to: Bytes) -> Result<(), StoreError> {
        let src = self.shard_index(from);
        let dst = self.shard_index(&to);

        if src == dst {
            let mut dict = self.shards[src].write();
            return if dict.rename(from, to) { Ok(()) } else { Err(StoreError::NoSuchKey) };
        }

        let (lo, hi) = if src < dst { (src, dst) } else { (dst, src) };
        let mut first = self.shards[lo].write();
        let mut second = self.shards[hi].write();
        let (from_dict, to_dict) = if src < dst {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        let value = from_dict.take(from).ok_or(StoreError::NoSuchKey)?;
        to_dict.set(to, value);
        Ok(())
    }

    /// Collect every key matching a glob pattern
    ///
    /// The pattern is compiled before any shard is touched. Shards are then
    /// visited one at a time, each under its own read lock.
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Bytes>, StoreError> {
        let pattern = Pattern::compile(pattern)?;
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            shard.read().collect_matching(&pattern, &mut out);
        }
        Ok(out)
    }

    /// Total number of keys, summed shard by shard
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Clear every shard
    ///
    /// All write locks are taken in ascending id order and held until every
    /// shard is cleared, so no reader observes a half-flushed keyspace.
    pub fn flush_all(&self) {
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.write()).collect();
        for dict in guards.iter_mut() {
            dict.clear();
        }
    }

    /// Add `delta` to the integer stored at `key` (absent counts as 0)
    ///
    /// The read, parse and write back all happen under one write lock, so
    /// concurrent increments of the same key never lose updates. On error the
    /// stored value is left unchanged.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64, StoreError> {
        let mut dict = self.shard_for(key).write();
        let current = match dict.get(key) {
            Some(v) => parse_i64(v).ok_or(StoreError::NotAnInteger)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
        dict.set(Bytes::copy_from_slice(key), Bytes::from(next.to_string()));
        Ok(next)
    }
}

/// Strict base-10 parse: optional '-', digits only, no '+' or whitespace
fn parse_i64(v: &[u8]) -> Option<i64> {
    if v.first() == Some(&b'+') {
        return None;
    }
    std::str::from_utf8(v).ok()?.parse().ok()
}
