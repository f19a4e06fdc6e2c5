/*!
 * Keyspace Shard
 *
 * A shard is one independent partition of the keyspace: its own table and
 * its own reader-writer lock. The numeric `id` is the shard's position in the
 * store and is the only thing lock ordering ever compares.
 */

use crate::storage::Dict;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One partition of the keyspace
///
/// Aligned to a cache line so neighbouring shards' locks don't share one.
#[repr(align(64))]
pub struct Shard {
    /// Position in the store; lock acquisition order follows this value
    pub id: usize,
    dict: RwLock<Dict>,
}

impl Shard {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            dict: RwLock::new(Dict::default()),
        }
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Dict> {
        self.dict.read()
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, Dict> {
        self.dict.write()
    }
}
