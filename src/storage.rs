/*!
 * In-Memory Storage
 *
 * One shard's worth of key/value data. Keys and values are both byte
 * strings; there is no other value type. Locking lives one level up in
 * `Shard`, so everything here takes `&self` / `&mut self` plainly.
 */

use crate::glob::Pattern;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

// AHash for the per-shard tables; shard selection uses its own hash
type AHash = BuildHasherDefault<ahash::AHasher>;

/// Key/value table backing a single shard
#[derive(Default)]
pub struct Dict {
    pub(crate) inner: HashMap<Bytes, Bytes, AHash>,
}

impl Dict {
    /// Get a value by key
    #[inline]
    pub fn get(&self, k: &[u8]) -> Option<&Bytes> {
        self.inner.get(k)
    }

    /// Insert or overwrite a key
    #[inline]
    pub fn set(&mut self, k: Bytes, v: Bytes) {
        self.inner.insert(k, v);
    }

    /// Insert only when the key is not present
    ///
    /// # Returns
    /// * `true` if the pair was inserted
    /// * `false` if the key already existed (its value is left untouched)
    #[inline]
    pub fn set_nx(&mut self, k: Bytes, v: Bytes) -> bool {
        match self.inner.entry(k) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(v);
                true
            }
        }
    }

    /// Delete a key, returning whether it existed
    #[inline]
    pub fn del(&mut self, k: &[u8]) -> bool {
        self.inner.remove(k).is_some()
    }

    /// Remove a key and hand back its value
    #[inline]
    pub fn take(&mut self, k: &[u8]) -> Option<Bytes> {
        self.inner.remove(k)
    }

    #[inline]
    pub fn exists(&self, k: &[u8]) -> bool {
        self.inner.contains_key(k)
    }

    /// Rename a key inside this table
    ///
    /// Renaming a key onto itself succeeds without touching the value.
    ///
    /// # Returns
    /// * `true` if the source existed and was moved
    /// * `false` if the source key didn't exist
    #[inline]
    pub fn rename(&mut self, from: &[u8], to: Bytes) -> bool {
        if from == &to[..] {
            return self.inner.contains_key(from);
        }
        match self.inner.remove(from) {
            Some(v) => {
                self.inner.insert(to, v);
                true
            }
            None => false,
        }
    }

    /// Append every key matching `pattern` to `out`
    pub fn collect_matching(&self, pattern: &Pattern, out: &mut Vec<Bytes>) {
        out.extend(self.inner.keys().filter(|k| pattern.matches(k)).cloned());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_nx_keeps_existing_value() {
        let mut d = Dict::default();
        assert!(d.set_nx(Bytes::from_static(b"k"), Bytes::from_static(b"1")));
        assert!(!d.set_nx(Bytes::from_static(b"k"), Bytes::from_static(b"2")));
        assert_eq!(d.get(b"k").map(|v| &v[..]), Some(&b"1"[..]));
    }

    #[test]
    fn rename_onto_self() {
        let mut d = Dict::default();
        assert!(!d.rename(b"x", Bytes::from_static(b"x")));
        d.set(Bytes::from_static(b"x"), Bytes::from_static(b"v"));
        assert!(d.rename(b"x", Bytes::from_static(b"x")));
        assert!(d.exists(b"x"));
        assert!(d.rename(b"x", Bytes::from_static(b"y")));
        assert!(!d.exists(b"x"));
        assert_eq!(d.len(), 1);
    }
}
