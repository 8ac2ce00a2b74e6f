//! Open-Addressed Hash Table
//!
//! The table behind globals, instance fields, class method tables,
//! dictionaries, and the string interner. Keys are interned strings, so
//! probing compares key identity; each entry caches the key's FNV-1a hash
//! so resizing never has to consult the heap.
//!
//! Deletion leaves a tombstone (no key, value `true`) so later probe
//! sequences keep working. Tombstones count toward the load factor and are
//! dropped when the table resizes.

use crate::value::{ObjRef, Value};

/// Grow once count + tombstones would exceed three quarters of capacity.
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::NIL,
    };

    /// A tombstone is an entry with no key and a non-nil value.
    #[inline]
    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !self.value.is_nil()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Live entries plus tombstones.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Probe for the slot `key` lives in, or the slot it would be inserted
    /// into. A previously seen tombstone is preferred for insertion so that
    /// deleted slots get reused.
    fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
        let mut index = hash as usize % entries.len();
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = &entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        // Truly empty.
                        return tombstone.unwrap_or(index);
                    }
                    // Tombstone: remember the first one and keep probing.
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) % entries.len();
        }
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::EMPTY; capacity]);

        // Re-insert live entries; tombstones are dropped here.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = Self::find_entry(&self.entries, key, entry.hash);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
    }

    fn grow_capacity(capacity: usize) -> usize {
        if capacity < 8 { 8 } else { capacity * 2 }
    }

    /// Look up `key`. The caller supplies the key's cached hash.
    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &self.entries[index];
        entry.key.map(|_| entry.value)
    }

    /// Insert or update `key`. Returns true if the key was not present.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DEN > self.capacity() * MAX_LOAD_NUM {
            let capacity = Self::grow_capacity(self.capacity());
            self.adjust_capacity(capacity);
        }

        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // Reusing a tombstone does not change the load count.
        if is_new && entry.value.is_nil() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    /// Remove `key`, leaving a tombstone. Returns true if it was present.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = Self::find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry {
            key: None,
            hash: 0,
            value: Value::TRUE,
        };
        true
    }

    /// Copy every live entry into `to`. Existing keys in `to` are
    /// overwritten, which is why inherited methods are copied before the
    /// subclass declares its own.
    pub fn add_all(&self, to: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                to.set(key, entry.hash, entry.value);
            }
        }
    }

    /// Content-based lookup for the string interner. `matches` is asked
    /// whether a candidate key's bytes equal the probe string; it is only
    /// consulted when the cached hashes agree.
    pub fn find_string<F>(&self, hash: u32, mut matches: F) -> Option<ObjRef>
    where
        F: FnMut(ObjRef) -> bool,
    {
        if self.count == 0 {
            return None;
        }
        let mut index = hash as usize % self.capacity();
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        return None;
                    }
                    // Tombstone, keep probing.
                }
                Some(key) => {
                    if entry.hash == hash && matches(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) % self.capacity();
        }
    }

    /// Tombstone every entry whose key the GC left unmarked. Used to make
    /// the string interner a weak set between marking and sweeping.
    pub fn remove_white<F>(&mut self, is_marked: F)
    where
        F: Fn(ObjRef) -> bool,
    {
        for entry in &mut self.entries {
            if let Some(key) = entry.key
                && !is_marked(key)
            {
                *entry = Entry {
                    key: None,
                    hash: 0,
                    value: Value::TRUE,
                };
            }
        }
    }

    /// Iterate over live (key, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    /// Number of live keys (tombstones excluded).
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// FNV-1a over the string's bytes; cached on every interned string.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    // Tests fabricate keys directly; identity-based probing only needs the
    // (key, hash) pair to be consistent, not a real heap.
    fn key(i: u32) -> (ObjRef, u32) {
        (ObjRef(i), hash_bytes(i.to_string().as_bytes()))
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut table = Table::new();
        let (k, h) = key(1);
        assert!(table.set(k, h, Value::number(42.0)));
        assert_eq!(table.get(k, h).map(|v| v.as_number()), Some(42.0));
    }

    #[test]
    fn test_set_overwrites() {
        let mut table = Table::new();
        let (k, h) = key(1);
        assert!(table.set(k, h, Value::number(1.0)));
        assert!(!table.set(k, h, Value::number(2.0)));
        assert_eq!(table.get(k, h).map(|v| v.as_number()), Some(2.0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_missing_key() {
        let table = Table::new();
        let (k, h) = key(9);
        assert!(table.get(k, h).is_none());
    }

    #[test]
    fn test_delete_leaves_probes_intact() {
        let mut table = Table::new();
        // Force collisions by reusing one hash for every key.
        let hash = 7;
        for i in 0..4 {
            table.set(ObjRef(i), hash, Value::number(i as f64));
        }
        assert!(table.delete(ObjRef(1), hash));
        // Keys that probed past the deleted slot must still be reachable.
        assert_eq!(table.get(ObjRef(3), hash).map(|v| v.as_number()), Some(3.0));
        assert!(table.get(ObjRef(1), hash).is_none());
        assert!(!table.delete(ObjRef(1), hash));
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut table = Table::new();
        let hash = 7;
        for i in 0..4 {
            table.set(ObjRef(i), hash, Value::NIL);
        }
        let count_before = table.count;
        table.delete(ObjRef(2), hash);
        table.set(ObjRef(2), hash, Value::TRUE);
        // Reinserting through a tombstone must not inflate the load count.
        assert_eq!(table.count, count_before);
    }

    #[test]
    fn test_resize_drops_tombstones() {
        let mut table = Table::new();
        for i in 0..6 {
            let (k, h) = key(i);
            table.set(k, h, Value::number(i as f64));
        }
        for i in 0..3 {
            let (k, h) = key(i);
            table.delete(k, h);
        }
        // Push past the load factor to force a resize.
        for i in 6..40 {
            let (k, h) = key(i);
            table.set(k, h, Value::number(i as f64));
        }
        assert_eq!(table.len(), 37);
        for i in 3..40 {
            let (k, h) = key(i);
            assert_eq!(table.get(k, h).map(|v| v.as_number()), Some(i as f64));
        }
    }

    #[test]
    fn test_add_all() {
        let mut from = Table::new();
        let mut to = Table::new();
        let (k1, h1) = key(1);
        let (k2, h2) = key(2);
        from.set(k1, h1, Value::number(1.0));
        from.set(k2, h2, Value::number(2.0));
        to.set(k1, h1, Value::number(99.0));
        from.add_all(&mut to);
        assert_eq!(to.get(k1, h1).map(|v| v.as_number()), Some(1.0));
        assert_eq!(to.get(k2, h2).map(|v| v.as_number()), Some(2.0));
    }

    #[test]
    fn test_remove_white() {
        let mut table = Table::new();
        for i in 0..8 {
            let (k, h) = key(i);
            table.set(k, h, Value::NIL);
        }
        table.remove_white(|k| k.0 % 2 == 0);
        assert_eq!(table.len(), 4);
        let (k, h) = key(2);
        assert!(table.get(k, h).is_some());
        let (k, h) = key(3);
        assert!(table.get(k, h).is_none());
    }

    #[test]
    fn test_hash_bytes_is_fnv1a() {
        // Reference values for the 32-bit FNV-1a parameters.
        assert_eq!(hash_bytes(b""), 2166136261);
        assert_eq!(hash_bytes(b"a"), 0xe40c292c);
    }

    proptest! {
        #[test]
        fn prop_matches_model_map(ops in proptest::collection::vec((0u32..64, proptest::bool::ANY, proptest::num::f64::NORMAL), 0..200)) {
            let mut table = Table::new();
            let mut model: HashMap<u32, f64> = HashMap::new();
            for (i, insert, v) in ops {
                let (k, h) = key(i);
                if insert {
                    table.set(k, h, Value::number(v));
                    model.insert(i, v);
                } else {
                    table.delete(k, h);
                    model.remove(&i);
                }
                prop_assert_eq!(table.len(), model.len());
            }
            for (i, v) in model {
                let (k, h) = key(i);
                prop_assert_eq!(table.get(k, h).map(|x| x.as_number()), Some(v));
            }
        }
    }
}
