/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent byte-keyed maps with ordered iteration.
//!
//! A [`BlobMap`] associates blob keys with cell values and iterates in ascending raw-key
//! order. This ordering (rather than the hash order of [`Map`](crate::collections::map))
//! is what the consensus layer needs for peer-keyed order maps, time-keyed schedules and
//! address-keyed stake delegations.

use std::sync::Arc;

use crate::cell::{Blob, Cell, Ref};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMapEntry {
    pub(crate) key: Blob,
    pub(crate) value: Ref,
}

impl BlobMapEntry {
    pub fn key(&self) -> &Blob {
        &self.key
    }

    pub fn value(&self) -> &Cell {
        self.value.resolved()
    }
}

/// A persistent association from byte keys to cells, ordered by key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMap {
    /// Entries in strictly ascending key order.
    pub(crate) entries: Arc<Vec<BlobMapEntry>>,
}

impl BlobMap {
    pub fn empty() -> BlobMap {
        BlobMap {
            entries: Arc::new(Vec::new()),
        }
    }

    pub fn of(pairs: impl IntoIterator<Item = (Blob, Cell)>) -> BlobMap {
        let mut map = BlobMap::empty();
        for (key, value) in pairs {
            map = map.assoc(key, value);
        }
        map
    }

    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Cell> {
        self.get_ref(key).map(Ref::resolved)
    }

    pub fn get_ref(&self, key: &[u8]) -> Option<&Ref> {
        self.entries
            .binary_search_by(|entry| entry.key.bytes().cmp(key))
            .ok()
            .map(|i| &self.entries[i].value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get_ref(key).is_some()
    }

    /// Associate `key` with `value`, returning the updated map.
    pub fn assoc(&self, key: Blob, value: Cell) -> BlobMap {
        self.assoc_ref(key, Ref::direct(value))
    }

    pub(crate) fn assoc_ref(&self, key: Blob, value: Ref) -> BlobMap {
        let mut entries = (*self.entries).clone();
        match entries.binary_search_by(|entry| entry.key.bytes().cmp(key.bytes())) {
            Ok(i) => entries[i] = BlobMapEntry { key, value },
            Err(i) => entries.insert(i, BlobMapEntry { key, value }),
        }
        BlobMap {
            entries: Arc::new(entries),
        }
    }

    /// Remove `key`, returning the updated map.
    pub fn dissoc(&self, key: &[u8]) -> BlobMap {
        match self.entries.binary_search_by(|entry| entry.key.bytes().cmp(key)) {
            Err(_) => self.clone(),
            Ok(i) => {
                let mut entries = (*self.entries).clone();
                entries.remove(i);
                BlobMap {
                    entries: Arc::new(entries),
                }
            }
        }
    }

    /// Iterate entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = &BlobMapEntry> + '_ {
        self.entries.iter()
    }

    /// Split off every entry with key less than or equal to `key`, preserving order.
    /// Returns the taken entries and the remainder map.
    pub fn take_through(&self, key: &[u8]) -> (Vec<BlobMapEntry>, BlobMap) {
        let split = self
            .entries
            .partition_point(|entry| entry.key.bytes() <= key);
        let taken = self.entries[..split].to_vec();
        let rest = BlobMap {
            entries: Arc::new(self.entries[split..].to_vec()),
        };
        (taken, rest)
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        self.entries.iter().map(|entry| entry.value.clone()).collect()
    }

    /// Build from decoded entries, validating strictly ascending key order.
    pub(crate) fn from_sorted_entries(entries: Vec<BlobMapEntry>) -> Option<BlobMap> {
        for pair in entries.windows(2) {
            if pair[0].key.bytes() >= pair[1].key.bytes() {
                return None;
            }
        }
        Some(BlobMap {
            entries: Arc::new(entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(bytes: &[u8]) -> Blob {
        Blob::from_slice(bytes)
    }

    #[test]
    fn assoc_get_dissoc() {
        let map = BlobMap::empty()
            .assoc(key(b"b"), Cell::Long(2))
            .assoc(key(b"a"), Cell::Long(1))
            .assoc(key(b"c"), Cell::Long(3));
        assert_eq!(map.count(), 3);
        assert_eq!(map.get(b"a"), Some(&Cell::Long(1)));
        assert_eq!(map.get(b"d"), None);

        let smaller = map.dissoc(b"b");
        assert_eq!(smaller.count(), 2);
        assert_eq!(smaller.get(b"b"), None);
        assert_eq!(map.count(), 3);
    }

    #[test]
    fn iteration_is_key_ordered() {
        let map = BlobMap::empty()
            .assoc(key(b"zz"), Cell::Nil)
            .assoc(key(b"aa"), Cell::Nil)
            .assoc(key(b"mm"), Cell::Nil);
        let keys: Vec<&[u8]> = map.iter().map(|entry| entry.key().bytes()).collect();
        assert_eq!(keys, vec![b"aa".as_slice(), b"mm", b"zz"]);
    }

    #[test]
    fn take_through_splits_on_key_order() {
        let map = BlobMap::empty()
            .assoc(key(&[1]), Cell::Long(1))
            .assoc(key(&[2]), Cell::Long(2))
            .assoc(key(&[5]), Cell::Long(5));
        let (taken, rest) = map.take_through(&[2]);
        assert_eq!(taken.len(), 2);
        assert_eq!(rest.count(), 1);
        assert_eq!(rest.get(&[5]), Some(&Cell::Long(5)));

        let (none_taken, all_rest) = map.take_through(&[0]);
        assert!(none_taken.is_empty());
        assert_eq!(all_rest.count(), 3);
    }

    #[test]
    fn encoding_round_trips() {
        use crate::cell::encoding;
        let map = BlobMap::empty()
            .assoc(key(b"order"), Cell::Long(1))
            .assoc(key(b"belief"), Cell::Boolean(true));
        let cell = Cell::BlobMap(map);
        let decoded = encoding::decode(&cell.encode()).unwrap();
        assert_eq!(decoded, cell);
    }
}
