/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent hash maps.
//!
//! A map is a hash-array-mapped trie keyed by the hash of the key cell. Small maps (at
//! most [`FLAT_LIMIT`] entries) are a flat form sorted by key hash; larger maps branch 16
//! ways on successive nibbles of the key hash, high nibble first. Any submap whose count
//! drops to the flat limit collapses back to the flat form, so the shape — and therefore
//! the encoding and hash — is a pure function of the entry set.
//!
//! Key equality is hash equality: cells are content-addressed, so two keys are equal
//! exactly when their hashes are.

use crate::cell::{Cell, Ref};
use crate::types::basic::CellHash;

/// Maximum number of entries in the flat map form.
pub const FLAT_LIMIT: usize = 8;

/// A persistent unordered key→value association with canonical (key-hash) iteration
/// order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Map {
    Leaf(MapLeaf),
    Tree(MapTree),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapLeaf {
    /// Entries in strictly ascending key-hash order. At most [`FLAT_LIMIT`] of them.
    pub(crate) entries: Vec<MapEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapEntry {
    pub(crate) key: Ref,
    pub(crate) value: Ref,
}

impl MapEntry {
    pub fn key(&self) -> &Cell {
        self.key.resolved()
    }

    pub fn value(&self) -> &Cell {
        self.value.resolved()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapTree {
    pub(crate) count: u64,
    /// `(nibble, child map)` pairs in ascending nibble order.
    pub(crate) children: Vec<(u8, Ref)>,
}

impl Map {
    pub fn empty() -> Map {
        Map::Leaf(MapLeaf {
            entries: Vec::new(),
        })
    }

    pub fn of(pairs: impl IntoIterator<Item = (Cell, Cell)>) -> Map {
        let mut map = Map::empty();
        for (key, value) in pairs {
            map = map.assoc(key, value);
        }
        map
    }

    pub fn count(&self) -> u64 {
        match self {
            Map::Leaf(leaf) => leaf.entries.len() as u64,
            Map::Tree(tree) => tree.count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Look up `key`, returning its value or `None`.
    pub fn get(&self, key: &Cell) -> Option<&Cell> {
        self.get_entry(key).map(|entry| entry.value.resolved())
    }

    /// Look up `key`, returning its value or `not_found`.
    pub fn get_or<'a>(&'a self, key: &Cell, not_found: &'a Cell) -> &'a Cell {
        self.get(key).unwrap_or(not_found)
    }

    pub fn contains_key(&self, key: &Cell) -> bool {
        self.get_entry(key).is_some()
    }

    fn get_entry(&self, key: &Cell) -> Option<&MapEntry> {
        let hash = key.hash();
        let mut node = self;
        let mut depth = 0;
        loop {
            match node {
                Map::Leaf(leaf) => {
                    return leaf
                        .entries
                        .binary_search_by(|entry| entry.key.hash().cmp(&hash))
                        .ok()
                        .map(|i| &leaf.entries[i]);
                }
                Map::Tree(tree) => {
                    let nibble = nibble(&hash, depth);
                    let child = tree
                        .children
                        .iter()
                        .find(|(n, _)| *n == nibble)
                        .map(|(_, child)| child)?;
                    node = as_map(child.resolved());
                    depth += 1;
                }
            }
        }
    }

    /// Associate `key` with `value`, returning the updated map.
    pub fn assoc(&self, key: Cell, value: Cell) -> Map {
        let entry = MapEntry {
            key: Ref::direct(key),
            value: Ref::direct(value),
        };
        self.insert(entry, 0).0
    }

    fn insert(&self, entry: MapEntry, depth: u32) -> (Map, bool) {
        match self {
            Map::Leaf(leaf) => {
                let hash = entry.key.hash();
                let mut entries = leaf.entries.clone();
                let added = match entries.binary_search_by(|e| e.key.hash().cmp(&hash)) {
                    Ok(i) => {
                        entries[i] = entry;
                        false
                    }
                    Err(i) => {
                        entries.insert(i, entry);
                        true
                    }
                };
                (make_node(entries, depth), added)
            }
            Map::Tree(tree) => {
                let hash = entry.key.hash();
                let entry_nibble = nibble(&hash, depth);
                let mut children = tree.children.clone();
                let added = match children.binary_search_by(|(n, _)| n.cmp(&entry_nibble)) {
                    Ok(i) => {
                        let child = as_map(children[i].1.resolved());
                        let (updated, added) = child.insert(entry, depth + 1);
                        children[i] = (entry_nibble, Ref::direct(Cell::Map(updated)));
                        added
                    }
                    Err(i) => {
                        let child = Map::Leaf(MapLeaf {
                            entries: vec![entry],
                        });
                        children.insert(i, (entry_nibble, Ref::direct(Cell::Map(child))));
                        true
                    }
                };
                let count = tree.count + if added { 1 } else { 0 };
                (
                    Map::Tree(MapTree { count, children }),
                    added,
                )
            }
        }
    }

    /// Remove `key`, returning the updated map. Removing an absent key returns the map
    /// unchanged.
    pub fn dissoc(&self, key: &Cell) -> Map {
        if !self.contains_key(key) {
            return self.clone();
        }
        let hash = key.hash();
        self.remove(&hash, 0)
    }

    fn remove(&self, hash: &CellHash, depth: u32) -> Map {
        match self {
            Map::Leaf(leaf) => {
                let entries = leaf
                    .entries
                    .iter()
                    .filter(|entry| entry.key.hash() != *hash)
                    .cloned()
                    .collect();
                Map::Leaf(MapLeaf { entries })
            }
            Map::Tree(tree) => {
                let target = nibble(hash, depth);
                let mut children = tree.children.clone();
                let Ok(i) = children.binary_search_by(|(n, _)| n.cmp(&target)) else {
                    return self.clone();
                };
                let updated = as_map(children[i].1.resolved()).remove(hash, depth + 1);
                if updated.is_empty() {
                    children.remove(i);
                } else {
                    children[i] = (target, Ref::direct(Cell::Map(updated)));
                }
                let count = tree.count - 1;
                if count as usize <= FLAT_LIMIT {
                    // Collapse back to the canonical flat form.
                    let mut entries = Vec::with_capacity(count as usize);
                    for (_, child) in &children {
                        as_map(child.resolved()).push_entries(&mut entries);
                    }
                    Map::Leaf(MapLeaf { entries })
                } else {
                    Map::Tree(MapTree { count, children })
                }
            }
        }
    }

    /// Merge `other` into this map; entries of `other` win on key collisions.
    pub fn merge(&self, other: &Map) -> Map {
        let mut out = self.clone();
        for entry in other.entries() {
            out = out.insert(entry, 0).0;
        }
        out
    }

    /// All entries in canonical (ascending key-hash) order.
    pub fn entries(&self) -> Vec<MapEntry> {
        let mut out = Vec::with_capacity(self.count() as usize);
        self.push_entries(&mut out);
        out
    }

    fn push_entries(&self, out: &mut Vec<MapEntry>) {
        match self {
            Map::Leaf(leaf) => out.extend(leaf.entries.iter().cloned()),
            Map::Tree(tree) => {
                for (_, child) in &tree.children {
                    as_map(child.resolved()).push_entries(out);
                }
            }
        }
    }

    /// All keys in canonical order.
    pub fn keys(&self) -> Vec<Cell> {
        self.entries()
            .iter()
            .map(|entry| entry.key.resolved().clone())
            .collect()
    }

    /// All values in canonical (key-hash) order.
    pub fn values(&self) -> Vec<Cell> {
        self.entries()
            .iter()
            .map(|entry| entry.value.resolved().clone())
            .collect()
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            Map::Leaf(leaf) => {
                let mut refs = Vec::with_capacity(leaf.entries.len() * 2);
                for entry in &leaf.entries {
                    refs.push(entry.key.clone());
                    refs.push(entry.value.clone());
                }
                refs
            }
            Map::Tree(tree) => tree.children.iter().map(|(_, child)| child.clone()).collect(),
        }
    }

    /// Build a flat map from decoded entries, validating the canonical order.
    pub(crate) fn from_leaf_entries(entries: Vec<MapEntry>) -> Option<Map> {
        for pair in entries.windows(2) {
            if pair[0].key.hash() >= pair[1].key.hash() {
                return None;
            }
        }
        Some(Map::Leaf(MapLeaf { entries }))
    }
}

/// Build the canonical node for `entries` (sorted by key hash) at `depth`.
fn make_node(entries: Vec<MapEntry>, depth: u32) -> Map {
    if entries.len() <= FLAT_LIMIT {
        return Map::Leaf(MapLeaf { entries });
    }
    let count = entries.len() as u64;
    let mut buckets: Vec<(u8, Vec<MapEntry>)> = Vec::new();
    for entry in entries {
        let n = nibble(&entry.key.hash(), depth);
        match buckets.last_mut() {
            Some((last, bucket)) if *last == n => bucket.push(entry),
            _ => buckets.push((n, vec![entry])),
        }
    }
    let children = buckets
        .into_iter()
        .map(|(n, bucket)| (n, Ref::direct(Cell::Map(make_node(bucket, depth + 1)))))
        .collect();
    Map::Tree(MapTree { count, children })
}

/// The hash digit selecting the child at `depth`: nibbles of the hash, high nibble of
/// each byte first.
pub(crate) fn nibble(hash: &CellHash, depth: u32) -> u8 {
    let byte = hash.bytes()[(depth / 2) as usize];
    if depth % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0F
    }
}

fn as_map(cell: &Cell) -> &Map {
    match cell {
        Cell::Map(m) => m,
        other => panic!("map structure child must be a map, found {}", other.type_name()),
    }
}
