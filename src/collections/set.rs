/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent hash sets.
//!
//! Sets share the layout rules of [maps](crate::collections::map) — a flat form sorted by
//! member hash up to 8 members, 16-way hash-nibble branching above — but store members
//! only. A set is callable from the VM as a membership predicate.

use crate::cell::{Cell, Ref};
use crate::collections::map::{nibble, FLAT_LIMIT};
use crate::types::basic::CellHash;

/// A persistent unordered collection of distinct cells with canonical (member-hash)
/// iteration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Set {
    Leaf(SetLeaf),
    Tree(SetTree),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetLeaf {
    /// Members in strictly ascending hash order. At most [`FLAT_LIMIT`] of them.
    pub(crate) members: Vec<Ref>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetTree {
    pub(crate) count: u64,
    /// `(nibble, child set)` pairs in ascending nibble order.
    pub(crate) children: Vec<(u8, Ref)>,
}

impl Set {
    pub fn empty() -> Set {
        Set::Leaf(SetLeaf {
            members: Vec::new(),
        })
    }

    pub fn of(members: impl IntoIterator<Item = Cell>) -> Set {
        let mut set = Set::empty();
        for member in members {
            set = set.include(member);
        }
        set
    }

    pub fn count(&self) -> u64 {
        match self {
            Set::Leaf(leaf) => leaf.members.len() as u64,
            Set::Tree(tree) => tree.count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Membership test.
    pub fn contains(&self, member: &Cell) -> bool {
        let hash = member.hash();
        let mut node = self;
        let mut depth = 0;
        loop {
            match node {
                Set::Leaf(leaf) => {
                    return leaf
                        .members
                        .binary_search_by(|m| m.hash().cmp(&hash))
                        .is_ok();
                }
                Set::Tree(tree) => {
                    let target = nibble(&hash, depth);
                    match tree.children.iter().find(|(n, _)| *n == target) {
                        None => return false,
                        Some((_, child)) => {
                            node = as_set(child.resolved());
                            depth += 1;
                        }
                    }
                }
            }
        }
    }

    /// Add `member`, returning the updated set.
    pub fn include(&self, member: Cell) -> Set {
        self.insert(Ref::direct(member), 0).0
    }

    fn insert(&self, member: Ref, depth: u32) -> (Set, bool) {
        match self {
            Set::Leaf(leaf) => {
                let hash = member.hash();
                let mut members = leaf.members.clone();
                let added = match members.binary_search_by(|m| m.hash().cmp(&hash)) {
                    Ok(_) => false,
                    Err(i) => {
                        members.insert(i, member);
                        true
                    }
                };
                (make_node(members, depth), added)
            }
            Set::Tree(tree) => {
                let hash = member.hash();
                let target = nibble(&hash, depth);
                let mut children = tree.children.clone();
                let added = match children.binary_search_by(|(n, _)| n.cmp(&target)) {
                    Ok(i) => {
                        let child = as_set(children[i].1.resolved());
                        let (updated, added) = child.insert(member, depth + 1);
                        children[i] = (target, Ref::direct(Cell::Set(updated)));
                        added
                    }
                    Err(i) => {
                        let child = Set::Leaf(SetLeaf {
                            members: vec![member],
                        });
                        children.insert(i, (target, Ref::direct(Cell::Set(child))));
                        true
                    }
                };
                let count = tree.count + if added { 1 } else { 0 };
                (Set::Tree(SetTree { count, children }), added)
            }
        }
    }

    /// Remove `member`, returning the updated set. Removing an absent member returns the
    /// set unchanged.
    pub fn exclude(&self, member: &Cell) -> Set {
        if !self.contains(member) {
            return self.clone();
        }
        let hash = member.hash();
        self.remove(&hash, 0)
    }

    fn remove(&self, hash: &CellHash, depth: u32) -> Set {
        match self {
            Set::Leaf(leaf) => {
                let members = leaf
                    .members
                    .iter()
                    .filter(|m| m.hash() != *hash)
                    .cloned()
                    .collect();
                Set::Leaf(SetLeaf { members })
            }
            Set::Tree(tree) => {
                let target = nibble(hash, depth);
                let mut children = tree.children.clone();
                let Ok(i) = children.binary_search_by(|(n, _)| n.cmp(&target)) else {
                    return self.clone();
                };
                let updated = as_set(children[i].1.resolved()).remove(hash, depth + 1);
                if updated.is_empty() {
                    children.remove(i);
                } else {
                    children[i] = (target, Ref::direct(Cell::Set(updated)));
                }
                let count = tree.count - 1;
                if count as usize <= FLAT_LIMIT {
                    let mut members = Vec::with_capacity(count as usize);
                    for (_, child) in &children {
                        as_set(child.resolved()).push_members(&mut members);
                    }
                    Set::Leaf(SetLeaf { members })
                } else {
                    Set::Tree(SetTree { count, children })
                }
            }
        }
    }

    /// All members in canonical (ascending hash) order.
    pub fn members(&self) -> Vec<Cell> {
        let mut refs = Vec::with_capacity(self.count() as usize);
        self.push_members(&mut refs);
        refs.iter().map(|m| m.resolved().clone()).collect()
    }

    fn push_members(&self, out: &mut Vec<Ref>) {
        match self {
            Set::Leaf(leaf) => out.extend(leaf.members.iter().cloned()),
            Set::Tree(tree) => {
                for (_, child) in &tree.children {
                    as_set(child.resolved()).push_members(out);
                }
            }
        }
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            Set::Leaf(leaf) => leaf.members.clone(),
            Set::Tree(tree) => tree.children.iter().map(|(_, child)| child.clone()).collect(),
        }
    }

    /// Build a flat set from decoded members, validating the canonical order.
    pub(crate) fn from_leaf_members(members: Vec<Ref>) -> Option<Set> {
        for pair in members.windows(2) {
            if pair[0].hash() >= pair[1].hash() {
                return None;
            }
        }
        Some(Set::Leaf(SetLeaf { members }))
    }
}

fn make_node(members: Vec<Ref>, depth: u32) -> Set {
    if members.len() <= FLAT_LIMIT {
        return Set::Leaf(SetLeaf { members });
    }
    let count = members.len() as u64;
    let mut buckets: Vec<(u8, Vec<Ref>)> = Vec::new();
    for member in members {
        let n = nibble(&member.hash(), depth);
        match buckets.last_mut() {
            Some((last, bucket)) if *last == n => bucket.push(member),
            _ => buckets.push((n, vec![member])),
        }
    }
    let children = buckets
        .into_iter()
        .map(|(n, bucket)| (n, Ref::direct(Cell::Set(make_node(bucket, depth + 1)))))
        .collect();
    Set::Tree(SetTree { count, children })
}

fn as_set(cell: &Cell) -> &Set {
    match cell {
        Cell::Set(s) => s,
        other => panic!("set structure child must be a set, found {}", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_then_contains() {
        for n in [0i64, 1, 8, 9, 50] {
            let set = Set::of((0..n).map(Cell::Long));
            assert_eq!(set.count(), n as u64);
            for i in 0..n {
                assert!(set.contains(&Cell::Long(i)));
            }
            assert!(!set.contains(&Cell::Long(n)));
        }
    }

    #[test]
    fn include_is_idempotent() {
        let set = Set::of([Cell::Long(1), Cell::Long(1), Cell::Long(2)]);
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn exclude_removes_and_collapses() {
        let mut set = Set::of((0..9).map(Cell::Long));
        assert!(matches!(set, Set::Tree(_)));
        set = set.exclude(&Cell::Long(4));
        assert_eq!(set.count(), 8);
        assert!(matches!(set, Set::Leaf(_)));
        assert!(!set.contains(&Cell::Long(4)));
    }

    #[test]
    fn shape_is_insertion_order_independent() {
        let forward = Set::of((0..40).map(Cell::Long));
        let backward = Set::of((0..40).rev().map(Cell::Long));
        assert_eq!(forward, backward);
        assert_eq!(Cell::Set(forward).hash(), Cell::Set(backward).hash());
    }

    #[test]
    fn encoding_round_trips() {
        use crate::cell::encoding;
        for n in [0i64, 4, 9, 33] {
            let cell = Cell::Set(Set::of((0..n).map(Cell::Long)));
            let decoded = encoding::decode(&cell.encode()).unwrap();
            assert_eq!(decoded, cell);
        }
    }
}
