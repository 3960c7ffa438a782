/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent ordered vectors.
//!
//! Vectors are log-structured: elements are packed into chunks of [`CHUNK_SIZE`] refs, and
//! a balanced radix-16 tree is built over the chunks once a vector outgrows a single one.
//! The canonical form is a pure function of the element count:
//!
//! - `count <= 16`: a single leaf holding the elements.
//! - `count % 16 == 0` (and `count > 16`): the fully packed tree form, in which every
//!   subtree spans a power-of-16 number of elements except possibly the rightmost spine.
//! - otherwise: a tail leaf holding the last `count % 16` elements plus a ref to the
//!   packed vector holding everything before them.
//!
//! Because the shape is canonical, two vectors with equal elements are structurally equal
//! and hash identically however they were built. `append` is amortized O(1); `get` is
//! O(log₁₆ n).

use crate::cell::{Cell, Ref};

/// Number of element refs in a full chunk.
pub const CHUNK_SIZE: u64 = 16;

/// A persistent ordered sequence of cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Vector {
    Leaf(VectorLeaf),
    Tree(VectorTree),
}

/// Leaf form: up to 16 elements, or the tail of a longer vector together with a ref to
/// its packed prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorLeaf {
    pub(crate) count: u64,
    pub(crate) prefix: Option<Ref>,
    pub(crate) items: Vec<Ref>,
}

/// Packed tree form: `count` is a multiple of 16 and at least 32; children are packed
/// vectors spanning `span(count)` elements each, except the last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorTree {
    pub(crate) count: u64,
    pub(crate) children: Vec<Ref>,
}

impl Default for Vector {
    fn default() -> Vector {
        Vector::empty()
    }
}

impl Vector {
    pub fn empty() -> Vector {
        Vector::Leaf(VectorLeaf {
            count: 0,
            prefix: None,
            items: Vec::new(),
        })
    }

    pub fn of(items: impl IntoIterator<Item = Cell>) -> Vector {
        let mut vector = Vector::empty();
        for item in items {
            vector = vector.append(item);
        }
        vector
    }

    pub fn count(&self) -> u64 {
        match self {
            Vector::Leaf(leaf) => leaf.count,
            Vector::Tree(tree) => tree.count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Get the element at index `i`, or `None` if `i` is out of range.
    pub fn get(&self, i: u64) -> Option<&Cell> {
        if i >= self.count() {
            return None;
        }
        Some(self.get_unchecked(i))
    }

    pub fn last(&self) -> Option<&Cell> {
        match self.count() {
            0 => None,
            n => self.get(n - 1),
        }
    }

    /// The stored ref for index `i`. Refs memoize hashes, so this is the cheap way to
    /// compare elements by hash.
    pub(crate) fn get_ref(&self, i: u64) -> Option<&Ref> {
        if i >= self.count() {
            return None;
        }
        Some(self.get_ref_unchecked(i))
    }

    fn get_ref_unchecked(&self, i: u64) -> &Ref {
        match self {
            Vector::Leaf(leaf) => {
                let prefix_count = leaf.count - leaf.items.len() as u64;
                if i < prefix_count {
                    let prefix = leaf.prefix.as_ref().expect("leaf with a prefix count has a prefix");
                    as_vector(prefix.resolved()).get_ref_unchecked(i)
                } else {
                    &leaf.items[(i - prefix_count) as usize]
                }
            }
            Vector::Tree(tree) => {
                let span = span(tree.count);
                let child = &tree.children[(i / span) as usize];
                as_vector(child.resolved()).get_ref_unchecked(i % span)
            }
        }
    }

    fn get_unchecked(&self, i: u64) -> &Cell {
        match self {
            Vector::Leaf(leaf) => {
                let prefix_count = leaf.count - leaf.items.len() as u64;
                if i < prefix_count {
                    let prefix = leaf.prefix.as_ref().expect("leaf with a prefix count has a prefix");
                    as_vector(prefix.resolved()).get_unchecked(i)
                } else {
                    leaf.items[(i - prefix_count) as usize].resolved()
                }
            }
            Vector::Tree(tree) => {
                let span = span(tree.count);
                let child = &tree.children[(i / span) as usize];
                as_vector(child.resolved()).get_unchecked(i % span)
            }
        }
    }

    /// Append an element, returning the extended vector.
    pub fn append(&self, value: Cell) -> Vector {
        let item = Ref::direct(value);
        match self {
            Vector::Leaf(leaf) if leaf.count % CHUNK_SIZE != 0 || leaf.count == 0 => {
                let mut items = leaf.items.clone();
                items.push(item);
                if items.len() as u64 == CHUNK_SIZE {
                    match &leaf.prefix {
                        // A tail that just filled its chunk merges into the packed prefix.
                        Some(prefix) => {
                            as_vector(prefix.resolved()).append_chunk_refs(items)
                        }
                        None => Vector::Leaf(VectorLeaf {
                            count: CHUNK_SIZE,
                            prefix: None,
                            items,
                        }),
                    }
                } else {
                    Vector::Leaf(VectorLeaf {
                        count: leaf.count + 1,
                        prefix: leaf.prefix.clone(),
                        items,
                    })
                }
            }
            // Packed vector (count a positive multiple of 16): start a new tail.
            packed => Vector::Leaf(VectorLeaf {
                count: packed.count() + 1,
                prefix: Some(Ref::direct(Cell::Vector(packed.clone()))),
                items: vec![item],
            }),
        }
    }

    /// Append a full 16-element chunk to a packed vector.
    ///
    /// Both `self` and `chunk` must be chunk-aligned: `self.count()` must be a multiple of
    /// 16 and `chunk` must hold exactly 16 elements.
    pub fn append_chunk(&self, chunk: &Vector) -> Vector {
        assert!(
            self.count() % CHUNK_SIZE == 0,
            "append_chunk target must be chunk-aligned"
        );
        let Vector::Leaf(leaf) = chunk else {
            panic!("append_chunk chunk must be a single full leaf");
        };
        assert!(
            leaf.count == CHUNK_SIZE && leaf.prefix.is_none(),
            "append_chunk chunk must hold exactly 16 elements"
        );
        self.append_chunk_refs(leaf.items.clone())
    }

    /// Append a chunk of exactly 16 refs to a packed (chunk-aligned) vector.
    fn append_chunk_refs(&self, chunk: Vec<Ref>) -> Vector {
        debug_assert_eq!(chunk.len() as u64, CHUNK_SIZE);
        debug_assert_eq!(self.count() % CHUNK_SIZE, 0);
        let count = self.count();
        if count == 0 {
            return Vector::Leaf(VectorLeaf {
                count: CHUNK_SIZE,
                prefix: None,
                items: chunk,
            });
        }
        let chunk_leaf = Vector::Leaf(VectorLeaf {
            count: CHUNK_SIZE,
            prefix: None,
            items: chunk,
        });
        match self {
            Vector::Leaf(_) => {
                // A single full chunk grows into a two-child tree.
                Vector::Tree(VectorTree {
                    count: count + CHUNK_SIZE,
                    children: vec![
                        Ref::direct(Cell::Vector(self.clone())),
                        Ref::direct(Cell::Vector(chunk_leaf)),
                    ],
                })
            }
            Vector::Tree(tree) => {
                let child_span = span(count);
                let last_index = tree.children.len() - 1;
                let last_count = count - child_span * last_index as u64;
                if last_count < child_span {
                    // The rightmost spine still has room.
                    let last = as_vector(tree.children[last_index].resolved());
                    let grown = last.append_chunk_refs(chunk_leaf_items(chunk_leaf));
                    let mut children = tree.children.clone();
                    children[last_index] = Ref::direct(Cell::Vector(grown));
                    Vector::Tree(VectorTree {
                        count: count + CHUNK_SIZE,
                        children,
                    })
                } else if tree.children.len() < 16 {
                    let mut children = tree.children.clone();
                    children.push(Ref::direct(Cell::Vector(chunk_leaf)));
                    Vector::Tree(VectorTree {
                        count: count + CHUNK_SIZE,
                        children,
                    })
                } else {
                    // Root is completely full: add a level.
                    Vector::Tree(VectorTree {
                        count: count + CHUNK_SIZE,
                        children: vec![
                            Ref::direct(Cell::Vector(self.clone())),
                            Ref::direct(Cell::Vector(chunk_leaf)),
                        ],
                    })
                }
            }
        }
    }

    /// Replace the element at index `i`, or `None` if `i` is out of range.
    pub fn assoc(&self, i: u64, value: Cell) -> Option<Vector> {
        if i >= self.count() {
            return None;
        }
        Some(self.assoc_unchecked(i, Ref::direct(value)))
    }

    fn assoc_unchecked(&self, i: u64, item: Ref) -> Vector {
        match self {
            Vector::Leaf(leaf) => {
                let prefix_count = leaf.count - leaf.items.len() as u64;
                if i < prefix_count {
                    let prefix = leaf.prefix.as_ref().expect("leaf with a prefix count has a prefix");
                    let updated = as_vector(prefix.resolved()).assoc_unchecked(i, item);
                    Vector::Leaf(VectorLeaf {
                        count: leaf.count,
                        prefix: Some(Ref::direct(Cell::Vector(updated))),
                        items: leaf.items.clone(),
                    })
                } else {
                    let mut items = leaf.items.clone();
                    items[(i - prefix_count) as usize] = item;
                    Vector::Leaf(VectorLeaf {
                        count: leaf.count,
                        prefix: leaf.prefix.clone(),
                        items,
                    })
                }
            }
            Vector::Tree(tree) => {
                let child_span = span(tree.count);
                let child_index = (i / child_span) as usize;
                let updated =
                    as_vector(tree.children[child_index].resolved()).assoc_unchecked(i % child_span, item);
                let mut children = tree.children.clone();
                children[child_index] = Ref::direct(Cell::Vector(updated));
                Vector::Tree(VectorTree {
                    count: tree.count,
                    children,
                })
            }
        }
    }

    /// The sub-vector of `length` elements starting at `start`, or `None` if the range is
    /// out of bounds.
    pub fn sub_vector(&self, start: u64, length: u64) -> Option<Vector> {
        let end = start.checked_add(length)?;
        if end > self.count() {
            return None;
        }
        let mut out = Vector::empty();
        for i in start..end {
            out = out.append(self.get_unchecked(i).clone());
        }
        Some(out)
    }

    /// All elements but the first, or `None` for the empty vector.
    pub fn next(&self) -> Option<Vector> {
        match self.count() {
            0 => None,
            n => self.sub_vector(1, n - 1),
        }
    }

    /// Concatenate `other` onto the end of this vector.
    pub fn concat(&self, other: &Vector) -> Vector {
        let mut out = self.clone();
        for item in other.iter() {
            out = out.append(item.clone());
        }
        out
    }

    /// The number of leading elements this vector has in common with `other`.
    pub fn common_prefix_length(&self, other: &Vector) -> u64 {
        let n = self.count().min(other.count());
        if n == self.count() && n == other.count() && self == other {
            return n;
        }
        for i in 0..n {
            if self.get_unchecked(i) != other.get_unchecked(i) {
                return i;
            }
        }
        n
    }

    pub fn iter(&self) -> VectorIter<'_> {
        VectorIter {
            vector: self,
            index: 0,
        }
    }

    /// This vector's stored child refs: structure nodes and items.
    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            Vector::Leaf(leaf) => {
                let mut refs = Vec::with_capacity(leaf.items.len() + 1);
                if let Some(prefix) = &leaf.prefix {
                    refs.push(prefix.clone());
                }
                refs.extend(leaf.items.iter().cloned());
                refs
            }
            Vector::Tree(tree) => tree.children.clone(),
        }
    }

    /// How many children the packed tree form with `count` elements holds.
    pub(crate) fn tree_child_count(count: u64) -> usize {
        let child_span = span(count);
        count.div_ceil(child_span) as usize
    }
}

pub struct VectorIter<'a> {
    vector: &'a Vector,
    index: u64,
}

impl<'a> Iterator for VectorIter<'a> {
    type Item = &'a Cell;

    fn next(&mut self) -> Option<&'a Cell> {
        let item = self.vector.get(self.index)?;
        self.index += 1;
        Some(item)
    }
}

/// The span of every non-rightmost child of a packed tree with `count` elements: the
/// largest power of 16 strictly below `count`.
fn span(count: u64) -> u64 {
    let mut span = CHUNK_SIZE;
    while span * 16 < count {
        span *= 16;
    }
    span
}

fn as_vector(cell: &Cell) -> &Vector {
    match cell {
        Cell::Vector(v) => v,
        other => panic!("vector structure child must be a vector, found {}", other.type_name()),
    }
}

fn chunk_leaf_items(chunk: Vector) -> Vec<Ref> {
    match chunk {
        Vector::Leaf(leaf) => leaf.items,
        Vector::Tree(_) => unreachable!("chunk is always a leaf"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn longs(n: u64) -> Vector {
        Vector::of((0..n as i64).map(Cell::Long))
    }

    #[test]
    fn get_after_append() {
        for n in [0u64, 1, 15, 16, 17, 31, 32, 33, 255, 256, 257, 272, 1000] {
            let v = longs(n);
            assert_eq!(v.count(), n);
            for i in 0..n {
                assert_eq!(v.get(i), Some(&Cell::Long(i as i64)), "n={} i={}", n, i);
            }
            assert_eq!(v.get(n), None);
        }
    }

    #[test]
    fn canonical_shape_is_build_independent() {
        // Same elements via append vs. via concat of halves: equal cells, equal hashes.
        let whole = longs(100);
        let first = longs(50);
        let second = Vector::of((50..100).map(Cell::Long));
        let joined = first.concat(&second);
        assert_eq!(whole, joined);
        assert_eq!(
            Cell::Vector(whole).hash(),
            Cell::Vector(joined).hash()
        );
    }

    #[test]
    fn tail_is_the_only_partial_chunk() {
        let v = longs(33);
        match &v {
            Vector::Leaf(leaf) => {
                assert_eq!(leaf.items.len(), 1);
                assert!(leaf.prefix.is_some());
            }
            Vector::Tree(_) => panic!("expected tail leaf"),
        }

        let packed = longs(32);
        match &packed {
            Vector::Tree(tree) => assert_eq!(tree.children.len(), 2),
            Vector::Leaf(_) => panic!("expected packed tree"),
        }
    }

    #[test]
    fn assoc_replaces_single_index() {
        let v = longs(40);
        let updated = v.assoc(7, Cell::Long(-7)).unwrap();
        assert_eq!(updated.get(7), Some(&Cell::Long(-7)));
        assert_eq!(updated.get(8), Some(&Cell::Long(8)));
        // The original is untouched.
        assert_eq!(v.get(7), Some(&Cell::Long(7)));
        assert!(v.assoc(40, Cell::Nil).is_none());
    }

    #[test]
    fn sub_vector_identity() {
        let v = longs(50);
        assert_eq!(v.sub_vector(0, 50).unwrap(), v);
        let mid = v.sub_vector(10, 5).unwrap();
        assert_eq!(mid.count(), 5);
        assert_eq!(mid.get(0), Some(&Cell::Long(10)));
        assert!(v.sub_vector(48, 3).is_none());
    }

    #[test]
    fn next_drops_first() {
        let v = longs(3);
        let rest = v.next().unwrap();
        assert_eq!(rest.count(), 2);
        assert_eq!(rest.get(0), Some(&Cell::Long(1)));
        assert!(Vector::empty().next().is_none());
    }

    #[test]
    fn common_prefix_length_finds_divergence() {
        let a = longs(20);
        let mut b = longs(17);
        assert_eq!(a.common_prefix_length(&b), 17);
        b = b.assoc(5, Cell::Long(-5)).unwrap();
        assert_eq!(a.common_prefix_length(&b), 5);
        assert_eq!(a.common_prefix_length(&a), 20);
    }

    #[test]
    fn append_chunk_grows_packed_vectors() {
        let chunk = longs(16);
        let mut packed = Vector::empty();
        for _ in 0..20 {
            packed = packed.append_chunk(&chunk);
        }
        assert_eq!(packed.count(), 320);
        assert_eq!(packed.get(319), Some(&Cell::Long(15)));
    }

    #[test]
    fn encoding_round_trips_across_shapes() {
        use crate::cell::encoding;
        for n in [0u64, 5, 16, 17, 32, 100, 272] {
            let cell = Cell::Vector(longs(n));
            let decoded = encoding::decode(&cell.encode()).unwrap();
            assert_eq!(decoded, cell);
        }
    }
}
