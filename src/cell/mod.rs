/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The immutable, content-addressed value universe.
//!
//! Every value handled by the consensus core is a [`Cell`]: an immutable, self-describing
//! structure with a canonical byte encoding and a 32-byte hash derived from that encoding.
//! Two cells with equal encodings are indistinguishable. Each cell declares a finite set of
//! child-cell [`Ref`]s; a reference is either embedded (the child is encoded inline) or
//! hashed (the child is stored by hash and loaded on demand from a store).
//!
//! The cell graph is a DAG rooted by hash. "Mutation" of any cell yields a new cell.

pub mod encoding;

pub mod reference;

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::collections::blob_map::BlobMap;
use crate::collections::map::Map;
use crate::collections::set::Set;
use crate::collections::vector::Vector;
use crate::consensus::belief::Belief;
use crate::consensus::block::Block;
use crate::consensus::order::Order;
use crate::consensus::transaction::Transaction;
use crate::signed::SignedData;
use crate::state::account::AccountStatus;
use crate::state::block_result::{BlockResult, TxResult};
use crate::state::peer_status::PeerStatus;
use crate::state::State;
use crate::types::basic::{AccountKey, Address, CellHash};
use crate::types::crypto_primitives::hash_bytes;
use crate::vm::core::CoreFn;
use crate::vm::ops::{Closure, Op};

pub use reference::{Ref, RefStatus};

/// An immutable byte sequence.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob(Arc<[u8]>);

impl Blob {
    pub fn new(bytes: Vec<u8>) -> Blob {
        Blob(bytes.into())
    }

    pub fn from_slice(bytes: &[u8]) -> Blob {
        Blob(bytes.to_vec().into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Blob {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Blob({} bytes)", self.0.len())
    }
}

/// An immutable string value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Text(Arc<str>);

impl Text {
    pub fn new(s: &str) -> Text {
        Text(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A short interned-like identifier cell, written `:name`.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct Keyword(Arc<str>);

impl Keyword {
    pub fn new(name: &str) -> Keyword {
        Keyword(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A short identifier cell naming a binding.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Symbol {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A cons-list form, distinguished from [`Vector`] only at the syntactic/evaluation layer.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct List(Vector);

impl List {
    pub fn empty() -> List {
        List(Vector::empty())
    }

    pub fn of(items: impl IntoIterator<Item = Cell>) -> List {
        List(Vector::of(items))
    }

    pub fn from_vector(vector: Vector) -> List {
        List(vector)
    }

    pub fn vector(&self) -> &Vector {
        &self.0
    }

    pub fn count(&self) -> u64 {
        self.0.count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: u64) -> Option<&Cell> {
        self.0.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.0.iter()
    }
}

/// Any immutable, hash-addressable data value in the system.
///
/// The comment next to each variant is the type tag of the variant's canonical encoding
/// (see [`encoding`]). Variants whose canonical form splits into multiple representations
/// (vectors, maps, sets) may encode under an auxiliary structural tag.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Cell {
    /// 0x00
    Nil,
    /// 0x01 (false) / 0x02 (true)
    Boolean(bool),
    /// 0x09
    Long(i64),
    /// 0x10 / 0x12
    Vector(Vector),
    /// 0x11
    List(List),
    /// 0x13
    Fn(Box<Closure>),
    /// 0x14
    CoreFn(CoreFn),
    /// 0x20
    Text(Text),
    /// 0x21
    Blob(Blob),
    /// 0x22
    Address(Address),
    /// 0x23
    AccountKey(AccountKey),
    /// 0x30 / 0x36
    Map(Map),
    /// 0x31 / 0x37
    Set(Set),
    /// 0x32
    Signed(Box<SignedData>),
    /// 0x33
    Keyword(Keyword),
    /// 0x34
    Symbol(Symbol),
    /// 0x35
    BlobMap(BlobMap),
    /// 0x40..=0x4B
    Op(Box<Op>),
    /// 0x60
    Block(Box<Block>),
    /// 0x61
    Order(Box<Order>),
    /// 0x62
    Belief(Box<Belief>),
    /// 0x63
    State(Box<State>),
    /// 0x64
    Account(Box<AccountStatus>),
    /// 0x65
    PeerStatus(Box<PeerStatus>),
    /// 0x66
    BlockResult(Box<BlockResult>),
    /// 0x67
    TxResult(Box<TxResult>),
    /// 0x70..=0x72
    Transaction(Box<Transaction>),
}

impl Cell {
    /// Compute this cell's canonical encoding.
    pub fn encode(&self) -> Vec<u8> {
        encoding::encode_cell(self)
    }

    /// Compute this cell's hash: the SHA-256 digest of its canonical encoding.
    ///
    /// Callers that hash the same cell repeatedly should go through a [`Ref`], which
    /// memoizes both the encoding and the hash.
    pub fn hash(&self) -> CellHash {
        hash_bytes(&self.encode())
    }

    /// Enumerate this cell's child-cell references.
    ///
    /// Children of collections are the collections' stored refs (structure nodes and
    /// items); children of record cells are refs wrapping their cell-valued fields.
    pub fn children(&self) -> Vec<Ref> {
        match self {
            Cell::Nil
            | Cell::Boolean(_)
            | Cell::Long(_)
            | Cell::Text(_)
            | Cell::Blob(_)
            | Cell::Address(_)
            | Cell::AccountKey(_)
            | Cell::Keyword(_)
            | Cell::Symbol(_)
            | Cell::CoreFn(_) => Vec::new(),
            Cell::Vector(v) => v.child_refs(),
            Cell::List(l) => l.vector().child_refs(),
            Cell::Fn(f) => f.child_refs(),
            Cell::Map(m) => m.child_refs(),
            Cell::Set(s) => s.child_refs(),
            Cell::BlobMap(bm) => bm.child_refs(),
            Cell::Signed(sd) => vec![sd.payload().clone()],
            Cell::Op(op) => op.child_refs(),
            Cell::Block(b) => b.child_refs(),
            Cell::Order(o) => o.child_refs(),
            Cell::Belief(b) => b.child_refs(),
            Cell::State(s) => s.child_refs(),
            Cell::Account(a) => a.child_refs(),
            Cell::PeerStatus(p) => p.child_refs(),
            Cell::BlockResult(br) => br.child_refs(),
            Cell::TxResult(tr) => tr.child_refs(),
            Cell::Transaction(tx) => tx.child_refs(),
        }
    }

    /// The name of this cell's type, used in cast error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Nil => "Nil",
            Cell::Boolean(_) => "Boolean",
            Cell::Long(_) => "Long",
            Cell::Vector(_) => "Vector",
            Cell::List(_) => "List",
            Cell::Fn(_) => "Fn",
            Cell::CoreFn(_) => "CoreFn",
            Cell::Text(_) => "String",
            Cell::Blob(_) => "Blob",
            Cell::Address(_) => "Address",
            Cell::AccountKey(_) => "AccountKey",
            Cell::Map(_) => "Map",
            Cell::Set(_) => "Set",
            Cell::Signed(_) => "SignedData",
            Cell::Keyword(_) => "Keyword",
            Cell::Symbol(_) => "Symbol",
            Cell::BlobMap(_) => "BlobMap",
            Cell::Op(_) => "Op",
            Cell::Block(_) => "Block",
            Cell::Order(_) => "Order",
            Cell::Belief(_) => "Belief",
            Cell::State(_) => "State",
            Cell::Account(_) => "AccountStatus",
            Cell::PeerStatus(_) => "PeerStatus",
            Cell::BlockResult(_) => "BlockResult",
            Cell::TxResult(_) => "TxResult",
            Cell::Transaction(_) => "Transaction",
        }
    }

    /// CVM truthiness: everything is truthy except `Nil` and `false`.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Cell::Nil | Cell::Boolean(false))
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Cell::Long(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Cell::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Cell::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn from_bool(b: bool) -> Cell {
        Cell::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Cell::Nil.is_truthy());
        assert!(!Cell::Boolean(false).is_truthy());
        assert!(Cell::Boolean(true).is_truthy());
        assert!(Cell::Long(0).is_truthy());
        assert!(Cell::Text(Text::new("")).is_truthy());
    }

    #[test]
    fn structurally_equal_cells_have_equal_hashes() {
        let a = Cell::Vector(Vector::of([Cell::Long(1), Cell::Long(2)]));
        let b = Cell::Vector(Vector::of([Cell::Long(1), Cell::Long(2)]));
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());

        let c = Cell::Vector(Vector::of([Cell::Long(2), Cell::Long(1)]));
        assert_ne!(a.hash(), c.hash());
    }
}
