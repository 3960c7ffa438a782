/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks of signed transactions.

use crate::cell::{Cell, Ref};
use crate::collections::vector::Vector;
use crate::signed::SignedData;
use crate::types::basic::{AccountKey, CellHash, Timestamp};

/// A block: a timestamp, the key of the peer that proposed it, and an ordered sequence of
/// signed transactions. Blocks are proposed by one peer and later adopted into the global
/// ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub(crate) timestamp: Timestamp,
    pub(crate) peer_key: AccountKey,
    /// Vector of `SignedData` cells whose payloads are transactions.
    pub(crate) transactions: Vector,
}

impl Block {
    /// Create a block holding `transactions` in order.
    pub fn of(
        timestamp: Timestamp,
        peer_key: AccountKey,
        transactions: impl IntoIterator<Item = SignedData>,
    ) -> Block {
        Block {
            timestamp,
            peer_key,
            transactions: Vector::of(transactions.into_iter().map(SignedData::cell)),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn peer_key(&self) -> AccountKey {
        self.peer_key
    }

    pub fn transactions(&self) -> &Vector {
        &self.transactions
    }

    /// Number of transactions in the block.
    pub fn len(&self) -> u64 {
        self.transactions.count()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn cell(self) -> Cell {
        Cell::Block(Box::new(self))
    }

    pub fn hash(&self) -> CellHash {
        self.clone().cell().hash()
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![Ref::direct(Cell::Vector(self.transactions.clone()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_block_round_trips() {
        use crate::cell::encoding;
        let block = Block::of(Timestamp::new(100), AccountKey::new([1; 32]), []);
        assert!(block.is_empty());
        let cell = block.cell();
        assert_eq!(encoding::decode(&cell.encode()).unwrap(), cell);
    }

    #[test]
    fn blocks_from_different_peers_differ() {
        let a = Block::of(Timestamp::new(100), AccountKey::new([1; 32]), []);
        let b = Block::of(Timestamp::new(100), AccountKey::new([2; 32]), []);
        assert_ne!(a.hash(), b.hash());
    }
}
