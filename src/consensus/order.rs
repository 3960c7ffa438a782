/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A single peer's declared block ordering.

use thiserror::Error;

use crate::cell::{Cell, Ref};
use crate::collections::vector::Vector;
use crate::config::ConsensusParams;
use crate::consensus::block::Block;
use crate::types::basic::Timestamp;

/// One peer's ordered chain of blocks plus two monotone watermarks:
///
/// - `proposal_point`: how far the peer has committed to this ordering;
/// - `consensus_point`: how far the peer believes irreversible consensus has been
///   reached.
///
/// Invariant: `0 <= consensus_point <= proposal_point <= block count`, and neither
/// watermark ever decreases over the lifetime of a peer's own order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Order {
    /// Vector of `Block` cells.
    pub(crate) blocks: Vector,
    pub(crate) proposal_point: u64,
    pub(crate) consensus_point: u64,
}

/// Why a proposed block was rejected before entering the order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProposeError {
    #[error("block holds {count} transactions, above the maximum of {max}")]
    BlockTooLarge { count: u64, max: u64 },
    #[error("block timestamp {proposed} is behind the previous block's {previous}")]
    TimestampRegression {
        proposed: Timestamp,
        previous: Timestamp,
    },
}

impl Order {
    /// An empty order with both watermarks at zero.
    pub fn new() -> Order {
        Order::default()
    }

    pub(crate) fn from_parts(blocks: Vector, proposal_point: u64, consensus_point: u64) -> Order {
        debug_assert!(consensus_point <= proposal_point);
        debug_assert!(proposal_point <= blocks.count());
        Order {
            blocks,
            proposal_point,
            consensus_point,
        }
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.count()
    }

    pub fn proposal_point(&self) -> u64 {
        self.proposal_point
    }

    pub fn consensus_point(&self) -> u64 {
        self.consensus_point
    }

    pub fn blocks(&self) -> &Vector {
        &self.blocks
    }

    /// The block at position `i`.
    pub fn block(&self, i: u64) -> Option<&Block> {
        match self.blocks.get(i) {
            Some(Cell::Block(block)) => Some(block),
            _ => None,
        }
    }

    /// The stored ref of the block at position `i` (its hash is memoized).
    pub(crate) fn block_ref(&self, i: u64) -> Option<&Ref> {
        self.blocks.get_ref(i)
    }

    /// The first `n` blocks of this order.
    pub fn blocks_upto(&self, n: u64) -> Vector {
        self.blocks
            .sub_vector(0, n.min(self.block_count()))
            .expect("clamped range is in bounds")
    }

    /// Append `block`, committing this order to proposing it: the proposal point moves to
    /// the new block count.
    pub fn propose(&self, block: Block, params: &ConsensusParams) -> Result<Order, ProposeError> {
        if block.len() > params.max_block_size {
            return Err(ProposeError::BlockTooLarge {
                count: block.len(),
                max: params.max_block_size,
            });
        }
        if let Some(previous) = self.block(self.block_count().wrapping_sub(1)) {
            if block.timestamp() < previous.timestamp() {
                return Err(ProposeError::TimestampRegression {
                    proposed: block.timestamp(),
                    previous: previous.timestamp(),
                });
            }
        }
        let blocks = self.blocks.append(block.cell());
        let proposal_point = blocks.count();
        Ok(Order {
            blocks,
            proposal_point,
            consensus_point: self.consensus_point,
        })
    }

    /// Raise the consensus point to `n`. The result is clamped into the valid range and
    /// never goes backwards.
    pub fn update_consensus_point(&self, n: u64) -> Order {
        let consensus_point = n.min(self.proposal_point).max(self.consensus_point);
        Order {
            blocks: self.blocks.clone(),
            proposal_point: self.proposal_point,
            consensus_point,
        }
    }

    pub fn cell(self) -> Cell {
        Cell::Order(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![Ref::direct(Cell::Vector(self.blocks.clone()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::AccountKey;

    fn block(ts: u64) -> Block {
        Block::of(Timestamp::new(ts), AccountKey::new([7; 32]), [])
    }

    #[test]
    fn propose_moves_the_proposal_point() {
        let params = ConsensusParams::default();
        let order = Order::new();
        assert_eq!(order.block_count(), 0);
        assert_eq!(order.proposal_point(), 0);

        let order = order.propose(block(100), &params).unwrap();
        assert_eq!(order.block_count(), 1);
        assert_eq!(order.proposal_point(), 1);
        assert_eq!(order.consensus_point(), 0);
    }

    #[test]
    fn propose_rejects_timestamp_regression() {
        let params = ConsensusParams::default();
        let order = Order::new().propose(block(100), &params).unwrap();
        assert!(matches!(
            order.propose(block(99), &params),
            Err(ProposeError::TimestampRegression { .. })
        ));
        // Equal timestamps are allowed.
        assert!(order.propose(block(100), &params).is_ok());
    }

    #[test]
    fn watermarks_never_decrease() {
        let params = ConsensusParams::default();
        let mut order = Order::new();
        let mut last_pp = 0;
        let mut last_cp = 0;
        for i in 0..10u64 {
            order = order.propose(block(100 + i), &params).unwrap();
            if i % 3 == 0 {
                order = order.update_consensus_point(i / 2);
            }
            // An attempt to recede is ignored.
            order = order.update_consensus_point(0);
            assert!(order.proposal_point() >= last_pp);
            assert!(order.consensus_point() >= last_cp);
            assert!(order.consensus_point() <= order.proposal_point());
            assert!(order.proposal_point() <= order.block_count());
            last_pp = order.proposal_point();
            last_cp = order.consensus_point();
        }
    }

    #[test]
    fn blocks_upto_clamps() {
        let params = ConsensusParams::default();
        let order = Order::new()
            .propose(block(1), &params)
            .unwrap()
            .propose(block(2), &params)
            .unwrap();
        assert_eq!(order.blocks_upto(1).count(), 1);
        assert_eq!(order.blocks_upto(10).count(), 2);
    }

    #[test]
    fn encoding_round_trips() {
        use crate::cell::encoding;
        let params = ConsensusParams::default();
        let order = Order::new().propose(block(5), &params).unwrap();
        let cell = order.cell();
        assert_eq!(encoding::decode(&cell.encode()).unwrap(), cell);
    }
}
