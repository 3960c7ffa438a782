/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Consensus parameters as specified by the operator.

use crate::vm::juice;

/// Operator-facing consensus parameters. The defaults are the protocol values; deviating
/// from them on a live network forks the peer out of consensus.
///
/// The stake thresholds themselves (two thirds for agreement, half for proposal adoption)
/// are protocol constants, not configuration; see
/// [`consensus_threshold`](crate::consensus::belief::consensus_threshold).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Maximum number of transactions in one block.
    pub max_block_size: u64,
    /// Maximum juice allowance for one transaction.
    pub max_juice: u64,
}

impl Default for ConsensusParams {
    fn default() -> ConsensusParams {
        ConsensusParams {
            max_block_size: 1000,
            max_juice: juice::MAX_JUICE,
        }
    }
}
