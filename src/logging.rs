/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these
//! messages printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two
//! values are always:
//! 1. The name of the event in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Hashes and peer keys are
//! printed as the first seven characters of their Base64 encoding.

use std::time::SystemTime;

use crate::types::basic::{AccountKey, CellHash};

// Names of each event in PascalCase for printing:
pub const PROPOSE_BLOCK: &str = "ProposeBlock";
pub const MERGE_BELIEF: &str = "MergeBelief";
pub const ADVANCE_CONSENSUS: &str = "AdvanceConsensus";
pub const APPLY_BLOCK: &str = "ApplyBlock";
pub const DROP_ORDER: &str = "DropOrder";
pub const RECEDING_CONSENSUS: &str = "RecedingConsensus";
pub const PERSIST_CELL: &str = "PersistCell";

pub(crate) fn propose_block(hash: &CellHash, transactions: u64, block_count: u64) {
    log::info!(
        "{}, {}, {}, {}, {}",
        PROPOSE_BLOCK,
        secs_since_unix_epoch(),
        hash,
        transactions,
        block_count
    )
}

pub(crate) fn merge_belief(incoming: usize, consensus_point: u64) {
    log::info!(
        "{}, {}, {}, {}",
        MERGE_BELIEF,
        secs_since_unix_epoch(),
        incoming,
        consensus_point
    )
}

pub(crate) fn advance_consensus(old_point: u64, new_point: u64) {
    log::info!(
        "{}, {}, {}, {}",
        ADVANCE_CONSENSUS,
        secs_since_unix_epoch(),
        old_point,
        new_point
    )
}

pub(crate) fn apply_block(index: u64, hash: &CellHash, transactions: u64) {
    log::info!(
        "{}, {}, {}, {}, {}",
        APPLY_BLOCK,
        secs_since_unix_epoch(),
        index,
        hash,
        transactions
    )
}

pub(crate) fn drop_order(peer: &AccountKey, reason: &str) {
    log::warn!(
        "{}, {}, {}, {}",
        DROP_ORDER,
        secs_since_unix_epoch(),
        peer,
        reason
    )
}

pub(crate) fn receding_consensus(old_point: u64, new_point: u64) {
    log::warn!(
        "{}, {}, {}, {}",
        RECEDING_CONSENSUS,
        secs_since_unix_epoch(),
        old_point,
        new_point
    )
}

pub(crate) fn persist_cell(hash: &CellHash) {
    log::trace!("{}, {}, {}", PERSIST_CELL, secs_since_unix_epoch(), hash)
}

fn secs_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock is set before the Unix Epoch.")
        .as_secs()
}
