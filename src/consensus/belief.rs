/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Beliefs and the convergent belief merge.
//!
//! A [`Belief`] is one peer's latest view of every peer's [`Order`], as a map from peer
//! key to signed order. [`Belief::merge`] combines the local belief with beliefs received
//! from other peers:
//!
//! 1. **Incorporation**: for every peer, keep the candidate signed order with the
//!    furthest (proposal point, consensus point). Orders with bad signatures or from
//!    peers without stake in the consensus state are dropped.
//! 2. **Self-preservation**: our own entry always comes from the locally held signed
//!    order; remote copies of it may be stale.
//! 3. **Consensus-point advance**: walk positions from our current consensus point,
//!    tallying stake behind each block hash across the candidate orders *as received*;
//!    while some block holds at least [`consensus_threshold`] stake, the point advances.
//!    A peer therefore never counts agreement another peer has not signed.
//! 4. **Propose-what-others-propose**: our own order is rewritten so that, up to the
//!    furthest position where some block holds at least [`proposal_threshold`] stake,
//!    our blocks match the plurality (ties broken towards the larger block hash). This
//!    forces alignment in one more round.
//! 5. **Sign**: if our order changed, it is re-signed and the belief's entry for us
//!    rewritten.
//!
//! Safety rests on the 2/3 threshold: two honest peers cannot advance past different
//! blocks at the same position unless more than a third of total stake is Byzantine.

use std::collections::BTreeMap;

use crate::cell::{Blob, Cell, Ref};
use crate::collections::blob_map::BlobMap;
use crate::config::ConsensusParams;
use crate::consensus::order::Order;
use crate::logging;
use crate::signed::{SignedData, VerifiedSignedData};
use crate::state::State;
use crate::types::basic::{AccountKey, CellHash, Timestamp, TotalStake};
use crate::types::crypto_primitives::Keypair;

/// The stake a set of orders must match or exceed for a block to be irreversibly agreed:
/// `total * 2/3 + 1`.
///
/// Strictly more than two thirds guarantees that, with Byzantine stake below one third,
/// at most one block can reach the threshold at any position.
pub fn consensus_threshold(total: TotalStake) -> TotalStake {
    const TOTAL_STAKE_OVERFLOW: &str =
        "Total stake exceeds u128::MAX/2. Read the itemdoc for TotalStake.";
    TotalStake::new(
        total
            .int()
            .checked_mul(2)
            .expect(TOTAL_STAKE_OVERFLOW)
            / 3
            + 1,
    )
}

/// The stake behind a plurality block at which we adopt it into our own proposal:
/// half of total stake, met inclusively.
pub fn proposal_threshold(total: TotalStake) -> TotalStake {
    TotalStake::new(total.int() / 2)
}

/// Everything a merge needs besides the beliefs themselves: our keypair, the local
/// wall-clock reading, the consensus state supplying the stake table, and the consensus
/// parameters.
pub struct MergeContext<'a> {
    keypair: &'a Keypair,
    timestamp: Timestamp,
    state: &'a State,
    params: &'a ConsensusParams,
}

impl<'a> MergeContext<'a> {
    pub fn new(
        keypair: &'a Keypair,
        timestamp: Timestamp,
        state: &'a State,
        params: &'a ConsensusParams,
    ) -> MergeContext<'a> {
        MergeContext {
            keypair,
            timestamp,
            state,
            params,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn state(&self) -> &State {
        self.state
    }

    pub fn params(&self) -> &ConsensusParams {
        self.params
    }
}

/// A peer's view of every peer's order: a map from peer key to `SignedData` over an
/// [`Order`], plus the timestamp of the last merge.
///
/// Every signed order held in a belief has passed signature verification; entries enter
/// only as [`VerifiedSignedData`] or through the merge, which verifies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Belief {
    /// Peer key bytes → `SignedData` cell over an order.
    pub(crate) orders: BlobMap,
    pub(crate) timestamp: Timestamp,
}

impl Belief {
    /// Assemble a belief from an order map, as a transport would after decoding. Entries
    /// are not trusted: they are (re-)verified whenever the belief is merged.
    pub fn new(orders: BlobMap, timestamp: Timestamp) -> Belief {
        Belief { orders, timestamp }
    }

    /// The belief of a freshly created peer: a single empty order for its own key.
    pub fn single_order(keypair: &Keypair, timestamp: Timestamp) -> Belief {
        let signed = VerifiedSignedData::sign(keypair, Order::new().cell());
        Belief {
            orders: BlobMap::empty().assoc(
                Blob::from_slice(keypair.account_key().as_slice()),
                signed.cell(),
            ),
            timestamp,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn orders(&self) -> &BlobMap {
        &self.orders
    }

    pub fn peer_count(&self) -> u64 {
        self.orders.count()
    }

    /// The signed order declared by `key`, if any.
    pub fn signed_order(&self, key: &AccountKey) -> Option<&SignedData> {
        match self.orders.get(key.as_slice()) {
            Some(Cell::Signed(signed)) => Some(signed),
            _ => None,
        }
    }

    /// The order declared by `key`, if any.
    pub fn order(&self, key: &AccountKey) -> Option<&Order> {
        match self.signed_order(key)?.payload_cell() {
            Cell::Order(order) => Some(order),
            _ => None,
        }
    }

    /// Replace `key`'s entry with a verified signed order.
    pub fn with_order(&self, key: AccountKey, signed: VerifiedSignedData) -> Belief {
        Belief {
            orders: self
                .orders
                .assoc(Blob::from_slice(key.as_slice()), signed.cell()),
            timestamp: self.timestamp,
        }
    }

    /// Merge `others` into this belief under `mc`, producing the next belief. See the
    /// module docs for the algorithm.
    pub fn merge(&self, mc: &MergeContext, others: &[&Belief]) -> Belief {
        let (stake_table, total) = mc.state.stake_table();
        let stake_of = |key: &AccountKey| -> u128 {
            stake_table
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, stake)| stake.int() as u128)
                .unwrap_or(0)
        };
        let our_key = mc.keypair.account_key();

        // 1. Incorporation: per peer, the furthest verified candidate from a staked peer.
        let mut candidates: BTreeMap<[u8; 32], (SignedData, Order)> = BTreeMap::new();
        let mut incorporate = |signed: &SignedData, already_verified: bool| {
            let key = signed.key();
            if key == our_key {
                return; // self-preservation: remote copies of our order may be stale
            }
            if stake_of(&key) == 0 {
                logging::drop_order(&key, "no stake in consensus state");
                return;
            }
            let Cell::Order(order) = signed.payload_cell() else {
                logging::drop_order(&key, "payload is not an order");
                return;
            };
            if !already_verified && !signed.is_correct() {
                logging::drop_order(&key, "bad signature");
                return;
            }
            let further = |existing: &Order| {
                (order.proposal_point(), order.consensus_point())
                    > (existing.proposal_point(), existing.consensus_point())
            };
            match candidates.get(&key.bytes()) {
                Some((_, existing)) if !further(existing) => {}
                _ => {
                    candidates.insert(key.bytes(), (signed.clone(), (**order).clone()));
                }
            }
        };
        // Entries already held in the local belief were verified when incorporated.
        for entry in self.orders.iter() {
            if let Cell::Signed(signed) = entry.value() {
                incorporate(signed, true);
            }
        }
        for belief in others {
            for entry in belief.orders.iter() {
                if let Cell::Signed(signed) = entry.value() {
                    incorporate(signed, false);
                }
            }
        }

        // 2. Self-preservation: our own entry comes from the local belief only.
        let our_signed = self.signed_order(&our_key).cloned();
        let our_order = self.order(&our_key).cloned().unwrap_or_default();
        if let Some(signed) = &our_signed {
            if let Cell::Order(order) = signed.payload_cell() {
                candidates.insert(our_key.bytes(), (signed.clone(), (**order).clone()));
            }
        }

        // Stake behind each distinct block at `position` across the candidate orders.
        // The winner is the heaviest block, ties broken towards the larger hash so every
        // honest peer picks the same one.
        let tally = |position: u64| -> Option<(CellHash, u128, Ref)> {
            let mut sums: Vec<(CellHash, u128, Ref)> = Vec::new();
            for (key_bytes, (_, order)) in &candidates {
                let stake = stake_of(&AccountKey::new(*key_bytes));
                if stake == 0 {
                    continue;
                }
                let Some(block_ref) = order.block_ref(position) else {
                    continue;
                };
                let hash = block_ref.hash();
                match sums.iter_mut().find(|(h, _, _)| *h == hash) {
                    Some((_, sum, _)) => *sum += stake,
                    None => sums.push((hash, stake, block_ref.clone())),
                }
            }
            sums.into_iter()
                .max_by(|(ha, sa, _), (hb, sb, _)| sa.cmp(sb).then(ha.cmp(hb)))
        };

        // 3. Consensus-point advance over the orders as received.
        let cp0 = our_order.consensus_point();
        let quorum = consensus_threshold(total).int();
        let mut new_cp = cp0;
        while let Some((_, stake, _)) = tally(new_cp) {
            if stake >= quorum {
                new_cp += 1;
            } else {
                break;
            }
        }
        if new_cp > cp0 {
            logging::advance_consensus(cp0, new_cp);
        }

        // 4. Propose-what-others-propose: adopt the plurality from the consensus point
        // forwards; our own unconfirmed tail stays in place beyond it.
        let threshold = proposal_threshold(total).int();
        let mut new_blocks = our_order.blocks().clone();
        let mut position = cp0;
        while let Some((hash, stake, block_ref)) = tally(position) {
            if stake < threshold.max(1) {
                break;
            }
            if position < new_blocks.count() {
                let ours = new_blocks
                    .get_ref(position)
                    .expect("position below count")
                    .hash();
                if ours != hash {
                    new_blocks = new_blocks
                        .assoc(position, block_ref.resolved().clone())
                        .expect("position below count");
                }
            } else {
                new_blocks = new_blocks.append(block_ref.resolved().clone());
            }
            position += 1;
        }

        let new_order = Order::from_parts(new_blocks.clone(), new_blocks.count(), new_cp);

        // 5. Sign our order if it changed; keep the stable signature otherwise.
        let our_entry = match (&our_signed, new_order == our_order) {
            (Some(signed), true) => signed.clone(),
            _ => VerifiedSignedData::sign(mc.keypair, new_order.cell()).into_signed(),
        };

        let mut orders = BlobMap::empty();
        for (key_bytes, (signed, _)) in &candidates {
            orders = orders.assoc(Blob::from_slice(key_bytes), signed.clone().cell());
        }
        orders = orders.assoc(Blob::from_slice(our_key.as_slice()), our_entry.cell());

        Belief {
            orders,
            timestamp: self.timestamp.max(mc.timestamp),
        }
    }

    pub fn cell(self) -> Cell {
        Cell::Belief(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![Ref::direct(Cell::BlobMap(self.orders.clone()))]
    }
}
