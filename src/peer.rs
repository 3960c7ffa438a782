/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The peer state machine.
//!
//! A [`Peer`] is an immutable value encapsulating one peer's whole consensus position:
//! its keypair, its latest signed [`Belief`], the vector of states from genesis up
//! through the latest consensus-applied block, the block results aligned to those states,
//! and the last observed timestamp. Every operation returns a new `Peer`; concurrent
//! readers always see a consistent snapshot.
//!
//! The peer needs its unlocked keypair for online signing, and owns the state
//! transitions driven by external events (proposals, received beliefs, clock ticks).
//! Getting those transitions right is what keeps the peer inside the protocol.

use thiserror::Error;

use crate::cell::{Cell, Keyword};
use crate::collections::map::Map;
use crate::collections::vector::Vector;
use crate::config::ConsensusParams;
use crate::consensus::belief::{Belief, MergeContext};
use crate::consensus::block::Block;
use crate::consensus::order::{Order, ProposeError};
use crate::consensus::transaction::Transaction;
use crate::logging;
use crate::signed::VerifiedSignedData;
use crate::state::block_result::{BlockResult, TxResult};
use crate::state::State;
use crate::store::{self, Store, StoreError};
use crate::types::basic::{AccountKey, Address, CellHash, Timestamp};
use crate::types::crypto_primitives::Keypair;
use crate::vm::compiler;
use crate::vm::error::{ErrorKind, ExecResult};
use crate::vm::{self, Context};

const BELIEF_KEY: &str = "belief";
const STATES_KEY: &str = "states";
const RESULTS_KEY: &str = "results";

/// Error reconstructing a peer from a persisted root.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("persisted peer data is invalid: {0}")]
    BadPeerData(&'static str),
}

/// The encapsulated state of a peer. See the module docs.
#[derive(Clone)]
pub struct Peer {
    keypair: Keypair,
    peer_key: AccountKey,
    /// The latest merged belief, signed by this peer.
    belief: VerifiedSignedData,
    /// Vector of `State` cells: genesis, then one state per consensus-applied block.
    states: Vector,
    /// Vector of `BlockResult` cells aligned to `states[1..]`.
    block_results: Vector,
    /// The latest observed timestamp, advanced by the host polling its clock.
    timestamp: Timestamp,
    params: ConsensusParams,
}

impl Peer {
    /// Create a peer from a genesis state. Its belief holds a single empty order for its
    /// own key.
    pub fn create(keypair: Keypair, genesis: State) -> Peer {
        let timestamp = genesis.timestamp();
        let belief = Belief::single_order(&keypair, timestamp);
        let signed_belief = VerifiedSignedData::sign(&keypair, belief.cell());
        let peer_key = keypair.account_key();
        Peer {
            keypair,
            peer_key,
            belief: signed_belief,
            states: Vector::of([genesis.cell()]),
            block_results: Vector::empty(),
            timestamp,
            params: ConsensusParams::default(),
        }
    }

    /// Create a peer from a genesis state and a belief acquired from a remote peer.
    ///
    /// Bootstrapping is trust-on-first-use: the remote belief passes through the normal
    /// merge path, so unverifiable or unstaked orders in it are dropped. Anchoring the
    /// *choice* of remote peer cryptographically is up to the integrator.
    pub fn create_from_remote(keypair: Keypair, genesis: State, remote_belief: &Belief) -> Peer {
        Peer::create(keypair, genesis).merge_beliefs(&[remote_belief])
    }

    /// Replace the consensus parameters (before the peer starts operating).
    pub fn with_params(self, params: ConsensusParams) -> Peer {
        Peer { params, ..self }
    }

    pub fn peer_key(&self) -> AccountKey {
        self.peer_key
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// The latest merged belief.
    pub fn belief(&self) -> &Belief {
        match self.belief.payload_cell() {
            Cell::Belief(belief) => belief,
            _ => unreachable!("a peer's belief is always signed over a belief cell"),
        }
    }

    /// The latest merged belief together with this peer's signature over it.
    pub fn signed_belief(&self) -> &VerifiedSignedData {
        &self.belief
    }

    /// Sign an arbitrary cell with this peer's keypair.
    pub fn sign(&self, cell: Cell) -> VerifiedSignedData {
        VerifiedSignedData::sign(&self.keypair, cell)
    }

    /// All states from genesis through the latest consensus-applied block.
    pub fn states(&self) -> &Vector {
        &self.states
    }

    pub fn state_count(&self) -> u64 {
        self.states.count()
    }

    /// The current consensus state (the genesis state if no block has reached
    /// consensus).
    pub fn consensus_state(&self) -> &State {
        match self.states.last() {
            Some(Cell::State(state)) => state,
            _ => unreachable!("a peer always holds at least the genesis state"),
        }
    }

    /// The state at index `i` (0 is genesis).
    pub fn state(&self, i: u64) -> Option<&State> {
        match self.states.get(i) {
            Some(Cell::State(state)) => Some(state),
            _ => None,
        }
    }

    /// The hash of the genesis state, identifying the network this peer belongs to.
    pub fn network_id(&self) -> CellHash {
        self.states
            .get_ref(0)
            .expect("a peer always holds at least the genesis state")
            .hash()
    }

    /// The result of applying the block at `block_index`.
    pub fn block_result(&self, block_index: u64) -> Option<&BlockResult> {
        match self.block_results.get(block_index) {
            Some(Cell::BlockResult(result)) => Some(result),
            _ => None,
        }
    }

    /// The result of a specific transaction.
    pub fn result(&self, block_index: u64, tx_index: u64) -> Option<&TxResult> {
        self.block_result(block_index)?.result(tx_index)
    }

    /// This peer's own order in its current belief.
    pub fn peer_order(&self) -> Option<&Order> {
        self.belief().order(&self.peer_key)
    }

    /// The order this peer currently sees for `key`.
    pub fn order(&self, key: &AccountKey) -> Option<&Order> {
        self.belief().order(key)
    }

    pub fn consensus_point(&self) -> u64 {
        self.peer_order().map(Order::consensus_point).unwrap_or(0)
    }

    /// Propose a new block: append it to this peer's own order and re-sign the belief.
    pub fn propose_block(&self, block: Block) -> Result<Peer, ProposeError> {
        let belief = self.belief().clone();
        let my_order = belief.order(&self.peer_key).cloned().unwrap_or_default();
        let new_order = my_order.propose(block, &self.params)?;
        logging::propose_block(
            &new_order
                .block_ref(new_order.block_count() - 1)
                .expect("order has the block just proposed")
                .hash(),
            new_order
                .block(new_order.block_count() - 1)
                .expect("order has the block just proposed")
                .len(),
            new_order.block_count(),
        );
        let signed = VerifiedSignedData::sign(&self.keypair, new_order.cell());
        Ok(self.update_consensus(belief.with_order(self.peer_key, signed)))
    }

    /// Merge a set of received beliefs into this peer's belief, then apply any newly
    /// finalized blocks to the state vector.
    pub fn merge_beliefs(&self, beliefs: &[&Belief]) -> Peer {
        let consensus_state = self.consensus_state().clone();
        let mc = MergeContext::new(&self.keypair, self.timestamp, &consensus_state, &self.params);
        let new_belief = self.belief().merge(&mc, beliefs);

        let old_point = self.consensus_point();
        let new_point = new_belief
            .order(&self.peer_key)
            .map(Order::consensus_point)
            .unwrap_or(0);
        logging::merge_belief(beliefs.len(), new_point);
        if new_point < old_point {
            // Receding consensus must never be committed.
            logging::receding_consensus(old_point, new_point);
            return self.clone();
        }
        self.update_consensus(new_belief)
    }

    /// Adopt an updated belief: apply every newly finalized block of our own order to the
    /// tail state, then sign the belief.
    fn update_consensus(&self, new_belief: Belief) -> Peer {
        let my_order = new_belief.order(&self.peer_key).cloned().unwrap_or_default();
        let consensus_point = my_order.consensus_point();

        let mut states = self.states.clone();
        let mut block_results = self.block_results.clone();
        let mut state_index = states.count() - 1;
        while state_index < consensus_point {
            let Some(block) = my_order.block(state_index) else {
                break;
            };
            let tail = match states.last() {
                Some(Cell::State(state)) => (**state).clone(),
                _ => unreachable!("a peer always holds at least the genesis state"),
            };
            let block_result = tail.apply_block(block, &self.params);
            logging::apply_block(
                state_index,
                &my_order
                    .block_ref(state_index)
                    .expect("block index below the consensus point")
                    .hash(),
                block.len(),
            );
            states = states.append(block_result.state().clone().cell());
            block_results = block_results.append(block_result.cell());
            state_index += 1;
        }

        let signed_belief = VerifiedSignedData::sign(&self.keypair, new_belief.cell());
        Peer {
            keypair: self.keypair.clone(),
            peer_key: self.peer_key,
            belief: signed_belief,
            states,
            block_results,
            timestamp: self.timestamp,
            params: self.params.clone(),
        }
    }

    /// Compile and execute a query on the current consensus state. Queries cannot change
    /// state and are bounded by the juice allowance.
    pub fn execute_query(&self, form: &Cell, address: Address) -> (Context, ExecResult) {
        let state = self.consensus_state().clone();
        let mut ctx = Context::query(state, address);
        if ctx.state().account(&address).is_none() {
            let result = ExecResult::error(
                ErrorKind::Nobody,
                format!("no account for query address {}", address),
            );
            return (ctx, result);
        }
        match compiler::compile(form) {
            Err(ex) => (ctx, ExecResult::Exceptional(ex)),
            Ok(op) => {
                let result = ctx.eval(&op);
                (ctx, result)
            }
        }
    }

    /// [`execute_query`](Self::execute_query) under the base account.
    pub fn execute_query_base(&self, form: &Cell) -> (Context, ExecResult) {
        self.execute_query(form, crate::genesis::BASE_ADDRESS)
    }

    /// Estimate the coin cost of a transaction by performing a dry run against the
    /// current consensus state.
    ///
    /// This is exact if no intermediate transactions affect the state and no
    /// time-dependent functionality is used.
    pub fn estimate_cost(&self, tx: &Transaction) -> u64 {
        let state = self.consensus_state();
        let address = tx.address();
        let (post, _) = vm::apply_transaction(state, tx, None, &self.params);
        state.balance(&address).saturating_sub(post.balance(&address))
    }

    /// Advance the observed timestamp. Goes forwards only: an older timestamp is
    /// silently ignored.
    pub fn update_timestamp(&self, timestamp: Timestamp) -> Peer {
        if timestamp < self.timestamp {
            return self.clone();
        }
        Peer {
            timestamp,
            ..self.clone()
        }
    }

    /// The state as of `timestamp`: the latest state whose timestamp is at or before it,
    /// or `None` if `timestamp` predates the first state.
    pub fn as_of(&self, timestamp: Timestamp) -> Option<&State> {
        for i in (0..self.states.count()).rev() {
            if let Some(state) = self.state(i) {
                if state.timestamp() <= timestamp {
                    return Some(state);
                }
            }
        }
        None
    }

    /// `count` states sampled at `start`, `start + interval`, and so on. Duplicates are
    /// expected when the interval outpaces consensus; samples before the first state are
    /// nil.
    pub fn as_of_range(&self, start: Timestamp, interval: u64, count: u64) -> Vector {
        let mut out = Vector::empty();
        for k in 0..count {
            let at = start + interval * k;
            out = out.append(match self.as_of(at) {
                Some(state) => state.clone().cell(),
                None => Cell::Nil,
            });
        }
        out
    }

    /// The persisted form of this peer: a keyword-keyed map of its belief, states and
    /// block results.
    pub fn to_data(&self) -> Map {
        Map::of([
            (
                Cell::Keyword(Keyword::new(BELIEF_KEY)),
                self.belief.cell(),
            ),
            (
                Cell::Keyword(Keyword::new(STATES_KEY)),
                Cell::Vector(self.states.clone()),
            ),
            (
                Cell::Keyword(Keyword::new(RESULTS_KEY)),
                Cell::Vector(self.block_results.clone()),
            ),
        ])
    }

    /// Persist this peer's data to `store`, returning the root hash to restore from.
    pub fn persist(&self, store: &dyn Store) -> CellHash {
        store::persist(&Cell::Map(self.to_data()), store)
    }

    /// Persist this peer's data to `store`, reporting every newly stored cell to `sink`
    /// exactly once so a transport can broadcast the novelty.
    pub fn persist_announced(
        &self,
        store: &dyn Store,
        sink: &mut dyn FnMut(&crate::cell::Ref),
    ) -> CellHash {
        store::persist_announced(&Cell::Map(self.to_data()), store, sink)
    }

    /// Reconstruct a peer from a persisted root. Returns `Ok(None)` if `root` is not in
    /// the store.
    pub fn restore(
        store: &dyn Store,
        root: &CellHash,
        keypair: Keypair,
    ) -> Result<Option<Peer>, RestoreError> {
        if !store.contains(root) {
            return Ok(None);
        }
        let Cell::Map(data) = store::fetch(store, root)? else {
            return Err(RestoreError::BadPeerData("root is not a map"));
        };
        let Some(Cell::Signed(signed)) = data.get(&Cell::Keyword(Keyword::new(BELIEF_KEY)))
        else {
            return Err(RestoreError::BadPeerData("missing belief"));
        };
        let Some(belief_signed) = (**signed).clone().verify() else {
            return Err(RestoreError::BadPeerData("belief signature does not verify"));
        };
        let Cell::Belief(belief) = belief_signed.payload_cell() else {
            return Err(RestoreError::BadPeerData("belief entry is not a belief"));
        };
        let timestamp = belief.timestamp();
        let Some(Cell::Vector(states)) = data.get(&Cell::Keyword(Keyword::new(STATES_KEY)))
        else {
            return Err(RestoreError::BadPeerData("missing states"));
        };
        if states.is_empty() {
            return Err(RestoreError::BadPeerData("state vector is empty"));
        }
        let Some(Cell::Vector(block_results)) =
            data.get(&Cell::Keyword(Keyword::new(RESULTS_KEY)))
        else {
            return Err(RestoreError::BadPeerData("missing results"));
        };
        let peer_key = keypair.account_key();
        Ok(Some(Peer {
            keypair,
            peer_key,
            belief: belief_signed,
            states: states.clone(),
            block_results: block_results.clone(),
            timestamp,
            params: ConsensusParams::default(),
        }))
    }
}
