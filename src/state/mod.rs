/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The world state and block application.
//!
//! A [`State`] is a deterministic function of (genesis state, applied block sequence). It
//! holds the account map, the registered peer map, the global values (timestamp, juice
//! price, total supply) and the schedule of pending timed calls. Applying a block drains
//! every scheduled call that has come due, then applies the block's signed transactions
//! in order, producing a [`BlockResult`].

pub mod account;

pub mod block_result;

pub mod peer_status;

use crate::cell::{Blob, Cell, Ref};
use crate::collections::blob_map::BlobMap;
use crate::collections::map::Map;
use crate::collections::vector::Vector;
use crate::config::ConsensusParams;
use crate::consensus::block::Block;
use crate::state::account::AccountStatus;
use crate::state::block_result::{BlockResult, TxResult};
use crate::state::peer_status::PeerStatus;
use crate::types::basic::CellHash;
use crate::types::basic::{AccountKey, Address, JuicePrice, Stake, Timestamp, TotalStake};
use crate::vm;
use crate::vm::error::ErrorKind;

/// The shared world state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    /// Address → `AccountStatus` cell.
    pub(crate) accounts: Map,
    /// AccountKey → `PeerStatus` cell.
    pub(crate) peers: Map,
    pub(crate) timestamp: Timestamp,
    pub(crate) juice_price: JuicePrice,
    pub(crate) total_supply: u64,
    /// Big-endian timestamp key → vector of (address, op) pairs.
    pub(crate) schedule: BlobMap,
}

impl State {
    pub fn new(
        accounts: Map,
        peers: Map,
        timestamp: Timestamp,
        juice_price: JuicePrice,
        total_supply: u64,
    ) -> State {
        State {
            accounts,
            peers,
            timestamp,
            juice_price,
            total_supply,
            schedule: BlobMap::empty(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn juice_price(&self) -> JuicePrice {
        self.juice_price
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn accounts(&self) -> &Map {
        &self.accounts
    }

    pub fn peers(&self) -> &Map {
        &self.peers
    }

    pub fn schedule(&self) -> &BlobMap {
        &self.schedule
    }

    /// Look up the account at `address`.
    pub fn account(&self, address: &Address) -> Option<&AccountStatus> {
        match self.accounts.get(&Cell::Address(*address)) {
            Some(Cell::Account(account)) => Some(account),
            _ => None,
        }
    }

    /// The balance of the account at `address`, or 0 if there is none.
    pub fn balance(&self, address: &Address) -> u64 {
        self.account(address).map(AccountStatus::balance).unwrap_or(0)
    }

    pub fn with_account(&self, address: Address, account: AccountStatus) -> State {
        State {
            accounts: self.accounts.assoc(Cell::Address(address), account.cell()),
            ..self.clone()
        }
    }

    /// Look up the registered peer identified by `key`.
    pub fn peer(&self, key: &AccountKey) -> Option<&PeerStatus> {
        match self.peers.get(&Cell::AccountKey(*key)) {
            Some(Cell::PeerStatus(status)) => Some(status),
            _ => None,
        }
    }

    pub fn with_peer(&self, key: AccountKey, status: PeerStatus) -> State {
        State {
            peers: self.peers.assoc(Cell::AccountKey(key), status.cell()),
            ..self.clone()
        }
    }

    pub fn with_timestamp(&self, timestamp: Timestamp) -> State {
        State {
            timestamp,
            ..self.clone()
        }
    }

    pub(crate) fn with_schedule(&self, schedule: BlobMap) -> State {
        State {
            schedule,
            ..self.clone()
        }
    }

    /// Every registered peer with its total stake, in canonical peer-map order, plus the
    /// stake total.
    pub fn stake_table(&self) -> (Vec<(AccountKey, Stake)>, TotalStake) {
        let mut table = Vec::with_capacity(self.peers.count() as usize);
        let mut total = TotalStake::new(0);
        for entry in self.peers.entries() {
            let Cell::AccountKey(key) = entry.key() else {
                continue;
            };
            let Cell::PeerStatus(status) = entry.value() else {
                continue;
            };
            let stake = status.total_stake();
            total += stake;
            table.push((*key, stake));
        }
        (table, total)
    }

    /// Add a scheduled call: at any block whose timestamp is at or past `timestamp`,
    /// execute `op` under `address`.
    pub fn with_scheduled(&self, timestamp: Timestamp, address: Address, op: Cell) -> State {
        debug_assert!(matches!(op, Cell::Op(_)));
        let key = schedule_key(timestamp);
        let pair = Cell::Vector(Vector::of([Cell::Address(address), op]));
        let slot = match self.schedule.get(key.bytes()) {
            Some(Cell::Vector(existing)) => existing.append(pair),
            _ => Vector::of([pair]),
        };
        self.with_schedule(self.schedule.assoc(key, Cell::Vector(slot)))
    }

    /// Apply `block`: advance the state timestamp, execute every scheduled call that has
    /// come due (in time order), then apply each signed transaction in order.
    pub fn apply_block(&self, block: &Block, params: &ConsensusParams) -> BlockResult {
        let mut state = self.clone();
        if block.timestamp() > state.timestamp {
            state = state.with_timestamp(block.timestamp());
        }

        let due_key = schedule_key(block.timestamp());
        let (due, rest) = state.schedule.take_through(due_key.bytes());
        if !due.is_empty() {
            state = state.with_schedule(rest);
            for slot in due {
                let Cell::Vector(pairs) = slot.value() else {
                    continue;
                };
                for pair in pairs.iter() {
                    let Cell::Vector(pair) = pair else {
                        continue;
                    };
                    let (Some(Cell::Address(address)), Some(op)) = (pair.get(0), pair.get(1))
                    else {
                        continue;
                    };
                    let address = *address;
                    let op = op.clone();
                    state = run_scheduled(state, address, &op, params);
                }
            }
        }

        let mut results = Vector::empty();
        for tx in block.transactions().iter() {
            let (next, result) = match tx {
                Cell::Signed(signed) => vm::apply_signed_transaction(&state, signed, params),
                other => (
                    state.clone(),
                    TxResult::error(
                        ErrorKind::Cast,
                        format!("block entry is not signed data: {}", other.type_name()),
                    ),
                ),
            };
            state = next;
            results = results.append(result.cell());
        }

        BlockResult { state, results }
    }

    pub fn cell(self) -> Cell {
        Cell::State(Box::new(self))
    }

    pub fn hash(&self) -> CellHash {
        self.clone().cell().hash()
    }

    /// The canonical encoding of this state.
    pub fn encode(&self) -> Vec<u8> {
        self.clone().cell().encode()
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![
            Ref::direct(Cell::Map(self.accounts.clone())),
            Ref::direct(Cell::Map(self.peers.clone())),
            Ref::direct(Cell::BlobMap(self.schedule.clone())),
        ]
    }
}

/// The schedule key for `timestamp`: 8 big-endian bytes, so blob-map key order is time
/// order.
pub(crate) fn schedule_key(timestamp: Timestamp) -> Blob {
    Blob::new(timestamp.millis().to_be_bytes().to_vec())
}

/// Execute one scheduled call. Scheduled calls are metered like transactions (budget
/// drawn from the account, consumed juice charged, refund on success) but do not touch
/// the account sequence, and their results are discarded.
fn run_scheduled(state: State, address: Address, op: &Cell, params: &ConsensusParams) -> State {
    let Cell::Op(op) = op else {
        return state;
    };
    let Some(account) = state.account(&address).cloned() else {
        return state;
    };
    let price = state.juice_price().int().max(1);
    let budget = (account.balance() / price).min(params.max_juice);
    if budget == 0 {
        return state;
    }
    let prepaid = account.with_balance(account.balance() - budget * price);
    let mut ctx = vm::Context::with_limit(state.with_account(address, prepaid), address, budget);
    let outcome = ctx.eval(op);
    let juice_used = ctx.juice_used().int();
    match outcome {
        vm::error::ExecResult::Value(_) => settle_scheduled(ctx, address, budget, price),
        vm::error::ExecResult::Exceptional(ex) if ex.kind == ErrorKind::Halt => {
            settle_scheduled(ctx, address, budget, price)
        }
        vm::error::ExecResult::Exceptional(_) => {
            let charged = account.with_balance(account.balance() - juice_used * price);
            state.with_account(address, charged)
        }
    }
}

fn settle_scheduled(ctx: vm::Context, address: Address, budget: u64, price: u64) -> State {
    let juice_used = ctx.juice_used().int();
    let after = ctx.into_state();
    match after.account(&address).cloned() {
        Some(account) => {
            let refund = (budget - juice_used) * price;
            after.with_account(address, account.with_balance(account.balance() + refund))
        }
        None => after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> State {
        let address = Address::new([1; 32]);
        let account = AccountStatus::new(1_000_000, None);
        let accounts = Map::of([(Cell::Address(address), account.cell())]);
        State::new(
            accounts,
            Map::empty(),
            Timestamp::new(1000),
            JuicePrice::new(1),
            1_000_000,
        )
    }

    #[test]
    fn account_lookup() {
        let state = test_state();
        let address = Address::new([1; 32]);
        assert_eq!(state.balance(&address), 1_000_000);
        assert!(state.account(&Address::new([9; 32])).is_none());
        assert_eq!(state.balance(&Address::new([9; 32])), 0);
    }

    #[test]
    fn with_account_is_persistent() {
        let state = test_state();
        let address = Address::new([1; 32]);
        let account = state.account(&address).unwrap().with_balance(5);
        let updated = state.with_account(address, account);
        assert_eq!(updated.balance(&address), 5);
        assert_eq!(state.balance(&address), 1_000_000);
    }

    #[test]
    fn schedule_keys_sort_by_time() {
        let early = schedule_key(Timestamp::new(5));
        let late = schedule_key(Timestamp::new(1_000_000));
        assert!(early.bytes() < late.bytes());
    }

    #[test]
    fn stake_table_totals() {
        let key_a = AccountKey::new([1; 32]);
        let key_b = AccountKey::new([2; 32]);
        let state = test_state()
            .with_peer(key_a, PeerStatus::new(Address::new([1; 32]), Stake::new(60)))
            .with_peer(key_b, PeerStatus::new(Address::new([2; 32]), Stake::new(40)));
        let (table, total) = state.stake_table();
        assert_eq!(table.len(), 2);
        assert_eq!(total.int(), 100);
    }

    #[test]
    fn state_encoding_round_trips() {
        use crate::cell::encoding;
        let cell = test_state().cell();
        assert_eq!(encoding::decode(&cell.encode()).unwrap(), cell);
    }
}
