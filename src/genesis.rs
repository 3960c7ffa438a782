/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Genesis state construction.
//!
//! A network starts from a genesis [`State`] agreed out of band: the initial peer set
//! with stakes, an owner account per peer, and a base account usable as the default
//! origin for queries.

use crate::collections::map::Map;
use crate::state::account::AccountStatus;
use crate::state::peer_status::PeerStatus;
use crate::state::State;
use crate::types::basic::{coin, AccountKey, Address, JuicePrice, Stake, Timestamp};

/// The timestamp of every genesis state unless overridden.
pub const INITIAL_TIMESTAMP: Timestamp = Timestamp::new(1_609_459_200_000);

/// The base account: the default origin for queries. It has no account key, so it can
/// never originate transactions.
pub const BASE_ADDRESS: Address = Address::new([0u8; 32]);

/// One founding peer: its key, its initial stake, and the balance of its owner account.
#[derive(Clone, Debug)]
pub struct GenesisPeer {
    pub key: AccountKey,
    pub stake: u64,
    pub owner_balance: u64,
}

impl GenesisPeer {
    pub fn new(key: AccountKey, stake: u64, owner_balance: u64) -> GenesisPeer {
        GenesisPeer {
            key,
            stake,
            owner_balance,
        }
    }
}

/// Everything needed to build a genesis state.
#[derive(Clone, Debug)]
pub struct GenesisConfig {
    pub peers: Vec<GenesisPeer>,
    pub timestamp: Timestamp,
    pub juice_price: JuicePrice,
    pub base_balance: u64,
}

impl GenesisConfig {
    pub fn new(peers: Vec<GenesisPeer>) -> GenesisConfig {
        GenesisConfig {
            peers,
            timestamp: INITIAL_TIMESTAMP,
            juice_price: JuicePrice::new(2),
            base_balance: 1000 * coin::GOLD,
        }
    }
}

/// The address of the account owning the peer identified by `key`: the key bytes
/// themselves.
pub fn peer_owner_address(key: &AccountKey) -> Address {
    Address::new(key.bytes())
}

/// Build the genesis state for `config`.
pub fn genesis_state(config: &GenesisConfig) -> State {
    let mut accounts = Map::of([(
        crate::cell::Cell::Address(BASE_ADDRESS),
        AccountStatus::new(config.base_balance, None).cell(),
    )]);
    let mut peers = Map::empty();
    for peer in &config.peers {
        let owner = peer_owner_address(&peer.key);
        accounts = accounts.assoc(
            crate::cell::Cell::Address(owner),
            AccountStatus::new(peer.owner_balance, Some(peer.key)).cell(),
        );
        peers = peers.assoc(
            crate::cell::Cell::AccountKey(peer.key),
            PeerStatus::new(owner, Stake::new(peer.stake)).cell(),
        );
    }
    State::new(
        accounts,
        peers,
        config.timestamp,
        config.juice_price,
        coin::SUPPLY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_registers_peers_and_accounts() {
        let key = AccountKey::new([3; 32]);
        let config = GenesisConfig::new(vec![GenesisPeer::new(key, coin::GOLD, 10 * coin::GOLD)]);
        let state = genesis_state(&config);

        assert_eq!(state.timestamp(), INITIAL_TIMESTAMP);
        assert_eq!(state.balance(&BASE_ADDRESS), 1000 * coin::GOLD);

        let status = state.peer(&key).unwrap();
        assert_eq!(status.total_stake(), Stake::new(coin::GOLD));
        assert_eq!(status.owner(), peer_owner_address(&key));

        let owner = state.account(&peer_owner_address(&key)).unwrap();
        assert_eq!(owner.balance(), 10 * coin::GOLD);
        assert_eq!(owner.account_key(), Some(key));
    }

    #[test]
    fn unknown_peer_is_absent() {
        let config = GenesisConfig::new(vec![]);
        let state = genesis_state(&config);
        assert!(state.peer(&AccountKey::new([9; 32])).is_none());
    }
}
