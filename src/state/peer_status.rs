/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-peer consensus status.

use crate::cell::{Blob, Cell, Ref};
use crate::collections::blob_map::BlobMap;
use crate::collections::map::Map;
use crate::types::basic::{Address, Stake};

/// The status of a registered peer: the account that owns it, its own stake, and the
/// stake delegated to it by other accounts.
///
/// A peer's weight in consensus is its [total stake](Self::total_stake): its own stake
/// plus the sum of all delegations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerStatus {
    pub(crate) owner: Address,
    pub(crate) own_stake: Stake,
    /// Delegations keyed by delegator address bytes; values are `Long` coin amounts.
    pub(crate) delegated: BlobMap,
    pub(crate) metadata: Map,
}

impl PeerStatus {
    pub fn new(owner: Address, own_stake: Stake) -> PeerStatus {
        PeerStatus {
            owner,
            own_stake,
            delegated: BlobMap::empty(),
            metadata: Map::empty(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn own_stake(&self) -> Stake {
        self.own_stake
    }

    /// The stake delegated by `delegator`, or 0.
    pub fn delegated_stake(&self, delegator: &Address) -> u64 {
        match self.delegated.get(delegator.as_slice()) {
            Some(Cell::Long(amount)) => *amount as u64,
            _ => 0,
        }
    }

    /// Total delegated stake across all delegators.
    pub fn total_delegated_stake(&self) -> u64 {
        self.delegated
            .iter()
            .map(|entry| match entry.value() {
                Cell::Long(amount) => *amount as u64,
                _ => 0,
            })
            .sum()
    }

    /// The peer's consensus weight: own stake plus all delegations.
    pub fn total_stake(&self) -> Stake {
        Stake::new(self.own_stake.int() + self.total_delegated_stake())
    }

    /// Set `delegator`'s stake to `amount`. A zero amount removes the delegation.
    pub fn with_delegated_stake(&self, delegator: Address, amount: u64) -> PeerStatus {
        let delegated = if amount == 0 {
            self.delegated.dissoc(delegator.as_slice())
        } else {
            self.delegated.assoc(
                Blob::from_slice(delegator.as_slice()),
                Cell::Long(amount as i64),
            )
        };
        PeerStatus {
            delegated,
            ..self.clone()
        }
    }

    pub fn cell(self) -> Cell {
        Cell::PeerStatus(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![
            Ref::direct(Cell::BlobMap(self.delegated.clone())),
            Ref::direct(Cell::Map(self.metadata.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegation_changes_total_stake_only() {
        let status = PeerStatus::new(Address::new([1; 32]), Stake::new(1000));
        assert_eq!(status.total_stake(), Stake::new(1000));

        let delegator = Address::new([2; 32]);
        assert_eq!(status.delegated_stake(&delegator), 0);

        let with_delegate = status.with_delegated_stake(delegator, 1234);
        assert_eq!(with_delegate.delegated_stake(&delegator), 1234);
        assert_eq!(with_delegate.total_stake(), Stake::new(2234));
        assert_eq!(with_delegate.own_stake(), Stake::new(1000));

        let removed = with_delegate.with_delegated_stake(delegator, 0);
        assert_eq!(removed.total_stake(), Stake::new(1000));
    }

    #[test]
    fn encoding_round_trips() {
        use crate::cell::encoding;
        let status = PeerStatus::new(Address::new([1; 32]), Stake::new(50))
            .with_delegated_stake(Address::new([2; 32]), 10);
        let cell = status.cell();
        assert_eq!(encoding::decode(&cell.encode()).unwrap(), cell);
    }
}
