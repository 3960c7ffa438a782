/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-account state.

use crate::cell::{Cell, Ref};
use crate::collections::map::Map;
use crate::types::basic::{AccountKey, Address, Sequence};

/// The status of one account: balance, transaction sequence, definition environment,
/// metadata, optional controller, holdings, and the key allowed to sign for it.
///
/// Accounts without a key (actors) hold definitions and funds but cannot originate
/// transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountStatus {
    pub(crate) balance: u64,
    pub(crate) sequence: Sequence,
    pub(crate) env: Map,
    pub(crate) metadata: Map,
    pub(crate) controller: Option<Address>,
    pub(crate) holdings: Map,
    pub(crate) account_key: Option<AccountKey>,
}

impl AccountStatus {
    /// A fresh account with the given balance, controllable by `account_key` if one is
    /// given.
    pub fn new(balance: u64, account_key: Option<AccountKey>) -> AccountStatus {
        AccountStatus {
            balance,
            sequence: Sequence::new(0),
            env: Map::empty(),
            metadata: Map::empty(),
            controller: None,
            holdings: Map::empty(),
            account_key,
        }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn env(&self) -> &Map {
        &self.env
    }

    pub fn metadata(&self) -> &Map {
        &self.metadata
    }

    pub fn controller(&self) -> Option<Address> {
        self.controller
    }

    pub fn holdings(&self) -> &Map {
        &self.holdings
    }

    pub fn account_key(&self) -> Option<AccountKey> {
        self.account_key
    }

    pub fn with_balance(&self, balance: u64) -> AccountStatus {
        AccountStatus {
            balance,
            ..self.clone()
        }
    }

    pub fn with_sequence(&self, sequence: Sequence) -> AccountStatus {
        AccountStatus {
            sequence,
            ..self.clone()
        }
    }

    pub fn with_env(&self, env: Map) -> AccountStatus {
        AccountStatus {
            env,
            ..self.clone()
        }
    }

    pub fn with_metadata(&self, metadata: Map) -> AccountStatus {
        AccountStatus {
            metadata,
            ..self.clone()
        }
    }

    pub fn with_controller(&self, controller: Option<Address>) -> AccountStatus {
        AccountStatus {
            controller,
            ..self.clone()
        }
    }

    pub fn with_holdings(&self, holdings: Map) -> AccountStatus {
        AccountStatus {
            holdings,
            ..self.clone()
        }
    }

    pub fn cell(self) -> Cell {
        Cell::Account(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![
            Ref::direct(Cell::Map(self.env.clone())),
            Ref::direct(Cell::Map(self.metadata.clone())),
            Ref::direct(Cell::Map(self.holdings.clone())),
        ]
    }
}
