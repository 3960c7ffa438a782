/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions.

use crate::cell::{Cell, Ref, Symbol};
use crate::types::basic::{Address, Sequence};
use crate::vm::ops::Op;

/// A transaction: an instruction from an account, carrying that account's next sequence
/// number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    /// Execute an op under the origin account.
    Invoke {
        address: Address,
        sequence: Sequence,
        op: Ref,
    },
    /// Move coins from the origin account to `target`.
    Transfer {
        address: Address,
        sequence: Sequence,
        target: Address,
        amount: u64,
    },
    /// Invoke a fn defined in `target`'s environment, with the origin as `*caller*`.
    Call {
        address: Address,
        sequence: Sequence,
        target: Address,
        name: Symbol,
        /// Argument value cells (already evaluated).
        args: Vec<Ref>,
    },
}

impl Transaction {
    pub fn invoke(address: Address, sequence: Sequence, op: Op) -> Transaction {
        Transaction::Invoke {
            address,
            sequence,
            op: op.into_ref(),
        }
    }

    pub fn transfer(
        address: Address,
        sequence: Sequence,
        target: Address,
        amount: u64,
    ) -> Transaction {
        Transaction::Transfer {
            address,
            sequence,
            target,
            amount,
        }
    }

    pub fn call(
        address: Address,
        sequence: Sequence,
        target: Address,
        name: Symbol,
        args: impl IntoIterator<Item = Cell>,
    ) -> Transaction {
        Transaction::Call {
            address,
            sequence,
            target,
            name,
            args: args.into_iter().map(Ref::direct).collect(),
        }
    }

    /// The origin account.
    pub fn address(&self) -> Address {
        match self {
            Transaction::Invoke { address, .. }
            | Transaction::Transfer { address, .. }
            | Transaction::Call { address, .. } => *address,
        }
    }

    /// The origin account's claimed sequence number.
    pub fn sequence(&self) -> Sequence {
        match self {
            Transaction::Invoke { sequence, .. }
            | Transaction::Transfer { sequence, .. }
            | Transaction::Call { sequence, .. } => *sequence,
        }
    }

    pub fn cell(self) -> Cell {
        Cell::Transaction(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            Transaction::Invoke { op, .. } => vec![op.clone()],
            Transaction::Transfer { .. } => Vec::new(),
            Transaction::Call { args, .. } => args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_round_trips() {
        use crate::cell::encoding;
        let invoke = Transaction::invoke(
            Address::new([1; 32]),
            Sequence::new(1),
            Op::constant(Cell::Long(1)),
        )
        .cell();
        assert_eq!(encoding::decode(&invoke.encode()).unwrap(), invoke);

        let transfer =
            Transaction::transfer(Address::new([1; 32]), Sequence::new(2), Address::new([2; 32]), 500)
                .cell();
        assert_eq!(encoding::decode(&transfer.encode()).unwrap(), transfer);

        let call = Transaction::call(
            Address::new([1; 32]),
            Sequence::new(3),
            Address::new([2; 32]),
            Symbol::new("pay"),
            [Cell::Long(5)],
        )
        .cell();
        assert_eq!(encoding::decode(&call.encode()).unwrap(), call);
    }
}
