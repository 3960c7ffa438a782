/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Results of applying blocks and transactions.

use crate::cell::{Cell, Ref};
use crate::collections::vector::Vector;
use crate::state::State;
use crate::vm::error::ErrorKind;

/// The outcome of one transaction: a value, or an error kind with a message and an
/// execution trace. Errors here are data — they never propagate into the consensus
/// layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxResult {
    Ok(Cell),
    Err {
        kind: ErrorKind,
        message: String,
        trace: Vec<String>,
    },
}

impl TxResult {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> TxResult {
        TxResult::Err {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TxResult::Ok(_))
    }

    pub fn value(&self) -> Option<&Cell> {
        match self {
            TxResult::Ok(value) => Some(value),
            TxResult::Err { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TxResult::Ok(_) => None,
            TxResult::Err { kind, .. } => Some(*kind),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            TxResult::Ok(_) => None,
            TxResult::Err { message, .. } => Some(message),
        }
    }

    pub fn cell(self) -> Cell {
        Cell::TxResult(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            TxResult::Ok(value) => vec![Ref::direct(value.clone())],
            TxResult::Err { .. } => Vec::new(),
        }
    }
}

/// The outcome of applying one block: the post-state and one [`TxResult`] per
/// transaction, in block order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockResult {
    pub(crate) state: State,
    /// Vector of `TxResult` cells aligned to the block's transactions.
    pub(crate) results: Vector,
}

impl BlockResult {
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn results(&self) -> &Vector {
        &self.results
    }

    /// The result of the transaction at `tx_index`.
    pub fn result(&self, tx_index: u64) -> Option<&TxResult> {
        match self.results.get(tx_index) {
            Some(Cell::TxResult(result)) => Some(result),
            _ => None,
        }
    }

    pub fn cell(self) -> Cell {
        Cell::BlockResult(Box::new(self))
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        vec![
            Ref::direct(Cell::State(Box::new(self.state.clone()))),
            Ref::direct(Cell::Vector(self.results.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_result_accessors() {
        let ok = TxResult::Ok(Cell::Long(3));
        assert!(ok.is_ok());
        assert_eq!(ok.value(), Some(&Cell::Long(3)));
        assert_eq!(ok.error_kind(), None);

        let err = TxResult::error(ErrorKind::Funds, "short by 5");
        assert!(!err.is_ok());
        assert_eq!(err.error_kind(), Some(ErrorKind::Funds));
        assert_eq!(err.message(), Some("short by 5"));
    }

    #[test]
    fn tx_result_encoding_round_trips() {
        use crate::cell::encoding;
        let ok = TxResult::Ok(Cell::Long(3)).cell();
        assert_eq!(encoding::decode(&ok.encode()).unwrap(), ok);

        let err = TxResult::Err {
            kind: ErrorKind::Undeclared,
            message: "undeclared symbol: bad".to_string(),
            trace: vec!["in fn body".to_string()],
        }
        .cell();
        assert_eq!(encoding::decode(&err.encode()).unwrap(), err);
    }
}
