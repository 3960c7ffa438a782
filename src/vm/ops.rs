/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The bytecode op enumeration.
//!
//! Ops are cells: each carries the refs it depends on and encodes under a one-byte tag in
//! the `0x40..=0x4B` range. Child refs of an op always point to other op cells, except
//! `Constant`, whose ref points to the constant value.

use crate::cell::{Cell, Ref, Symbol};

/// A compiled expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Produce a constant value.
    Constant(Ref),
    /// Evaluate `f` and `args`, then apply.
    Invoke { f: Ref, args: Vec<Ref> },
    /// Evaluate in order, producing the last result (or nil when empty).
    Do(Vec<Ref>),
    /// Test/result pairs with an optional trailing default.
    Cond(Vec<Ref>),
    /// Resolve a symbol through the current account's environment, then the core
    /// environment.
    Lookup(Symbol),
    /// Install a binding in the current account's environment.
    Def { symbol: Symbol, op: Ref },
    /// Capture the lexical stack into a closure.
    Lambda { params: Vec<Symbol>, body: Ref },
    /// Push binding values onto the lexical stack for the extent of `body`.
    Let { bindings: Vec<Ref>, body: Vec<Ref> },
    /// Read lexical slot `0`-indexed from the bottom of the stack.
    Local(u64),
    /// Write a lexical slot.
    SetLocal { position: u64, op: Ref },
    /// Evaluate with all state changes discarded.
    Query(Ref),
    /// Read a VM context value.
    Special(Special),
}

impl Op {
    pub fn constant(value: Cell) -> Op {
        Op::Constant(Ref::direct(value))
    }

    /// Wrap this op as a cell.
    pub fn cell(self) -> Cell {
        Cell::Op(Box::new(self))
    }

    /// Wrap this op as a direct ref to its cell.
    pub fn into_ref(self) -> Ref {
        Ref::direct(self.cell())
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match self {
            Op::Constant(value) => vec![value.clone()],
            Op::Invoke { f, args } => {
                let mut refs = Vec::with_capacity(args.len() + 1);
                refs.push(f.clone());
                refs.extend(args.iter().cloned());
                refs
            }
            Op::Do(ops) => ops.clone(),
            Op::Cond(clauses) => clauses.clone(),
            Op::Lookup(_) => Vec::new(),
            Op::Def { op, .. } => vec![op.clone()],
            Op::Lambda { body, .. } => vec![body.clone()],
            Op::Let { bindings, body } => {
                let mut refs = bindings.clone();
                refs.extend(body.iter().cloned());
                refs
            }
            Op::Local(_) => Vec::new(),
            Op::SetLocal { op, .. } => vec![op.clone()],
            Op::Query(op) => vec![op.clone()],
            Op::Special(_) => Vec::new(),
        }
    }
}

/// Resolve an op ref to its op. Op refs are produced only by the compiler and the
/// decoder, both of which guarantee the target is an op cell.
pub(crate) fn expect_op(r: &Ref) -> &Op {
    match r.resolved() {
        Cell::Op(op) => op,
        other => panic!("op child must be an op, found {}", other.type_name()),
    }
}

/// The read-only context values exposed as `*name*` symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Special {
    /// `*address*`: the account under which code is executing.
    Address,
    /// `*caller*`: the account that invoked the current call, or nil.
    Caller,
    /// `*origin*`: the account that signed the transaction.
    Origin,
    /// `*balance*`: the current account's balance.
    Balance,
    /// `*timestamp*`: the current state timestamp.
    Timestamp,
    /// `*juice*`: remaining juice.
    Juice,
    /// `*state*`: the whole current state.
    State,
    /// `*sequence*`: the current account's sequence number.
    Sequence,
}

impl Special {
    pub fn code(&self) -> u8 {
        match self {
            Special::Address => 0x00,
            Special::Caller => 0x01,
            Special::Origin => 0x02,
            Special::Balance => 0x03,
            Special::Timestamp => 0x04,
            Special::Juice => 0x05,
            Special::State => 0x06,
            Special::Sequence => 0x07,
        }
    }

    pub fn from_code(code: u8) -> Option<Special> {
        Some(match code {
            0x00 => Special::Address,
            0x01 => Special::Caller,
            0x02 => Special::Origin,
            0x03 => Special::Balance,
            0x04 => Special::Timestamp,
            0x05 => Special::Juice,
            0x06 => Special::State,
            0x07 => Special::Sequence,
            _ => return None,
        })
    }

    pub fn symbol_name(&self) -> &'static str {
        match self {
            Special::Address => "*address*",
            Special::Caller => "*caller*",
            Special::Origin => "*origin*",
            Special::Balance => "*balance*",
            Special::Timestamp => "*timestamp*",
            Special::Juice => "*juice*",
            Special::State => "*state*",
            Special::Sequence => "*sequence*",
        }
    }

    pub fn from_symbol_name(name: &str) -> Option<Special> {
        Some(match name {
            "*address*" => Special::Address,
            "*caller*" => Special::Caller,
            "*origin*" => Special::Origin,
            "*balance*" => Special::Balance,
            "*timestamp*" => Special::Timestamp,
            "*juice*" => Special::Juice,
            "*state*" => Special::State,
            "*sequence*" => Special::Sequence,
            _ => return None,
        })
    }
}

/// A fn value: parameter list, body op, and the lexical stack captured at creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Closure {
    pub(crate) params: Vec<Symbol>,
    pub(crate) body: Ref,
    pub(crate) captured: Vec<Ref>,
}

impl Closure {
    pub fn params(&self) -> &[Symbol] {
        &self.params
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        let mut refs = Vec::with_capacity(self.captured.len() + 1);
        refs.push(self.body.clone());
        refs.extend(self.captured.iter().cloned());
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_codes_round_trip() {
        for code in 0x00..=0x07 {
            let special = Special::from_code(code).unwrap();
            assert_eq!(special.code(), code);
            assert_eq!(
                Special::from_symbol_name(special.symbol_name()),
                Some(special)
            );
        }
        assert!(Special::from_code(0x08).is_none());
        assert!(Special::from_symbol_name("*unknown*").is_none());
    }

    #[test]
    fn op_encoding_round_trips() {
        use crate::cell::encoding;
        let op = Op::Invoke {
            f: Op::Lookup(Symbol::new("+")).into_ref(),
            args: vec![
                Op::constant(Cell::Long(1)).into_ref(),
                Op::constant(Cell::Long(2)).into_ref(),
            ],
        };
        let cell = op.cell();
        let decoded = encoding::decode(&cell.encode()).unwrap();
        assert_eq!(decoded, cell);
    }
}
