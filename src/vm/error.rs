/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The VM's tagged-result mechanism.
//!
//! Every op evaluation returns an [`ExecResult`]: a value, or an [`Exception`]. Both
//! user-visible failures and non-local control flow (`HALT`, `RECUR`, `RETURN`,
//! `TAILCALL`) travel as exceptions; the evaluator inspects the kind and either handles
//! it (fn boundaries handle `RECUR`/`RETURN`, the transaction boundary handles `HALT`) or
//! propagates it. Nothing here unwinds the Rust stack.

use crate::cell::{Cell, Text};

/// The kind of an exception. Codes are part of the [`TxResult`](crate::state::block_result::TxResult)
/// encoding and must stay stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed account does not exist.
    Nobody,
    /// A symbol did not resolve to any binding.
    Undeclared,
    /// Wrong argument count or value for an operation.
    Argument,
    /// A value had the wrong type.
    Cast,
    /// An operation was invalid in the current state.
    State,
    /// A signature or authority check failed.
    Trust,
    /// Insufficient balance for a transfer.
    Funds,
    /// An execution resource other than juice was exhausted.
    Memory,
    /// An assertion failed.
    Assert,
    /// The juice budget was exhausted.
    Juice,
    /// A transaction's sequence number did not match the account.
    Sequence,
    /// Control flow: stop execution successfully with a value.
    Halt,
    /// Control flow: re-enter the enclosing fn with new arguments.
    Recur,
    /// Control flow: return a value from the enclosing fn.
    Return,
    /// Control flow: tail-call another fn.
    TailCall,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Nobody => "NOBODY",
            ErrorKind::Undeclared => "UNDECLARED",
            ErrorKind::Argument => "ARGUMENT",
            ErrorKind::Cast => "CAST",
            ErrorKind::State => "STATE",
            ErrorKind::Trust => "TRUST",
            ErrorKind::Funds => "FUNDS",
            ErrorKind::Memory => "MEMORY",
            ErrorKind::Assert => "ASSERT",
            ErrorKind::Juice => "JUICE",
            ErrorKind::Sequence => "SEQUENCE",
            ErrorKind::Halt => "HALT",
            ErrorKind::Recur => "RECUR",
            ErrorKind::Return => "RETURN",
            ErrorKind::TailCall => "TAILCALL",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ErrorKind::Nobody => 0x01,
            ErrorKind::Undeclared => 0x02,
            ErrorKind::Argument => 0x03,
            ErrorKind::Cast => 0x04,
            ErrorKind::State => 0x05,
            ErrorKind::Trust => 0x06,
            ErrorKind::Funds => 0x07,
            ErrorKind::Memory => 0x08,
            ErrorKind::Assert => 0x09,
            ErrorKind::Juice => 0x0A,
            ErrorKind::Sequence => 0x0B,
            ErrorKind::Halt => 0x0C,
            ErrorKind::Recur => 0x0D,
            ErrorKind::Return => 0x0E,
            ErrorKind::TailCall => 0x0F,
        }
    }

    pub fn from_code(code: u8) -> Option<ErrorKind> {
        Some(match code {
            0x01 => ErrorKind::Nobody,
            0x02 => ErrorKind::Undeclared,
            0x03 => ErrorKind::Argument,
            0x04 => ErrorKind::Cast,
            0x05 => ErrorKind::State,
            0x06 => ErrorKind::Trust,
            0x07 => ErrorKind::Funds,
            0x08 => ErrorKind::Memory,
            0x09 => ErrorKind::Assert,
            0x0A => ErrorKind::Juice,
            0x0B => ErrorKind::Sequence,
            0x0C => ErrorKind::Halt,
            0x0D => ErrorKind::Recur,
            0x0E => ErrorKind::Return,
            0x0F => ErrorKind::TailCall,
            _ => return None,
        })
    }

    /// Control-flow kinds are handled by the evaluator and never surface as user errors
    /// unless they escape every boundary that could handle them.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            ErrorKind::Halt | ErrorKind::Recur | ErrorKind::Return | ErrorKind::TailCall
        )
    }
}

/// A non-local exit carrying a kind, a payload value, and an execution trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exception {
    pub kind: ErrorKind,
    pub value: Cell,
    pub trace: Vec<String>,
}

impl Exception {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Exception {
        Exception {
            kind,
            value: Cell::Text(Text::new(&message.into())),
            trace: Vec::new(),
        }
    }

    pub fn with_value(kind: ErrorKind, value: Cell) -> Exception {
        Exception {
            kind,
            value,
            trace: Vec::new(),
        }
    }

    /// A human-readable message derived from the payload value.
    pub fn message(&self) -> String {
        match &self.value {
            Cell::Text(t) => t.as_str().to_string(),
            Cell::Nil => String::new(),
            other => format!("{:?}", other),
        }
    }

    /// Append a frame description to the execution trace.
    pub fn traced(mut self, frame: impl Into<String>) -> Exception {
        self.trace.push(frame.into());
        self
    }
}

/// The tagged result of evaluating an op.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecResult {
    Value(Cell),
    Exceptional(Exception),
}

impl ExecResult {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> ExecResult {
        ExecResult::Exceptional(Exception::new(kind, message))
    }

    pub fn is_exceptional(&self) -> bool {
        matches!(self, ExecResult::Exceptional(_))
    }

    /// The value, if this result is a value.
    pub fn value(&self) -> Option<&Cell> {
        match self {
            ExecResult::Value(v) => Some(v),
            ExecResult::Exceptional(_) => None,
        }
    }

    /// The exception, if this result is exceptional.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            ExecResult::Value(_) => None,
            ExecResult::Exceptional(ex) => Some(ex),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0x01..=0x0F {
            let kind = ErrorKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(ErrorKind::from_code(0x00).is_none());
        assert!(ErrorKind::from_code(0x10).is_none());
    }

    #[test]
    fn control_kinds() {
        assert!(ErrorKind::Halt.is_control());
        assert!(ErrorKind::Recur.is_control());
        assert!(!ErrorKind::Juice.is_control());
        assert!(!ErrorKind::Sequence.is_control());
    }
}
