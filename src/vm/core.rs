/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The core environment: the built-in fns available to every account.
//!
//! Core fns are cells encoded by name, resolved back through [`CoreFn::from_name`] on
//! decode, so their behavior is supplied by the VM rather than serialized. Symbol lookup
//! falls through the current account's environment into [`core_env`].

use std::sync::OnceLock;

use crate::cell::{Cell, List, Symbol};
use crate::collections::map::Map;
use crate::collections::vector::Vector;
use crate::types::basic::Timestamp;
use crate::vm::error::{ErrorKind, ExecResult, Exception};
use crate::vm::juice;
use crate::vm::Context;

/// A built-in fn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreFn {
    Add,
    Sub,
    Mul,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Not,
    Count,
    Get,
    Assoc,
    Conj,
    Vector,
    EmptyQ,
    NilQ,
    Fail,
    Assert,
    Halt,
    Return,
    Recur,
    Schedule,
}

const ALL: [CoreFn; 22] = [
    CoreFn::Add,
    CoreFn::Sub,
    CoreFn::Mul,
    CoreFn::Eq,
    CoreFn::Lt,
    CoreFn::Gt,
    CoreFn::Le,
    CoreFn::Ge,
    CoreFn::Not,
    CoreFn::Count,
    CoreFn::Get,
    CoreFn::Assoc,
    CoreFn::Conj,
    CoreFn::Vector,
    CoreFn::EmptyQ,
    CoreFn::NilQ,
    CoreFn::Fail,
    CoreFn::Assert,
    CoreFn::Halt,
    CoreFn::Return,
    CoreFn::Recur,
    CoreFn::Schedule,
];

impl CoreFn {
    pub fn name(&self) -> &'static str {
        match self {
            CoreFn::Add => "+",
            CoreFn::Sub => "-",
            CoreFn::Mul => "*",
            CoreFn::Eq => "=",
            CoreFn::Lt => "<",
            CoreFn::Gt => ">",
            CoreFn::Le => "<=",
            CoreFn::Ge => ">=",
            CoreFn::Not => "not",
            CoreFn::Count => "count",
            CoreFn::Get => "get",
            CoreFn::Assoc => "assoc",
            CoreFn::Conj => "conj",
            CoreFn::Vector => "vector",
            CoreFn::EmptyQ => "empty?",
            CoreFn::NilQ => "nil?",
            CoreFn::Fail => "fail",
            CoreFn::Assert => "assert",
            CoreFn::Halt => "halt",
            CoreFn::Return => "return",
            CoreFn::Recur => "recur",
            CoreFn::Schedule => "schedule",
        }
    }

    pub fn from_name(name: &str) -> Option<CoreFn> {
        ALL.iter().copied().find(|cf| cf.name() == name)
    }

    /// The table cost charged when this fn is applied.
    pub fn cost(&self) -> u64 {
        match self {
            CoreFn::Assoc | CoreFn::Conj | CoreFn::Vector => juice::CORE_BUILD,
            CoreFn::Schedule => juice::SCHEDULE,
            _ => juice::CORE_SIMPLE,
        }
    }

    pub(crate) fn apply(&self, ctx: &mut Context, args: Vec<Cell>) -> ExecResult {
        match self {
            CoreFn::Add => fold_longs(args, 0, |a, b| a.checked_add(b)),
            CoreFn::Sub => {
                if args.is_empty() {
                    return arity_error("-", "at least 1");
                }
                if args.len() == 1 {
                    return match long_arg(&args[0]) {
                        Ok(n) => match n.checked_neg() {
                            Some(negated) => ExecResult::Value(Cell::Long(negated)),
                            None => overflow(),
                        },
                        Err(ex) => ExecResult::Exceptional(ex),
                    };
                }
                let first = match long_arg(&args[0]) {
                    Ok(n) => n,
                    Err(ex) => return ExecResult::Exceptional(ex),
                };
                fold_longs(args[1..].to_vec(), first, |a, b| a.checked_sub(b))
            }
            CoreFn::Mul => fold_longs(args, 1, |a, b| a.checked_mul(b)),
            CoreFn::Eq => {
                let equal = args.windows(2).all(|pair| pair[0] == pair[1]);
                ExecResult::Value(Cell::Boolean(equal))
            }
            CoreFn::Lt => compare_longs(args, |a, b| a < b),
            CoreFn::Gt => compare_longs(args, |a, b| a > b),
            CoreFn::Le => compare_longs(args, |a, b| a <= b),
            CoreFn::Ge => compare_longs(args, |a, b| a >= b),
            CoreFn::Not => match args.as_slice() {
                [value] => ExecResult::Value(Cell::Boolean(!value.is_truthy())),
                _ => arity_error("not", "1"),
            },
            CoreFn::Count => match args.as_slice() {
                [value] => count_value(value),
                _ => arity_error("count", "1"),
            },
            CoreFn::Get => match args.as_slice() {
                [collection, key] => get_value(collection, key, &Cell::Nil),
                [collection, key, not_found] => get_value(collection, key, not_found),
                _ => arity_error("get", "2 or 3"),
            },
            CoreFn::Assoc => match args.as_slice() {
                [collection, key, value] => assoc_value(collection, key, value),
                _ => arity_error("assoc", "3"),
            },
            CoreFn::Conj => match args.as_slice() {
                [collection, value] => conj_value(collection, value),
                _ => arity_error("conj", "2"),
            },
            CoreFn::Vector => ExecResult::Value(Cell::Vector(Vector::of(args))),
            CoreFn::EmptyQ => match args.as_slice() {
                [Cell::Nil] => ExecResult::Value(Cell::Boolean(true)),
                [value] => match count_value(value) {
                    ExecResult::Value(Cell::Long(n)) => ExecResult::Value(Cell::Boolean(n == 0)),
                    other => other,
                },
                _ => arity_error("empty?", "1"),
            },
            CoreFn::NilQ => match args.as_slice() {
                [value] => ExecResult::Value(Cell::Boolean(matches!(value, Cell::Nil))),
                _ => arity_error("nil?", "1"),
            },
            CoreFn::Fail => match args.len() {
                0 => ExecResult::Exceptional(Exception::with_value(ErrorKind::Assert, Cell::Nil)),
                1 => ExecResult::Exceptional(Exception::with_value(
                    ErrorKind::Assert,
                    args.into_iter().next().expect("one argument"),
                )),
                _ => arity_error("fail", "0 or 1"),
            },
            CoreFn::Assert => {
                for value in &args {
                    if !value.is_truthy() {
                        return ExecResult::Exceptional(Exception::new(
                            ErrorKind::Assert,
                            format!("assert failed: {:?}", value),
                        ));
                    }
                }
                ExecResult::Value(Cell::Nil)
            }
            CoreFn::Halt => ExecResult::Exceptional(Exception::with_value(
                ErrorKind::Halt,
                args.into_iter().next().unwrap_or(Cell::Nil),
            )),
            CoreFn::Return => ExecResult::Exceptional(Exception::with_value(
                ErrorKind::Return,
                args.into_iter().next().unwrap_or(Cell::Nil),
            )),
            CoreFn::Recur => ExecResult::Exceptional(Exception::with_value(
                ErrorKind::Recur,
                Cell::Vector(Vector::of(args)),
            )),
            CoreFn::Schedule => match args.as_slice() {
                [Cell::Long(millis), Cell::Op(_)] => {
                    if *millis < 0 {
                        return ExecResult::error(
                            ErrorKind::Argument,
                            "schedule timestamp must not be negative",
                        );
                    }
                    let op = args[1].clone();
                    let address = ctx.address;
                    ctx.state =
                        ctx.state
                            .with_scheduled(Timestamp::new(*millis as u64), address, op);
                    ExecResult::Value(Cell::Long(*millis))
                }
                [_, _] => ExecResult::error(
                    ErrorKind::Cast,
                    "schedule expects a timestamp and an op",
                ),
                _ => arity_error("schedule", "2"),
            },
        }
    }
}

/// The shared core environment: symbol → core fn.
pub fn core_env() -> &'static Map {
    static CORE_ENV: OnceLock<Map> = OnceLock::new();
    CORE_ENV.get_or_init(|| {
        Map::of(
            ALL.iter()
                .map(|cf| (Cell::Symbol(Symbol::new(cf.name())), Cell::CoreFn(*cf))),
        )
    })
}

fn arity_error(name: &str, expected: &str) -> ExecResult {
    ExecResult::error(
        ErrorKind::Argument,
        format!("{} expects {} argument(s)", name, expected),
    )
}

fn overflow() -> ExecResult {
    ExecResult::error(ErrorKind::Argument, "integer overflow")
}

fn long_arg(value: &Cell) -> Result<i64, Exception> {
    value.as_long().ok_or_else(|| {
        Exception::new(
            ErrorKind::Cast,
            format!("expected a Long, found {}", value.type_name()),
        )
    })
}

fn fold_longs(args: Vec<Cell>, init: i64, f: impl Fn(i64, i64) -> Option<i64>) -> ExecResult {
    let mut acc = init;
    for value in &args {
        let n = match long_arg(value) {
            Ok(n) => n,
            Err(ex) => return ExecResult::Exceptional(ex),
        };
        acc = match f(acc, n) {
            Some(next) => next,
            None => return overflow(),
        };
    }
    ExecResult::Value(Cell::Long(acc))
}

fn compare_longs(args: Vec<Cell>, ordered: impl Fn(i64, i64) -> bool) -> ExecResult {
    if args.len() < 2 {
        return arity_error("comparison", "at least 2");
    }
    let mut previous = match long_arg(&args[0]) {
        Ok(n) => n,
        Err(ex) => return ExecResult::Exceptional(ex),
    };
    for value in &args[1..] {
        let n = match long_arg(value) {
            Ok(n) => n,
            Err(ex) => return ExecResult::Exceptional(ex),
        };
        if !ordered(previous, n) {
            return ExecResult::Value(Cell::Boolean(false));
        }
        previous = n;
    }
    ExecResult::Value(Cell::Boolean(true))
}

fn count_value(value: &Cell) -> ExecResult {
    let count = match value {
        Cell::Nil => 0,
        Cell::Vector(v) => v.count(),
        Cell::List(l) => l.count(),
        Cell::Map(m) => m.count(),
        Cell::Set(s) => s.count(),
        Cell::BlobMap(bm) => bm.count(),
        Cell::Text(t) => t.as_str().len() as u64,
        Cell::Blob(b) => b.len() as u64,
        other => {
            return ExecResult::error(
                ErrorKind::Cast,
                format!("count expects a collection, found {}", other.type_name()),
            )
        }
    };
    ExecResult::Value(Cell::Long(count as i64))
}

fn get_value(collection: &Cell, key: &Cell, not_found: &Cell) -> ExecResult {
    let found = match collection {
        Cell::Nil => None,
        Cell::Vector(v) => match key.as_long() {
            Some(i) if i >= 0 => v.get(i as u64).cloned(),
            _ => None,
        },
        Cell::List(l) => match key.as_long() {
            Some(i) if i >= 0 => l.get(i as u64).cloned(),
            _ => None,
        },
        Cell::Map(m) => m.get(key).cloned(),
        Cell::Set(s) => return ExecResult::Value(Cell::Boolean(s.contains(key))),
        Cell::BlobMap(bm) => match key {
            Cell::Blob(b) => bm.get(b.bytes()).cloned(),
            _ => None,
        },
        other => {
            return ExecResult::error(
                ErrorKind::Cast,
                format!("get expects a collection, found {}", other.type_name()),
            )
        }
    };
    ExecResult::Value(found.unwrap_or_else(|| not_found.clone()))
}

fn assoc_value(collection: &Cell, key: &Cell, value: &Cell) -> ExecResult {
    match collection {
        Cell::Nil => ExecResult::Value(Cell::Map(
            Map::empty().assoc(key.clone(), value.clone()),
        )),
        Cell::Map(m) => ExecResult::Value(Cell::Map(m.assoc(key.clone(), value.clone()))),
        Cell::Vector(v) => match key.as_long() {
            Some(i) if i >= 0 => match v.assoc(i as u64, value.clone()) {
                Some(updated) => ExecResult::Value(Cell::Vector(updated)),
                None => ExecResult::error(ErrorKind::Argument, "vector index out of range"),
            },
            _ => ExecResult::error(ErrorKind::Cast, "vector assoc expects a Long index"),
        },
        Cell::BlobMap(bm) => match key {
            Cell::Blob(b) => {
                ExecResult::Value(Cell::BlobMap(bm.assoc(b.clone(), value.clone())))
            }
            _ => ExecResult::error(ErrorKind::Cast, "blob map assoc expects a Blob key"),
        },
        other => ExecResult::error(
            ErrorKind::Cast,
            format!("assoc expects a collection, found {}", other.type_name()),
        ),
    }
}

fn conj_value(collection: &Cell, value: &Cell) -> ExecResult {
    match collection {
        Cell::Nil => ExecResult::Value(Cell::Vector(Vector::of([value.clone()]))),
        Cell::Vector(v) => ExecResult::Value(Cell::Vector(v.append(value.clone()))),
        Cell::Set(s) => ExecResult::Value(Cell::Set(s.include(value.clone()))),
        Cell::List(l) => ExecResult::Value(Cell::List(List::from_vector(
            Vector::of([value.clone()]).concat(l.vector()),
        ))),
        other => ExecResult::error(
            ErrorKind::Cast,
            format!("conj expects a collection, found {}", other.type_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for cf in ALL {
            assert_eq!(CoreFn::from_name(cf.name()), Some(cf));
        }
        assert!(CoreFn::from_name("no-such-fn").is_none());
    }

    #[test]
    fn core_env_resolves_plus() {
        let env = core_env();
        assert_eq!(
            env.get(&Cell::Symbol(Symbol::new("+"))),
            Some(&Cell::CoreFn(CoreFn::Add))
        );
        assert_eq!(env.count(), ALL.len() as u64);
    }
}
