/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The form→op compiler.
//!
//! Forms are plain cells: literals compile to `Constant`, symbols resolve at compile time
//! to `Special`, `Local` or `Lookup` ops, and lists dispatch on their head symbol for the
//! special forms (`def`, `let`, `fn`, `do`, `if`, `cond`, `quote`, `set!`, `query`,
//! `schedule`) or compile to `Invoke`. Lexical positions are resolved statically: the
//! compiler tracks the exact shape of the runtime lexical stack, so `Local` slots line up
//! with what `Let` pushes and fns capture.
//!
//! Reading text into forms is outside the core; callers construct forms directly.

use crate::cell::{Cell, List, Symbol};
use crate::vm::error::{ErrorKind, Exception};
use crate::vm::ops::{Op, Special};

/// Compile a form into an op, or fail with a `Cast`/`Argument` exception describing the
/// malformed form.
pub fn compile(form: &Cell) -> Result<Op, Exception> {
    let mut scope = Vec::new();
    compile_in(form, &mut scope)
}

fn compile_in(form: &Cell, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    match form {
        Cell::Symbol(symbol) => Ok(compile_symbol(symbol, scope)),
        Cell::List(list) => compile_list(list, scope),
        other => Ok(Op::constant(other.clone())),
    }
}

fn compile_symbol(symbol: &Symbol, scope: &[Symbol]) -> Op {
    if let Some(special) = Special::from_symbol_name(symbol.name()) {
        return Op::Special(special);
    }
    // Innermost binding of the name wins.
    match scope.iter().rposition(|bound| bound == symbol) {
        Some(position) => Op::Local(position as u64),
        None => Op::Lookup(symbol.clone()),
    }
}

fn compile_list(list: &List, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    let Some(head) = list.get(0) else {
        return Ok(Op::constant(Cell::List(list.clone())));
    };
    if let Cell::Symbol(head_symbol) = head {
        match head_symbol.name() {
            "def" => return compile_def(list, scope),
            "let" => return compile_let(list, scope),
            "fn" => return compile_fn(list, scope),
            "do" => {
                let body = compile_rest(list, 1, scope)?;
                return Ok(Op::Do(body));
            }
            "if" => {
                if list.count() < 3 || list.count() > 4 {
                    return Err(malformed("if expects a test, a branch and an optional else"));
                }
                let clauses = compile_rest(list, 1, scope)?;
                return Ok(Op::Cond(clauses));
            }
            "cond" => {
                let clauses = compile_rest(list, 1, scope)?;
                return Ok(Op::Cond(clauses));
            }
            "quote" => {
                if list.count() != 2 {
                    return Err(malformed("quote expects exactly 1 form"));
                }
                return Ok(Op::constant(list.get(1).expect("checked length").clone()));
            }
            "set!" => return compile_set(list, scope),
            "query" => {
                if list.count() != 2 {
                    return Err(malformed("query expects exactly 1 form"));
                }
                let inner = compile_in(list.get(1).expect("checked length"), scope)?;
                return Ok(Op::Query(inner.into_ref()));
            }
            "schedule" => return compile_schedule(list, scope),
            _ => {}
        }
    }
    // Ordinary invocation.
    let f = compile_in(head, scope)?;
    let args = compile_rest(list, 1, scope)?;
    Ok(Op::Invoke {
        f: f.into_ref(),
        args,
    })
}

fn compile_rest(
    list: &List,
    from: u64,
    scope: &mut Vec<Symbol>,
) -> Result<Vec<crate::cell::Ref>, Exception> {
    let mut ops = Vec::with_capacity((list.count().saturating_sub(from)) as usize);
    for i in from..list.count() {
        let op = compile_in(list.get(i).expect("index below count"), scope)?;
        ops.push(op.into_ref());
    }
    Ok(ops)
}

fn compile_def(list: &List, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    if list.count() != 3 {
        return Err(malformed("def expects a symbol and a form"));
    }
    let Some(Cell::Symbol(symbol)) = list.get(1) else {
        return Err(malformed("def target must be a symbol"));
    };
    let op = compile_in(list.get(2).expect("checked length"), scope)?;
    Ok(Op::Def {
        symbol: symbol.clone(),
        op: op.into_ref(),
    })
}

fn compile_let(list: &List, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    let Some(Cell::Vector(bindings)) = list.get(1) else {
        return Err(malformed("let expects a binding vector"));
    };
    if bindings.count() % 2 != 0 {
        return Err(malformed("let binding vector must pair symbols with forms"));
    }
    let base = scope.len();
    let mut binding_ops = Vec::with_capacity((bindings.count() / 2) as usize);
    let mut i = 0;
    while i < bindings.count() {
        let Some(Cell::Symbol(name)) = bindings.get(i) else {
            scope.truncate(base);
            return Err(malformed("let binding targets must be symbols"));
        };
        let value_form = bindings.get(i + 1).expect("even binding count");
        // Each binding sees the bindings before it.
        let op = match compile_in(value_form, scope) {
            Ok(op) => op,
            Err(ex) => {
                scope.truncate(base);
                return Err(ex);
            }
        };
        binding_ops.push(op.into_ref());
        scope.push(name.clone());
        i += 2;
    }
    let body = match compile_rest(list, 2, scope) {
        Ok(body) => body,
        Err(ex) => {
            scope.truncate(base);
            return Err(ex);
        }
    };
    scope.truncate(base);
    Ok(Op::Let {
        bindings: binding_ops,
        body,
    })
}

fn compile_fn(list: &List, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    let Some(Cell::Vector(param_vector)) = list.get(1) else {
        return Err(malformed("fn expects a parameter vector"));
    };
    let mut params = Vec::with_capacity(param_vector.count() as usize);
    for param in param_vector.iter() {
        let Cell::Symbol(name) = param else {
            return Err(malformed("fn parameters must be symbols"));
        };
        params.push(name.clone());
    }
    // The body executes on the captured stack plus the arguments, so it compiles in the
    // current scope extended by the parameters.
    let base = scope.len();
    scope.extend(params.iter().cloned());
    let body = match compile_rest(list, 2, scope) {
        Ok(body) => body,
        Err(ex) => {
            scope.truncate(base);
            return Err(ex);
        }
    };
    scope.truncate(base);
    Ok(Op::Lambda {
        params,
        body: Op::Do(body).into_ref(),
    })
}

fn compile_set(list: &List, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    if list.count() != 3 {
        return Err(malformed("set! expects a symbol and a form"));
    }
    let Some(Cell::Symbol(symbol)) = list.get(1) else {
        return Err(malformed("set! target must be a symbol"));
    };
    let Some(position) = scope.iter().rposition(|bound| bound == symbol) else {
        return Err(malformed("set! target must be a lexical binding"));
    };
    let op = compile_in(list.get(2).expect("checked length"), scope)?;
    Ok(Op::SetLocal {
        position: position as u64,
        op: op.into_ref(),
    })
}

fn compile_schedule(list: &List, scope: &mut Vec<Symbol>) -> Result<Op, Exception> {
    if list.count() != 3 {
        return Err(malformed("schedule expects a timestamp form and a body form"));
    }
    let timestamp_op = compile_in(list.get(1).expect("checked length"), scope)?;
    // The scheduled body runs later on a fresh lexical stack.
    let mut fresh_scope = Vec::new();
    let body_op = compile_in(list.get(2).expect("checked length"), &mut fresh_scope)?;
    Ok(Op::Invoke {
        f: Op::constant(Cell::CoreFn(crate::vm::core::CoreFn::Schedule)).into_ref(),
        args: vec![timestamp_op.into_ref(), Op::constant(body_op.cell()).into_ref()],
    })
}

fn malformed(message: &str) -> Exception {
    Exception::new(ErrorKind::Argument, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Cell {
        Cell::Symbol(Symbol::new(name))
    }

    fn form(items: Vec<Cell>) -> Cell {
        Cell::List(List::of(items))
    }

    #[test]
    fn literals_compile_to_constants() {
        assert!(matches!(compile(&Cell::Long(1)).unwrap(), Op::Constant(_)));
        assert!(matches!(compile(&Cell::Nil).unwrap(), Op::Constant(_)));
    }

    #[test]
    fn free_symbols_compile_to_lookups() {
        assert!(matches!(compile(&sym("foo")).unwrap(), Op::Lookup(_)));
    }

    #[test]
    fn special_symbols_compile_to_specials() {
        assert!(matches!(
            compile(&sym("*address*")).unwrap(),
            Op::Special(Special::Address)
        ));
    }

    #[test]
    fn invocation_compiles_head_and_args() {
        let op = compile(&form(vec![sym("+"), Cell::Long(1), Cell::Long(2)])).unwrap();
        match op {
            Op::Invoke { args, .. } => assert_eq!(args.len(), 2),
            other => panic!("expected Invoke, got {:?}", other),
        }
    }

    #[test]
    fn let_assigns_lexical_slots() {
        use crate::collections::vector::Vector;
        // (let [x 1] x)
        let bindings = Cell::Vector(Vector::of([sym("x"), Cell::Long(1)]));
        let op = compile(&form(vec![sym("let"), bindings, sym("x")])).unwrap();
        match op {
            Op::Let { bindings, body } => {
                assert_eq!(bindings.len(), 1);
                assert_eq!(body.len(), 1);
                match crate::vm::ops::expect_op(&body[0]) {
                    Op::Local(0) => {}
                    other => panic!("expected Local(0), got {:?}", other),
                }
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn set_outside_scope_is_rejected() {
        let bad = form(vec![sym("set!"), sym("x"), Cell::Long(1)]);
        let err = compile(&bad).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
    }

    #[test]
    fn quote_suppresses_evaluation() {
        let quoted = form(vec![sym("quote"), sym("foo")]);
        match compile(&quoted).unwrap() {
            Op::Constant(value) => assert_eq!(value.resolved(), &sym("foo")),
            other => panic!("expected Constant, got {:?}", other),
        }
    }
}
