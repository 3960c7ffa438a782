/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The deterministic virtual machine.
//!
//! Execution is a pure function of (state, transaction): no clock, no randomness, no
//! iteration order that depends on memory layout. A [`Context`] carries the working
//! state, the juice meter, the current/caller/origin addresses and the lexical stack;
//! [`Context::eval`] walks op trees returning tagged [`ExecResult`]s.
//!
//! Transaction application implements the metering contract: the signer pre-pays the
//! whole juice budget, errors revert every state change but still charge consumed juice
//! and advance the account sequence, and successful transactions are refunded the
//! unspent remainder.

pub mod compiler;

pub mod core;

pub mod error;

pub mod juice;

pub mod ops;

use crate::cell::{Cell, Symbol};
use crate::config::ConsensusParams;
use crate::consensus::transaction::Transaction;
use crate::signed::SignedData;
use crate::state::block_result::TxResult;
use crate::state::State;
use crate::types::basic::{AccountKey, Address, Juice};
use crate::vm::error::{ErrorKind, ExecResult, Exception};
use crate::vm::ops::{expect_op, Op, Special};

/// Maximum fn application depth.
pub const MAX_DEPTH: u32 = 256;

/// The execution context for one transaction or query.
#[derive(Clone, Debug)]
pub struct Context {
    pub(crate) state: State,
    pub(crate) juice_limit: u64,
    pub(crate) juice_used: u64,
    pub(crate) origin: Address,
    pub(crate) address: Address,
    pub(crate) caller: Option<Address>,
    pub(crate) locals: Vec<Cell>,
    pub(crate) depth: u32,
}

impl Context {
    /// A context for read-only queries: full juice allowance, nothing charged to any
    /// account.
    pub fn query(state: State, address: Address) -> Context {
        Context::with_limit(state, address, juice::MAX_JUICE)
    }

    pub(crate) fn with_limit(state: State, address: Address, juice_limit: u64) -> Context {
        Context {
            state,
            juice_limit,
            juice_used: 0,
            origin: address,
            address,
            caller: None,
            locals: Vec::new(),
            depth: 0,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn into_state(self) -> State {
        self.state
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn juice_used(&self) -> Juice {
        Juice::new(self.juice_used)
    }

    pub fn juice_remaining(&self) -> Juice {
        Juice::new(self.juice_limit - self.juice_used)
    }

    pub(crate) fn charge(&mut self, cost: u64) -> Result<(), Exception> {
        self.juice_used = self.juice_used.saturating_add(cost);
        if self.juice_used > self.juice_limit {
            self.juice_used = self.juice_limit;
            Err(Exception::new(ErrorKind::Juice, "juice budget exhausted"))
        } else {
            Ok(())
        }
    }

    /// Evaluate an op against this context.
    pub fn eval(&mut self, op: &Op) -> ExecResult {
        match op {
            Op::Constant(value) => {
                if let Err(ex) = self.charge(juice::CONSTANT) {
                    return ExecResult::Exceptional(ex);
                }
                ExecResult::Value(value.resolved().clone())
            }
            Op::Lookup(symbol) => {
                if let Err(ex) = self.charge(juice::LOOKUP) {
                    return ExecResult::Exceptional(ex);
                }
                match self.lookup(symbol) {
                    Some(value) => ExecResult::Value(value),
                    None => ExecResult::error(
                        ErrorKind::Undeclared,
                        format!("undeclared symbol: {}", symbol.name()),
                    ),
                }
            }
            Op::Def { symbol, op } => {
                if let Err(ex) = self.charge(juice::DEF) {
                    return ExecResult::Exceptional(ex);
                }
                let value = match self.eval(expect_op(op)) {
                    ExecResult::Value(value) => value,
                    exceptional => return exceptional,
                };
                let Some(account) = self.state.account(&self.address) else {
                    return ExecResult::error(
                        ErrorKind::Nobody,
                        "no account to define a binding in",
                    );
                };
                let env = account
                    .env()
                    .assoc(Cell::Symbol(symbol.clone()), value.clone());
                let account = account.with_env(env);
                self.state = self.state.with_account(self.address, account);
                ExecResult::Value(value)
            }
            Op::Do(ops) => {
                if let Err(ex) = self.charge(juice::DO) {
                    return ExecResult::Exceptional(ex);
                }
                let mut last = Cell::Nil;
                for op in ops {
                    match self.eval(expect_op(op)) {
                        ExecResult::Value(value) => last = value,
                        exceptional => return exceptional,
                    }
                }
                ExecResult::Value(last)
            }
            Op::Cond(clauses) => {
                if let Err(ex) = self.charge(juice::COND) {
                    return ExecResult::Exceptional(ex);
                }
                let mut i = 0;
                while i + 1 < clauses.len() {
                    let test = match self.eval(expect_op(&clauses[i])) {
                        ExecResult::Value(value) => value,
                        exceptional => return exceptional,
                    };
                    if test.is_truthy() {
                        return self.eval(expect_op(&clauses[i + 1]));
                    }
                    i += 2;
                }
                match clauses.len() % 2 {
                    1 => self.eval(expect_op(&clauses[clauses.len() - 1])),
                    _ => ExecResult::Value(Cell::Nil),
                }
            }
            Op::Let { bindings, body } => {
                if let Err(ex) = self.charge(juice::LET) {
                    return ExecResult::Exceptional(ex);
                }
                let base = self.locals.len();
                for binding in bindings {
                    match self.eval(expect_op(binding)) {
                        ExecResult::Value(value) => self.locals.push(value),
                        exceptional => {
                            self.locals.truncate(base);
                            return exceptional;
                        }
                    }
                }
                let mut last = Cell::Nil;
                for op in body {
                    match self.eval(expect_op(op)) {
                        ExecResult::Value(value) => last = value,
                        exceptional => {
                            self.locals.truncate(base);
                            return exceptional;
                        }
                    }
                }
                self.locals.truncate(base);
                ExecResult::Value(last)
            }
            Op::Local(position) => {
                if let Err(ex) = self.charge(juice::LOCAL) {
                    return ExecResult::Exceptional(ex);
                }
                match self.locals.get(*position as usize) {
                    Some(value) => ExecResult::Value(value.clone()),
                    None => ExecResult::error(
                        ErrorKind::Argument,
                        format!("no lexical slot {}", position),
                    ),
                }
            }
            Op::SetLocal { position, op } => {
                if let Err(ex) = self.charge(juice::SET_LOCAL) {
                    return ExecResult::Exceptional(ex);
                }
                let value = match self.eval(expect_op(op)) {
                    ExecResult::Value(value) => value,
                    exceptional => return exceptional,
                };
                match self.locals.get_mut(*position as usize) {
                    Some(slot) => {
                        *slot = value.clone();
                        ExecResult::Value(value)
                    }
                    None => ExecResult::error(
                        ErrorKind::Argument,
                        format!("no lexical slot {}", position),
                    ),
                }
            }
            Op::Lambda { params, body } => {
                if let Err(ex) = self.charge(juice::LAMBDA) {
                    return ExecResult::Exceptional(ex);
                }
                let captured = self
                    .locals
                    .iter()
                    .map(|value| crate::cell::Ref::direct(value.clone()))
                    .collect();
                ExecResult::Value(Cell::Fn(Box::new(ops::Closure {
                    params: params.clone(),
                    body: body.clone(),
                    captured,
                })))
            }
            Op::Invoke { f, args } => {
                if let Err(ex) = self.charge(juice::INVOKE) {
                    return ExecResult::Exceptional(ex);
                }
                let f = match self.eval(expect_op(f)) {
                    ExecResult::Value(value) => value,
                    exceptional => return exceptional,
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match self.eval(expect_op(arg)) {
                        ExecResult::Value(value) => values.push(value),
                        exceptional => return exceptional,
                    }
                }
                self.apply(&f, values)
            }
            Op::Query(op) => {
                if let Err(ex) = self.charge(juice::QUERY) {
                    return ExecResult::Exceptional(ex);
                }
                let saved = self.state.clone();
                let result = self.eval(expect_op(op));
                self.state = saved;
                result
            }
            Op::Special(special) => {
                if let Err(ex) = self.charge(juice::SPECIAL) {
                    return ExecResult::Exceptional(ex);
                }
                ExecResult::Value(self.special(*special))
            }
        }
    }

    /// Apply a fn value to already-evaluated arguments.
    pub(crate) fn apply(&mut self, f: &Cell, args: Vec<Cell>) -> ExecResult {
        match f {
            Cell::CoreFn(core_fn) => {
                if let Err(ex) = self.charge(core_fn.cost()) {
                    return ExecResult::Exceptional(ex);
                }
                core_fn.apply(self, args)
            }
            Cell::Fn(closure) => self.apply_closure(closure, args),
            Cell::Vector(v) => match args.as_slice() {
                [Cell::Long(i)] if *i >= 0 => {
                    ExecResult::Value(v.get(*i as u64).cloned().unwrap_or(Cell::Nil))
                }
                [_] => ExecResult::error(ErrorKind::Cast, "vector index must be a Long"),
                _ => ExecResult::error(ErrorKind::Argument, "vector lookup expects 1 argument"),
            },
            Cell::Map(m) => match args.as_slice() {
                [key] => ExecResult::Value(m.get(key).cloned().unwrap_or(Cell::Nil)),
                _ => ExecResult::error(ErrorKind::Argument, "map lookup expects 1 argument"),
            },
            Cell::Set(s) => match args.as_slice() {
                [member] => ExecResult::Value(Cell::Boolean(s.contains(member))),
                _ => ExecResult::error(ErrorKind::Argument, "set membership expects 1 argument"),
            },
            Cell::BlobMap(bm) => match args.as_slice() {
                [Cell::Blob(b)] => {
                    ExecResult::Value(bm.get(b.bytes()).cloned().unwrap_or(Cell::Nil))
                }
                [_] => ExecResult::error(ErrorKind::Cast, "blob map lookup expects a Blob key"),
                _ => ExecResult::error(ErrorKind::Argument, "blob map lookup expects 1 argument"),
            },
            other => ExecResult::error(
                ErrorKind::Cast,
                format!("{} is not callable", other.type_name()),
            ),
        }
    }

    fn apply_closure(&mut self, closure: &ops::Closure, mut args: Vec<Cell>) -> ExecResult {
        if self.depth >= MAX_DEPTH {
            return ExecResult::error(ErrorKind::Memory, "execution depth exceeded");
        }
        if args.len() != closure.params.len() {
            return ExecResult::error(
                ErrorKind::Argument,
                format!(
                    "fn expects {} argument(s), got {}",
                    closure.params.len(),
                    args.len()
                ),
            );
        }
        let saved = std::mem::take(&mut self.locals);
        self.depth += 1;
        let result = loop {
            self.locals = closure
                .captured
                .iter()
                .map(|r| r.resolved().clone())
                .collect();
            self.locals.append(&mut args);
            match self.eval(expect_op(&closure.body)) {
                ExecResult::Exceptional(ex) if ex.kind == ErrorKind::Recur => {
                    match ex.value {
                        Cell::Vector(values) if values.count() as usize == closure.params.len() => {
                            args = values.iter().cloned().collect();
                            continue;
                        }
                        _ => {
                            break ExecResult::error(
                                ErrorKind::Argument,
                                "recur arity does not match fn parameters",
                            )
                        }
                    }
                }
                ExecResult::Exceptional(ex) if ex.kind == ErrorKind::Return => {
                    break ExecResult::Value(ex.value)
                }
                ExecResult::Exceptional(ex) if !ex.kind.is_control() => {
                    break ExecResult::Exceptional(ex.traced("in fn body"))
                }
                other => break other,
            }
        };
        self.depth -= 1;
        self.locals = saved;
        result
    }

    fn lookup(&self, symbol: &Symbol) -> Option<Cell> {
        let key = Cell::Symbol(symbol.clone());
        if let Some(account) = self.state.account(&self.address) {
            if let Some(value) = account.env().get(&key) {
                return Some(value.clone());
            }
        }
        crate::vm::core::core_env().get(&key).cloned()
    }

    fn special(&self, special: Special) -> Cell {
        match special {
            Special::Address => Cell::Address(self.address),
            Special::Caller => match self.caller {
                Some(caller) => Cell::Address(caller),
                None => Cell::Nil,
            },
            Special::Origin => Cell::Address(self.origin),
            Special::Balance => Cell::Long(self.balance_of(&self.address) as i64),
            Special::Timestamp => Cell::Long(self.state.timestamp().millis() as i64),
            Special::Juice => Cell::Long((self.juice_limit - self.juice_used) as i64),
            Special::State => Cell::State(Box::new(self.state.clone())),
            Special::Sequence => match self.state.account(&self.address) {
                Some(account) => Cell::Long(account.sequence().int() as i64),
                None => Cell::Long(0),
            },
        }
    }

    fn balance_of(&self, address: &Address) -> u64 {
        self.state
            .account(address)
            .map(|account| account.balance())
            .unwrap_or(0)
    }
}

/// Apply a signed transaction: verify the signature, check that the signer key owns the
/// origin account, then run the transaction body under the metering contract.
pub fn apply_signed_transaction(
    state: &State,
    signed: &SignedData,
    params: &ConsensusParams,
) -> (State, TxResult) {
    let Cell::Transaction(tx) = signed.payload_cell() else {
        return (
            state.clone(),
            TxResult::error(ErrorKind::Cast, "signed payload is not a transaction"),
        );
    };
    if !signed.is_correct() {
        return (
            state.clone(),
            TxResult::error(ErrorKind::Trust, "invalid transaction signature"),
        );
    }
    let signer = signed.key();
    apply_transaction(state, tx, Some(&signer), params)
}

/// Apply a transaction. When `signer` is `None` the key check is skipped (dry runs).
pub fn apply_transaction(
    state: &State,
    tx: &Transaction,
    signer: Option<&AccountKey>,
    params: &ConsensusParams,
) -> (State, TxResult) {
    let address = tx.address();
    let Some(account) = state.account(&address).cloned() else {
        return (
            state.clone(),
            TxResult::error(
                ErrorKind::Nobody,
                format!("no account for address {}", address),
            ),
        );
    };
    if let Some(signer) = signer {
        match account.account_key() {
            Some(key) if key == *signer => {}
            Some(_) => {
                return (
                    state.clone(),
                    TxResult::error(ErrorKind::Trust, "transaction signed by the wrong key"),
                )
            }
            None => {
                return (
                    state.clone(),
                    TxResult::error(ErrorKind::Trust, "account cannot originate transactions"),
                )
            }
        }
    }

    let price = state.juice_price().int().max(1);
    let budget = (account.balance() / price).min(params.max_juice);

    if tx.sequence() != account.sequence().next() {
        // Wrong sequence numbers still charge the base juice cost and burn a sequence
        // slot, so replays cannot probe for free.
        let consumed = juice::TRANSACTION.min(budget);
        let charged = account
            .with_balance(account.balance() - consumed * price)
            .with_sequence(account.sequence().next());
        let message = format!(
            "expected sequence {}, got {}",
            account.sequence().next(),
            tx.sequence()
        );
        return (
            state.with_account(address, charged),
            TxResult::error(ErrorKind::Sequence, message),
        );
    }

    if budget == 0 {
        let bumped = account.with_sequence(account.sequence().next());
        return (
            state.with_account(address, bumped),
            TxResult::error(ErrorKind::Juice, "balance cannot fund any juice"),
        );
    }

    // The whole budget's coin value is deducted up front; the remainder is refunded on
    // success.
    let prepaid = account.with_balance(account.balance() - budget * price);
    let working = state.with_account(address, prepaid);
    let mut ctx = Context::with_limit(working, address, budget);

    let outcome = match ctx.charge(juice::TRANSACTION) {
        Err(ex) => ExecResult::Exceptional(ex),
        Ok(()) => execute_transaction_body(&mut ctx, tx),
    };
    let juice_used = ctx.juice_used;

    match outcome {
        ExecResult::Value(value) => settle_success(state, ctx, address, budget, price, value),
        ExecResult::Exceptional(ex) if ex.kind == ErrorKind::Halt => {
            settle_success(state, ctx, address, budget, price, ex.value)
        }
        ExecResult::Exceptional(ex) => {
            // Revert all state changes; consumed juice stays charged and the sequence
            // still advances.
            let account = state
                .account(&address)
                .expect("origin account existed at entry")
                .clone();
            let charged = account
                .with_balance(account.balance() - juice_used * price)
                .with_sequence(account.sequence().next());
            let result = match ex.kind.is_control() {
                // An escaped RECUR/RETURN/TAILCALL is a user error, reported as such.
                true => TxResult::error(
                    ex.kind,
                    format!("{} escaped the transaction boundary", ex.kind.name()),
                ),
                false => TxResult::Err {
                    kind: ex.kind,
                    message: ex.message(),
                    trace: ex.trace,
                },
            };
            (state.with_account(address, charged), result)
        }
    }
}

fn settle_success(
    original: &State,
    ctx: Context,
    address: Address,
    budget: u64,
    price: u64,
    value: Cell,
) -> (State, TxResult) {
    let juice_used = ctx.juice_used;
    let state = ctx.into_state();
    let Some(account) = state.account(&address).cloned() else {
        // The origin account vanished during execution; treat as a revert.
        let account = original
            .account(&address)
            .expect("origin account existed at entry")
            .clone();
        let charged = account
            .with_balance(account.balance() - juice_used * price)
            .with_sequence(account.sequence().next());
        return (
            original.with_account(address, charged),
            TxResult::error(ErrorKind::State, "origin account removed during execution"),
        );
    };
    let refund = (budget - juice_used) * price;
    let settled = account
        .with_balance(account.balance() + refund)
        .with_sequence(account.sequence().next());
    (state.with_account(address, settled), TxResult::Ok(value))
}

fn execute_transaction_body(ctx: &mut Context, tx: &Transaction) -> ExecResult {
    match tx {
        Transaction::Invoke { op, .. } => ctx.eval(expect_op(op)),
        Transaction::Transfer { target, amount, .. } => {
            if let Err(ex) = ctx.charge(juice::TRANSFER) {
                return ExecResult::Exceptional(ex);
            }
            let source_address = ctx.address;
            let Some(target_account) = ctx.state.account(target).cloned() else {
                return ExecResult::error(
                    ErrorKind::Nobody,
                    format!("no account for transfer target {}", target),
                );
            };
            let source = ctx
                .state
                .account(&source_address)
                .expect("origin account existed at entry")
                .clone();
            if source.balance() < *amount {
                return ExecResult::error(
                    ErrorKind::Funds,
                    format!("balance {} cannot cover transfer of {}", source.balance(), amount),
                );
            }
            if *target == source_address {
                return ExecResult::Value(Cell::Long(*amount as i64));
            }
            let debited = source.with_balance(source.balance() - amount);
            let credited = target_account.with_balance(target_account.balance() + amount);
            ctx.state = ctx
                .state
                .with_account(source_address, debited)
                .with_account(*target, credited);
            ExecResult::Value(Cell::Long(*amount as i64))
        }
        Transaction::Call {
            target, name, args, ..
        } => {
            if let Err(ex) = ctx.charge(juice::INVOKE) {
                return ExecResult::Exceptional(ex);
            }
            let Some(target_account) = ctx.state.account(target) else {
                return ExecResult::error(
                    ErrorKind::Nobody,
                    format!("no account for call target {}", target),
                );
            };
            let Some(f) = target_account.env().get(&Cell::Symbol(name.clone())).cloned() else {
                return ExecResult::error(
                    ErrorKind::Undeclared,
                    format!("target account does not define {}", name.name()),
                );
            };
            let values: Vec<Cell> = args.iter().map(|r| r.resolved().clone()).collect();
            let saved_address = ctx.address;
            let saved_caller = ctx.caller;
            ctx.caller = Some(saved_address);
            ctx.address = *target;
            let result = ctx.apply(&f, values);
            ctx.address = saved_address;
            ctx.caller = saved_caller;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{List, Symbol};
    use crate::collections::map::Map;
    use crate::types::basic::{JuicePrice, Sequence, Timestamp};
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use crate::vm::compiler::compile;

    const ALICE: Address = Address::new([1; 32]);
    const BOB: Address = Address::new([2; 32]);

    fn keypair(seed: u8) -> Keypair {
        Keypair::new(SigningKey::from_bytes(&[seed; 32]))
    }

    fn test_state(alice_key: Option<AccountKey>) -> State {
        use crate::state::account::AccountStatus;
        let accounts = Map::of([
            (Cell::Address(ALICE), AccountStatus::new(1_000_000, alice_key).cell()),
            (Cell::Address(BOB), AccountStatus::new(500, None).cell()),
        ]);
        State::new(
            accounts,
            Map::empty(),
            Timestamp::new(1000),
            JuicePrice::new(1),
            1_500_000,
        )
    }

    fn sym(name: &str) -> Cell {
        Cell::Symbol(Symbol::new(name))
    }

    fn form(items: Vec<Cell>) -> Cell {
        Cell::List(List::of(items))
    }

    fn eval_form(state: State, form_cell: &Cell) -> (Context, ExecResult) {
        let mut ctx = Context::query(state, ALICE);
        let op = compile(form_cell).unwrap();
        let result = ctx.eval(&op);
        (ctx, result)
    }

    #[test]
    fn arithmetic_evaluates() {
        let (_, result) = eval_form(
            test_state(None),
            &form(vec![sym("+"), Cell::Long(1), Cell::Long(2)]),
        );
        assert_eq!(result, ExecResult::Value(Cell::Long(3)));
    }

    #[test]
    fn nested_invocations_evaluate_inside_out() {
        // (* (+ 1 2) (- 10 4)) = 18
        let inner_add = form(vec![sym("+"), Cell::Long(1), Cell::Long(2)]);
        let inner_sub = form(vec![sym("-"), Cell::Long(10), Cell::Long(4)]);
        let (_, result) = eval_form(test_state(None), &form(vec![sym("*"), inner_add, inner_sub]));
        assert_eq!(result, ExecResult::Value(Cell::Long(18)));
    }

    #[test]
    fn undeclared_symbol_errors() {
        let (_, result) = eval_form(test_state(None), &sym("bad"));
        let ex = result.exception().unwrap();
        assert_eq!(ex.kind, ErrorKind::Undeclared);
        assert!(ex.message().contains("bad"));
    }

    #[test]
    fn let_binds_lexical_slots() {
        use crate::collections::vector::Vector;
        // (let [x 5 y (+ x 2)] (* x y)) = 35
        let bindings = Cell::Vector(Vector::of([
            sym("x"),
            Cell::Long(5),
            sym("y"),
            form(vec![sym("+"), sym("x"), Cell::Long(2)]),
        ]));
        let body = form(vec![sym("*"), sym("x"), sym("y")]);
        let (_, result) = eval_form(test_state(None), &form(vec![sym("let"), bindings, body]));
        assert_eq!(result, ExecResult::Value(Cell::Long(35)));
    }

    #[test]
    fn set_updates_a_lexical_slot() {
        use crate::collections::vector::Vector;
        // (let [x 1] (set! x 9) x) = 9
        let bindings = Cell::Vector(Vector::of([sym("x"), Cell::Long(1)]));
        let set = form(vec![sym("set!"), sym("x"), Cell::Long(9)]);
        let (_, result) = eval_form(
            test_state(None),
            &form(vec![sym("let"), bindings, set, sym("x")]),
        );
        assert_eq!(result, ExecResult::Value(Cell::Long(9)));
    }

    #[test]
    fn fn_captures_its_lexical_stack() {
        use crate::collections::vector::Vector;
        // (let [x 10] ((fn [y] (+ x y)) 5)) = 15
        let lambda = form(vec![
            sym("fn"),
            Cell::Vector(Vector::of([sym("y")])),
            form(vec![sym("+"), sym("x"), sym("y")]),
        ]);
        let call = form(vec![lambda, Cell::Long(5)]);
        let bindings = Cell::Vector(Vector::of([sym("x"), Cell::Long(10)]));
        let (_, result) = eval_form(test_state(None), &form(vec![sym("let"), bindings, call]));
        assert_eq!(result, ExecResult::Value(Cell::Long(15)));
    }

    #[test]
    fn recur_rebinds_fn_parameters() {
        use crate::collections::vector::Vector;
        // ((fn [n acc] (if (= n 0) acc (recur (- n 1) (* acc 2)))) 5 1) = 32
        let body = form(vec![
            sym("if"),
            form(vec![sym("="), sym("n"), Cell::Long(0)]),
            sym("acc"),
            form(vec![
                sym("recur"),
                form(vec![sym("-"), sym("n"), Cell::Long(1)]),
                form(vec![sym("*"), sym("acc"), Cell::Long(2)]),
            ]),
        ]);
        let lambda = form(vec![
            sym("fn"),
            Cell::Vector(Vector::of([sym("n"), sym("acc")])),
            body,
        ]);
        let (_, result) = eval_form(
            test_state(None),
            &form(vec![lambda, Cell::Long(5), Cell::Long(1)]),
        );
        assert_eq!(result, ExecResult::Value(Cell::Long(32)));
    }

    #[test]
    fn collections_are_callable() {
        // ((vector 7 8 9) 1) = 8
        let vec_form = form(vec![sym("vector"), Cell::Long(7), Cell::Long(8), Cell::Long(9)]);
        let (_, result) = eval_form(test_state(None), &form(vec![vec_form, Cell::Long(1)]));
        assert_eq!(result, ExecResult::Value(Cell::Long(8)));

        // A set is a membership predicate.
        let mut ctx = Context::query(test_state(None), ALICE);
        let set = Cell::Set(crate::collections::set::Set::of([Cell::Long(3)]));
        assert_eq!(
            ctx.apply(&set, vec![Cell::Long(3)]),
            ExecResult::Value(Cell::Boolean(true))
        );
        assert_eq!(
            ctx.apply(&set, vec![Cell::Long(4)]),
            ExecResult::Value(Cell::Boolean(false))
        );
        // A map looks up keys.
        let map = Cell::Map(Map::of([(Cell::Long(1), Cell::Long(10))]));
        assert_eq!(
            ctx.apply(&map, vec![Cell::Long(1)]),
            ExecResult::Value(Cell::Long(10))
        );
        assert_eq!(ctx.apply(&map, vec![Cell::Long(2)]), ExecResult::Value(Cell::Nil));
    }

    #[test]
    fn specials_read_the_context() {
        let (_, result) = eval_form(test_state(None), &sym("*address*"));
        assert_eq!(result, ExecResult::Value(Cell::Address(ALICE)));

        let (_, result) = eval_form(test_state(None), &sym("*balance*"));
        assert_eq!(result, ExecResult::Value(Cell::Long(1_000_000)));

        let (_, result) = eval_form(test_state(None), &sym("*timestamp*"));
        assert_eq!(result, ExecResult::Value(Cell::Long(1000)));

        let (_, result) = eval_form(test_state(None), &sym("*caller*"));
        assert_eq!(result, ExecResult::Value(Cell::Nil));
    }

    #[test]
    fn def_installs_a_binding() {
        let defining = form(vec![sym("def"), sym("answer"), Cell::Long(42)]);
        let (ctx, result) = eval_form(test_state(None), &defining);
        assert_eq!(result, ExecResult::Value(Cell::Long(42)));
        let account = ctx.state().account(&ALICE).unwrap();
        assert_eq!(
            account.env().get(&sym("answer")),
            Some(&Cell::Long(42))
        );
    }

    #[test]
    fn query_op_discards_state_changes() {
        // (do (query (def hidden 1)) hidden) -> UNDECLARED
        let queried = form(vec![sym("query"), form(vec![sym("def"), sym("hidden"), Cell::Long(1)])]);
        let (_, result) = eval_form(test_state(None), &form(vec![sym("do"), queried, sym("hidden")]));
        assert_eq!(result.exception().unwrap().kind, ErrorKind::Undeclared);
    }

    #[test]
    fn juice_exhaustion_aborts() {
        let mut ctx = Context::with_limit(test_state(None), ALICE, 25);
        // A budget of 25 cannot even cover the invoke cost.
        let op = compile(&form(vec![sym("+"), Cell::Long(1), Cell::Long(2)])).unwrap();
        let result = ctx.eval(&op);
        assert_eq!(result.exception().unwrap().kind, ErrorKind::Juice);
        assert_eq!(ctx.juice_used().int(), 25);
    }

    #[test]
    fn halt_is_a_successful_exit() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let op = compile(&form(vec![
            sym("do"),
            form(vec![sym("halt"), Cell::Long(7)]),
            form(vec![sym("fail"), Cell::Text(crate::cell::Text::new("unreached"))]),
        ]))
        .unwrap();
        let tx = Transaction::invoke(ALICE, Sequence::new(1), op);
        let (post, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.value(), Some(&Cell::Long(7)));
        let account = post.account(&ALICE).unwrap();
        assert_eq!(account.sequence(), Sequence::new(1));
    }

    #[test]
    fn transaction_success_settles_juice_exactly() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let op = compile(&form(vec![sym("+"), Cell::Long(1), Cell::Long(2)])).unwrap();
        let tx = Transaction::invoke(ALICE, Sequence::new(1), op);
        let (post, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.value(), Some(&Cell::Long(3)));

        // pre-balance = post-balance + consumed * price (price is 1 here).
        let pre = state.balance(&ALICE);
        let post_balance = post.balance(&ALICE);
        let consumed = pre - post_balance;
        // TRANSACTION + INVOKE + LOOKUP + 2 constants + core cost.
        assert_eq!(
            consumed,
            juice::TRANSACTION + juice::INVOKE + juice::LOOKUP + 2 * juice::CONSTANT + juice::CORE_SIMPLE
        );
        assert_eq!(post.account(&ALICE).unwrap().sequence(), Sequence::new(1));
    }

    #[test]
    fn failed_transaction_reverts_but_charges() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        // (do (def x 1) (fail "boom"))
        let op = compile(&form(vec![
            sym("do"),
            form(vec![sym("def"), sym("x"), Cell::Long(1)]),
            form(vec![sym("fail"), Cell::Text(crate::cell::Text::new("boom"))]),
        ]))
        .unwrap();
        let tx = Transaction::invoke(ALICE, Sequence::new(1), op);
        let (post, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());

        let account = post.account(&ALICE).unwrap();
        // The def was reverted.
        assert_eq!(account.env().get(&sym("x")), None);
        // But juice was charged and the sequence advanced.
        assert!(account.balance() < state.balance(&ALICE));
        assert_eq!(account.sequence(), Sequence::new(1));
        assert_eq!(result.error_kind(), Some(ErrorKind::Assert));
        assert_eq!(result.message(), Some("boom"));
    }

    #[test]
    fn wrong_sequence_is_rejected_and_charged() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let op = compile(&Cell::Long(1)).unwrap();
        let tx = Transaction::invoke(ALICE, Sequence::new(5), op);
        let (post, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::Sequence));
        let account = post.account(&ALICE).unwrap();
        assert_eq!(account.balance(), state.balance(&ALICE) - juice::TRANSACTION);
        assert_eq!(account.sequence(), Sequence::new(1));
    }

    #[test]
    fn wrong_signer_key_is_trust_error() {
        let kp = keypair(1);
        let other = keypair(2);
        let state = test_state(Some(kp.account_key()));
        let op = compile(&Cell::Long(1)).unwrap();
        let tx = Transaction::invoke(ALICE, Sequence::new(1), op);
        let (post, result) = apply_transaction(&state, &tx, Some(&other.account_key()), &ConsensusParams::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::Trust));
        // Nothing was touched.
        assert_eq!(post.account(&ALICE), state.account(&ALICE));
    }

    #[test]
    fn missing_account_is_nobody() {
        let state = test_state(None);
        let op = compile(&Cell::Long(1)).unwrap();
        let tx = Transaction::invoke(Address::new([9; 32]), Sequence::new(1), op);
        let (post, result) = apply_transaction(&state, &tx, None, &ConsensusParams::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::Nobody));
        assert_eq!(post, state);
    }

    #[test]
    fn transfer_moves_funds_atomically() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let tx = Transaction::transfer(ALICE, Sequence::new(1), BOB, 10_000);
        let (post, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert!(result.is_ok());
        assert_eq!(post.balance(&BOB), 10_500);
        let juice_cost = juice::TRANSACTION + juice::TRANSFER;
        assert_eq!(post.balance(&ALICE), 1_000_000 - 10_000 - juice_cost);
    }

    #[test]
    fn transfer_with_insufficient_funds_fails() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let tx = Transaction::transfer(ALICE, Sequence::new(1), BOB, 2_000_000);
        let (post, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::Funds));
        // Target untouched; source charged juice only, sequence advanced.
        assert_eq!(post.balance(&BOB), 500);
        assert_eq!(post.account(&ALICE).unwrap().sequence(), Sequence::new(1));
    }

    #[test]
    fn transfer_to_missing_account_is_nobody() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let tx = Transaction::transfer(ALICE, Sequence::new(1), Address::new([9; 32]), 1);
        let (_, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::Nobody));
    }

    #[test]
    fn call_invokes_a_target_definition() {
        let kp = keypair(1);
        let mut state = test_state(Some(kp.account_key()));

        // Give BOB a fn `double` via a def evaluated under BOB.
        let lambda = form(vec![
            sym("fn"),
            Cell::Vector(crate::collections::vector::Vector::of([sym("n")])),
            form(vec![sym("*"), sym("n"), Cell::Long(2)]),
        ]);
        let mut ctx = Context::query(state.clone(), BOB);
        let def_op = compile(&form(vec![sym("def"), sym("double"), lambda])).unwrap();
        assert!(!ctx.eval(&def_op).is_exceptional());
        state = ctx.into_state();

        let tx = Transaction::call(ALICE, Sequence::new(1), BOB, Symbol::new("double"), [Cell::Long(21)]);
        let (_, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.value(), Some(&Cell::Long(42)));
    }

    #[test]
    fn call_sees_the_origin_as_caller() {
        let kp = keypair(1);
        let mut state = test_state(Some(kp.account_key()));
        // (def who (fn [] *caller*)) under BOB.
        let lambda = form(vec![
            sym("fn"),
            Cell::Vector(crate::collections::vector::Vector::of([])),
            sym("*caller*"),
        ]);
        let mut ctx = Context::query(state.clone(), BOB);
        let def_op = compile(&form(vec![sym("def"), sym("who"), lambda])).unwrap();
        assert!(!ctx.eval(&def_op).is_exceptional());
        state = ctx.into_state();

        let tx = Transaction::call(ALICE, Sequence::new(1), BOB, Symbol::new("who"), []);
        let (_, result) = apply_transaction(&state, &tx, Some(&kp.account_key()), &ConsensusParams::default());
        assert_eq!(result.value(), Some(&Cell::Address(ALICE)));
    }

    #[test]
    fn signed_transaction_application_verifies() {
        let kp = keypair(1);
        let state = test_state(Some(kp.account_key()));
        let op = compile(&form(vec![sym("+"), Cell::Long(20), Cell::Long(22)])).unwrap();
        let tx = Transaction::invoke(ALICE, Sequence::new(1), op);
        let signed = crate::signed::VerifiedSignedData::sign(&kp, tx.cell()).into_signed();
        let (_, result) = apply_signed_transaction(&state, &signed, &ConsensusParams::default());
        assert_eq!(result.value(), Some(&Cell::Long(42)));

        // A flipped signature bit turns the same transaction into a TRUST error.
        let mut bad_sig = signed.signature().bytes();
        bad_sig[3] ^= 0x10;
        let tampered = crate::signed::SignedData {
            key: signed.key(),
            signature: crate::types::basic::SignatureBytes::new(bad_sig),
            payload: signed.payload().clone(),
        };
        let (post, result) = apply_signed_transaction(&state, &tampered, &ConsensusParams::default());
        assert_eq!(result.error_kind(), Some(ErrorKind::Trust));
        assert_eq!(post, state);
    }
}
