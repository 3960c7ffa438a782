/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Juice accounting constants.
//!
//! Every op has a fixed cost and every core fn has a table cost. A transaction's initial
//! juice budget is `min(balance / juice-price, MAX_JUICE)`; the budget's coin value is
//! deducted up front and the unspent remainder refunded on success.

/// Maximum juice allowance for a single transaction.
pub const MAX_JUICE: u64 = 1_000_000_000;

/// Base cost charged when a transaction begins executing.
pub const TRANSACTION: u64 = 100;

pub const CONSTANT: u64 = 10;
pub const LOOKUP: u64 = 50;
pub const DO: u64 = 10;
pub const COND: u64 = 20;
pub const LET: u64 = 30;
pub const LAMBDA: u64 = 100;
pub const LOCAL: u64 = 10;
pub const SET_LOCAL: u64 = 20;
pub const INVOKE: u64 = 50;
pub const QUERY: u64 = 50;
pub const SPECIAL: u64 = 20;
pub const DEF: u64 = 100;

/// Cost of an atomic balance transfer.
pub const TRANSFER: u64 = 200;

/// Cost of installing a scheduled call.
pub const SCHEDULE: u64 = 500;

/// Core fns that inspect or compare values.
pub const CORE_SIMPLE: u64 = 20;

/// Core fns that build or update data structures.
pub const CORE_BUILD: u64 = 50;
