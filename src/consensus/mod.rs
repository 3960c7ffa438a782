/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus data types and the belief-merge algorithm.

pub mod belief;

pub mod block;

pub mod order;

pub mod transaction;
