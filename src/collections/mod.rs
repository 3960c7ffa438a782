/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistent, structural-sharing collections over cells.
//!
//! All collections here are immutable values: every "mutating" operation returns a new
//! collection sharing structure with the original. Their shapes are canonical — pure
//! functions of their contents — which is what keeps cell hashes stable however a
//! collection was built.

pub mod blob_map;

pub mod map;

pub mod set;

pub mod vector;
