/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A simple, volatile, in-memory implementation of [`Store`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::store::Store;
use crate::types::basic::CellHash;

/// An in-memory store. Cloning yields a handle onto the same storage.
#[derive(Clone, Default)]
pub struct MemStore(Arc<Mutex<HashMap<CellHash, Vec<u8>>>>);

impl MemStore {
    /// Create a new, empty `MemStore`.
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Number of cells stored.
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemStore {
    fn get(&self, hash: &CellHash) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(hash).cloned()
    }

    fn put(&self, hash: &CellHash, bytes: &[u8]) {
        self.0.lock().unwrap().insert(*hash, bytes.to_vec());
    }

    fn contains(&self, hash: &CellHash) -> bool {
        self.0.lock().unwrap().contains_key(hash)
    }
}
