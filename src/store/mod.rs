/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The hash→bytes persistence seam and the cell persistence walk.
//!
//! The consensus core does not own durable storage; the library user provides anything
//! satisfying the [`Store`] trait (keys are cell hashes, values are canonical cell
//! encodings). There is no process-wide "current store": every operation that resolves or
//! persists hashed refs takes the store as an explicit argument.
//!
//! [`persist_announced`] walks a cell's child refs post-order and reports each *novel*
//! cell (one not previously present in the store) to a sink exactly once, so that a
//! transport can broadcast exactly the cells remote peers are missing.

pub mod memory;

use thiserror::Error;

use crate::cell::encoding::DecodeError;
use crate::cell::{encoding, Cell, Ref, RefStatus};
use crate::logging;
use crate::types::basic::CellHash;
use crate::types::crypto_primitives::hash_bytes;

/// A key-value blob store addressed by cell hash.
///
/// Reads must be safe to issue concurrently; writes are serialized by the caller (a
/// single-writer discipline or a per-store lock).
pub trait Store: Send + Sync {
    /// Get the canonical encoding stored for `hash`, if present.
    fn get(&self, hash: &CellHash) -> Option<Vec<u8>>;

    /// Store `bytes` as the canonical encoding of `hash`.
    fn put(&self, hash: &CellHash, bytes: &[u8]);

    /// Whether an encoding is stored for `hash`.
    fn contains(&self, hash: &CellHash) -> bool;

    /// A lazy ref to the cell stored under `hash`, or `None` if the store does not have
    /// it. The value loads on first [`resolve`](crate::cell::Ref::resolve).
    fn ref_for_hash(&self, hash: &CellHash) -> Option<Ref> {
        if self.contains(hash) {
            Some(Ref::hashed(*hash))
        } else {
            None
        }
    }
}

/// Error reading a cell from a store. These are fatal for the operation that needed the
/// cell; the caller's state is unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cell {0} is not in the store")]
    MissingCell(CellHash),
    #[error("stored bytes for {0} do not hash back to it")]
    HashMismatch(CellHash),
    #[error("stored bytes for {hash} do not decode: {source}")]
    BadEncoding {
        hash: CellHash,
        source: DecodeError,
    },
}

/// Fetch and decode the cell stored under `hash`, resolving all of its children.
pub fn fetch(store: &dyn Store, hash: &CellHash) -> Result<Cell, StoreError> {
    let bytes = store.get(hash).ok_or(StoreError::MissingCell(*hash))?;
    if hash_bytes(&bytes) != *hash {
        return Err(StoreError::HashMismatch(*hash));
    }
    encoding::decode_with_store(&bytes, store).map_err(|source| StoreError::BadEncoding {
        hash: *hash,
        source,
    })
}

/// Persist `cell` and everything reachable from it, returning the root hash.
pub fn persist(cell: &Cell, store: &dyn Store) -> CellHash {
    persist_announced(cell, store, &mut |_| {})
}

/// Persist `cell` and everything reachable from it, invoking `sink` exactly once per cell
/// that was newly stored during this call (post-order across child refs). Returns the
/// root hash.
pub fn persist_announced(
    cell: &Cell,
    store: &dyn Store,
    sink: &mut dyn FnMut(&Ref),
) -> CellHash {
    let root = Ref::direct(cell.clone());
    store_subtree(&root, store, sink, true);
    root.hash()
}

fn store_subtree(r: &Ref, store: &dyn Store, sink: &mut dyn FnMut(&Ref), is_root: bool) {
    // Embedded cells ride inline within their parents and are never stored separately.
    // The root is stored unconditionally so it can be fetched by hash.
    if !is_root && r.is_embedded() {
        return;
    }
    let Some(cell) = r.value() else {
        // Hashed and unresolved: the cell already lives in a store.
        r.mark(RefStatus::Persisted);
        return;
    };
    for child in cell.children() {
        store_subtree(&child, store, sink, false);
    }
    let hash = r.hash();
    if store.contains(&hash) {
        r.mark(RefStatus::Persisted);
        return;
    }
    store.put(&hash, r.encoding());
    r.mark(RefStatus::Persisted);
    logging::persist_cell(&hash);
    sink(r);
    r.mark(RefStatus::Announced);
}
