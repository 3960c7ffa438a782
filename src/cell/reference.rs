/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Handles to cells.
//!
//! A [`Ref`] is a shared handle to a cell that is either *direct* (the value is in memory)
//! or *hashed* (only the 32-byte hash is known; resolving requires a store lookup). Refs
//! memoize the cell's canonical encoding and hash, and carry a status that moves
//! monotonically along `Direct → Persisted → Announced`.
//!
//! A ref is **embedded** if its cell's encoding fits within
//! [`EMBED_LIMIT`](crate::cell::encoding::EMBED_LIMIT) bytes and all of the cell's own
//! child refs are embedded. Embedded refs are serialized inline within their parent's
//! encoding rather than as a separate hash, and are never written to a store as separate
//! entries.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::cell::encoding::{self, EMBED_LIMIT};
use crate::cell::Cell;
use crate::store::{Store, StoreError};
use crate::types::basic::CellHash;
use crate::types::crypto_primitives::hash_bytes;

/// How much of a cell's lifecycle a [`Ref`] has witnessed. Transitions are monotone.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RefStatus {
    /// The cell value is in memory and nothing is known about its durability.
    Direct = 0,
    /// The cell is known to exist durably in a store.
    Persisted = 1,
    /// The cell was marked novel and dispatched to a novelty handler.
    Announced = 2,
}

impl RefStatus {
    fn from_u8(value: u8) -> RefStatus {
        match value {
            0 => RefStatus::Direct,
            1 => RefStatus::Persisted,
            _ => RefStatus::Announced,
        }
    }
}

struct RefInner {
    cell: OnceLock<Cell>,
    hash: OnceLock<CellHash>,
    encoding: OnceLock<Arc<[u8]>>,
    status: AtomicU8,
}

/// A shared handle to a cell. Cloning is cheap and shares the memoized encoding and hash.
#[derive(Clone)]
pub struct Ref(Arc<RefInner>);

impl Ref {
    /// Create a direct ref holding `cell` in memory.
    pub fn direct(cell: Cell) -> Ref {
        let inner = RefInner {
            cell: OnceLock::new(),
            hash: OnceLock::new(),
            encoding: OnceLock::new(),
            status: AtomicU8::new(RefStatus::Direct as u8),
        };
        let _ = inner.cell.set(cell);
        Ref(Arc::new(inner))
    }

    /// Create a hashed ref: only the hash is known, and the value must be loaded from a
    /// store before use. Hashed refs originate from decoding, so they start `Persisted`.
    pub fn hashed(hash: CellHash) -> Ref {
        let inner = RefInner {
            cell: OnceLock::new(),
            hash: OnceLock::new(),
            encoding: OnceLock::new(),
            status: AtomicU8::new(RefStatus::Persisted as u8),
        };
        let _ = inner.hash.set(hash);
        Ref(Arc::new(inner))
    }

    /// Create a direct ref whose hash is already known (used when decoding a cell that was
    /// fetched from a store by hash).
    pub(crate) fn direct_with_hash(cell: Cell, hash: CellHash) -> Ref {
        let inner = RefInner {
            cell: OnceLock::new(),
            hash: OnceLock::new(),
            encoding: OnceLock::new(),
            status: AtomicU8::new(RefStatus::Persisted as u8),
        };
        let _ = inner.cell.set(cell);
        let _ = inner.hash.set(hash);
        Ref(Arc::new(inner))
    }

    /// Get the cell value, if it is in memory.
    pub fn value(&self) -> Option<&Cell> {
        self.0.cell.get()
    }

    /// Get the cell value, which must be in memory.
    ///
    /// All cells reachable from a value decoded with a store are resolved, as are all
    /// cells constructed in memory; an unresolved ref here is a programming error.
    pub fn resolved(&self) -> &Cell {
        self.0
            .cell
            .get()
            .expect("hashed ref accessed without resolution. Decode with a store, or call resolve().")
    }

    /// Get the cell value, loading and caching it from `store` if necessary.
    ///
    /// Loading resolves the whole subtree reachable from this ref, so the returned cell
    /// and everything below it can be accessed without further store lookups.
    pub fn resolve(&self, store: &dyn Store) -> Result<&Cell, StoreError> {
        if let Some(cell) = self.0.cell.get() {
            return Ok(cell);
        }
        let hash = *self.0.hash.get().expect("a ref without a value always has a hash");
        let bytes = store.get(&hash).ok_or(StoreError::MissingCell(hash))?;
        if hash_bytes(&bytes) != hash {
            return Err(StoreError::HashMismatch(hash));
        }
        let cell = encoding::decode_with_store(&bytes, store)
            .map_err(|source| StoreError::BadEncoding { hash, source })?;
        let _ = self.0.cell.set(cell);
        Ok(self.0.cell.get().expect("value was just set"))
    }

    /// Get the cell's hash, computing and memoizing it if necessary.
    pub fn hash(&self) -> CellHash {
        *self.0.hash.get_or_init(|| hash_bytes(self.encoding()))
    }

    /// Get the cell's canonical encoding, computing and memoizing it if necessary.
    /// The value must be in memory.
    pub fn encoding(&self) -> &[u8] {
        self.0
            .encoding
            .get_or_init(|| encoding::encode_cell(self.resolved()).into())
    }

    /// Whether this ref serializes inline within its parent.
    ///
    /// A ref with no in-memory value is never embedded: it was transmitted by hash, which
    /// means its writer judged it non-embedded, and the embedding rule is deterministic.
    pub fn is_embedded(&self) -> bool {
        let Some(cell) = self.value() else {
            return false;
        };
        self.encoding().len() <= EMBED_LIMIT && cell.children().iter().all(|child| child.is_embedded())
    }

    pub fn status(&self) -> RefStatus {
        RefStatus::from_u8(self.0.status.load(Ordering::Acquire))
    }

    /// Raise the status to `status`. Statuses only move forward; an attempt to lower one
    /// is a no-op.
    pub(crate) fn mark(&self, status: RefStatus) {
        self.0.status.fetch_max(status as u8, Ordering::AcqRel);
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

impl Eq for Ref {}

impl Debug for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.value() {
            Some(cell) => write!(f, "Ref({})", cell.type_name()),
            None => write!(f, "Ref(#{})", self.hash()),
        }
    }
}
