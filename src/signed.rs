/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed data.
//!
//! A [`SignedData`] cell is the triple (signer public key, signature, payload ref), where
//! the signature covers the payload cell's *hash*. Verification status is encoded in the
//! type system: decoded signed data is unverified, and [`SignedData::verify`] is the only
//! way to obtain a [`VerifiedSignedData`]. Consensus code that incorporates remote orders
//! accepts only the verified type.

use crate::cell::{Cell, Ref};
use crate::types::basic::{AccountKey, SignatureBytes};
use crate::types::crypto_primitives::{verify_bytes, Keypair};

/// Signed data as constructed or decoded: the signature has not necessarily been checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedData {
    pub(crate) key: AccountKey,
    pub(crate) signature: SignatureBytes,
    pub(crate) payload: Ref,
}

impl SignedData {
    /// Assemble signed data from its parts, as a transport would after framing. No
    /// verification happens here; call [`verify`](Self::verify) before trusting it.
    pub fn new(key: AccountKey, signature: SignatureBytes, payload: Ref) -> SignedData {
        SignedData {
            key,
            signature,
            payload,
        }
    }

    pub fn key(&self) -> AccountKey {
        self.key
    }

    pub fn signature(&self) -> SignatureBytes {
        self.signature
    }

    pub fn payload(&self) -> &Ref {
        &self.payload
    }

    /// The payload cell, which must be resolved.
    pub fn payload_cell(&self) -> &Cell {
        self.payload.resolved()
    }

    /// Check that the signature was created by `key` over the payload's hash.
    pub fn is_correct(&self) -> bool {
        verify_bytes(&self.key, &self.payload.hash().bytes(), &self.signature)
    }

    /// Verify the signature, promoting this value to [`VerifiedSignedData`].
    pub fn verify(self) -> Option<VerifiedSignedData> {
        if self.is_correct() {
            Some(VerifiedSignedData(self))
        } else {
            None
        }
    }

    pub fn cell(self) -> Cell {
        Cell::Signed(Box::new(self))
    }
}

/// Signed data whose signature is known to be valid. The only ways to obtain one are
/// [`VerifiedSignedData::sign`] and [`SignedData::verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedSignedData(SignedData);

impl VerifiedSignedData {
    /// Sign `payload` with `keypair`. The signature covers the payload cell's hash.
    pub fn sign(keypair: &Keypair, payload: Cell) -> VerifiedSignedData {
        let payload = Ref::direct(payload);
        let signature = keypair.sign(&payload.hash().bytes());
        VerifiedSignedData(SignedData {
            key: keypair.account_key(),
            signature,
            payload,
        })
    }

    pub fn signed(&self) -> &SignedData {
        &self.0
    }

    pub fn into_signed(self) -> SignedData {
        self.0
    }

    pub fn key(&self) -> AccountKey {
        self.0.key
    }

    pub fn payload_cell(&self) -> &Cell {
        self.0.payload_cell()
    }

    pub fn cell(&self) -> Cell {
        Cell::Signed(Box::new(self.0.clone()))
    }
}
