/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.

use sha2::Digest;

use super::basic::{AccountKey, CellHash, SignatureBytes};

// re-exports below.
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// A wrapper around [SigningKey](ed25519_dalek::SigningKey) that implements a
/// [convenience method](Self::sign) for creating signatures as well as a [getter](Self::public)
/// for the public key.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Convenience method for creating signatures over values or messages represented as
    /// slices of bytes.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the peer identity corresponding to this keypair's public key.
    pub fn account_key(&self) -> AccountKey {
        AccountKey::new(self.public().to_bytes())
    }
}

/// Compute the SHA-256 hash of an encoded cell.
pub fn hash_bytes(encoding: &[u8]) -> CellHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(encoding);
    CellHash::new(hasher.finalize().into())
}

/// Verify that `signature` was created by `key` over `message`.
///
/// Returns `false` both for invalid signatures and for byte sequences that are not valid
/// Ed25519 public keys.
pub fn verify_bytes(key: &AccountKey, message: &[u8], signature: &SignatureBytes) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key.bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(message, &signature).is_ok()
}
