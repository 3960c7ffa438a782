/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types: those that are sent around and inspected, but have no active behavior.
//!
//! These types follow the newtype pattern, and the API for using them is defined in this
//! module. Types with active behavior (cells, collections, the VM) live in their own
//! modules and build on the definitions made here.

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{Add, AddAssign, Sub};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

/// The SHA-256 hash of a cell's canonical encoding.
///
/// Two cells have equal hashes if and only if they have equal canonical encodings, which
/// in turn happens if and only if they are structurally equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellHash([u8; 32]);

impl CellHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Display for CellHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

impl Debug for CellHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CellHash({})", self)
    }
}

/// The 32-byte identifier of an account in the world state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// A 32-byte Ed25519 public key. Identifies peers, and may own accounts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountKey([u8; 32]);

impl AccountKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Display for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        f.write_str(&encoded[0..7])
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey({})", self)
    }
}

/// An Ed25519 signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = STANDARD_NO_PAD.encode(self.0);
        write!(f, "SignatureBytes({})", &encoded[0..7])
    }
}

/// A point in time, in milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn millis(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: u64) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl Sub<u64> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: u64) -> Timestamp {
        Timestamp(self.0 - rhs)
    }
}

/// The per-origin transaction sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sequence(u64);

impl Sequence {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> Sequence {
        Sequence(self.0 + 1)
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A quantity of the metered execution resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Juice(u64);

impl Juice {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl AddAssign<u64> for Juice {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Display for Juice {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The coin price of one unit of juice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JuicePrice(u64);

impl JuicePrice {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Stake held by (or delegated to) a single peer, in coins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stake(u64);

impl Stake {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Add<Stake> for Stake {
    type Output = Stake;
    fn add(self, rhs: Stake) -> Stake {
        Stake(self.0 + rhs.0)
    }
}

/// Total stake obtained by summing up the [`Stake`]s of a set of peers.
///
/// Users must make sure that the total stake of the peer set does not exceed `u128::MAX/2`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TotalStake(u128);

impl TotalStake {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Stake> for TotalStake {
    fn add_assign(&mut self, rhs: Stake) {
        self.0 += rhs.0 as u128;
    }
}

/// Coin denominations for the unit of account.
pub mod coin {
    /// The lowest (indivisible) denomination.
    pub const COPPER: u64 = 1;

    /// A denomination for small change. Equal to 1000 Copper.
    pub const BRONZE: u64 = 1000 * COPPER;

    /// A denomination for small payments. Equal to 1000 Bronze.
    pub const SILVER: u64 = 1000 * BRONZE;

    /// The primary "human scale" denomination, divisible into one billion copper coins.
    pub const GOLD: u64 = 1000 * SILVER;

    /// A large denomination. 1000 Gold.
    pub const DIAMOND: u64 = 1000 * GOLD;

    /// A massively valuable amount. One million Gold.
    pub const EMERALD: u64 = 1000 * DIAMOND;

    /// The maximum supply limit. One billion Gold.
    pub const SUPPLY: u64 = 1000 * EMERALD;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_denominations_are_powers_of_one_thousand() {
        assert_eq!(coin::BRONZE, 1_000);
        assert_eq!(coin::SILVER, 1_000_000);
        assert_eq!(coin::GOLD, 1_000_000_000);
        assert_eq!(coin::SUPPLY, 1_000_000_000_000_000_000);
    }

    #[test]
    fn hash_display_is_seven_base64_chars() {
        let hash = CellHash::new([0xAB; 32]);
        assert_eq!(format!("{}", hash).len(), 7);
    }

    #[test]
    fn total_stake_accumulates() {
        let mut total = TotalStake::new(0);
        total += Stake::new(40);
        total += Stake::new(2);
        assert_eq!(total.int(), 42);
    }
}
