//! Shared fixtures for the scenario tests.

use std::io;
use std::sync::Once;

use log::LevelFilter;

use concord::cell::{Cell, List, Symbol};
use concord::genesis::{genesis_state, GenesisConfig, GenesisPeer};
use concord::state::State;
use concord::types::basic::{coin, AccountKey};
use concord::types::crypto_primitives::{Keypair, SigningKey};

static LOGGER_INIT: Once = Once::new();

// Set up a logger that logs all log messages with level Trace and above.
pub fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!("[{}] {}", record.level(), message))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

/// A deterministic keypair for tests.
pub fn keypair(seed: u8) -> Keypair {
    Keypair::new(SigningKey::from_bytes(&[seed; 32]))
}

/// A genesis state registering `keys` as peers with equal stake, each with a funded
/// owner account.
pub fn equal_stake_genesis(keys: &[AccountKey]) -> State {
    let peers = keys
        .iter()
        .map(|key| GenesisPeer::new(*key, 100 * coin::GOLD, 10 * coin::GOLD))
        .collect();
    genesis_state(&GenesisConfig::new(peers))
}

pub fn sym(name: &str) -> Cell {
    Cell::Symbol(Symbol::new(name))
}

pub fn form(items: Vec<Cell>) -> Cell {
    Cell::List(List::of(items))
}
