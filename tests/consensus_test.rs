//! Scenario tests for multi-peer convergence.

mod common;

use log::LevelFilter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use concord::cell::{Blob, Cell};
use concord::consensus::belief::Belief;
use concord::consensus::block::Block;
use concord::consensus::transaction::Transaction;
use concord::genesis::peer_owner_address;
use concord::peer::Peer;
use concord::signed::{SignedData, VerifiedSignedData};
use concord::types::basic::{Sequence, SignatureBytes};
use concord::vm::compiler::compile;

use crate::common::{equal_stake_genesis, form, keypair, setup_logger, sym};

#[test]
fn two_peer_convergence_test() {
    setup_logger(LevelFilter::Debug);

    let kp_a = keypair(1);
    let kp_b = keypair(2);
    let genesis = equal_stake_genesis(&[kp_a.account_key(), kp_b.account_key()]);
    let mut a = Peer::create(kp_a.clone(), genesis.clone());
    let mut b = Peer::create(kp_b.clone(), genesis);

    // A proposes block X at position 0.
    let x = Block::of(a.timestamp() + 1, kp_a.account_key(), []);
    a = a.propose_block(x).unwrap();

    // First mutual exchange: B adopts X into its own order (half the stake meets the
    // proposal threshold), but neither peer can count two-thirds agreement yet because
    // each has seen only one signed order containing X.
    let (a_view, b_view) = (a.belief().clone(), b.belief().clone());
    a = a.merge_beliefs(&[&b_view]);
    b = b.merge_beliefs(&[&a_view]);
    assert_eq!(a.consensus_point(), 0);
    assert_eq!(b.consensus_point(), 0);
    assert_eq!(b.peer_order().unwrap().block_count(), 1);

    // Second mutual exchange: both now hold signed agreement from 100% of stake, so
    // block 0 is final on both sides.
    let (a_view, b_view) = (a.belief().clone(), b.belief().clone());
    a = a.merge_beliefs(&[&b_view]);
    b = b.merge_beliefs(&[&a_view]);
    assert_eq!(a.consensus_point(), 1);
    assert_eq!(b.consensus_point(), 1);
    assert_eq!(a.state_count(), 2);
    assert_eq!(b.state_count(), 2);

    // A proposes Y at position 1; B picks it up with proposal point at least 2.
    let y = Block::of(a.timestamp() + 2, kp_a.account_key(), []);
    a = a.propose_block(y).unwrap();
    let a_view = a.belief().clone();
    b = b.merge_beliefs(&[&a_view]);
    let b_order = b.peer_order().unwrap();
    assert_eq!(b_order.block_count(), 2);
    assert!(b_order.proposal_point() >= 2);
    assert_eq!(b.consensus_point(), 1);

    // One more exchange settles Y on both sides.
    let (a_view, b_view) = (a.belief().clone(), b.belief().clone());
    a = a.merge_beliefs(&[&b_view]);
    b = b.merge_beliefs(&[&a_view]);
    assert_eq!(a.consensus_point(), 2);
    assert_eq!(b.consensus_point(), 2);

    // Both peers agree on the ordering, block for block.
    let a_order = a.peer_order().unwrap();
    let b_order = b.peer_order().unwrap();
    assert_eq!(
        a_order.blocks().clone(),
        b_order.blocks().clone()
    );
}

#[test]
fn competing_proposals_converge_on_one_winner() {
    let kp_a = keypair(1);
    let kp_b = keypair(2);
    let genesis = equal_stake_genesis(&[kp_a.account_key(), kp_b.account_key()]);
    let mut a = Peer::create(kp_a.clone(), genesis.clone());
    let mut b = Peer::create(kp_b.clone(), genesis);

    // Both peers propose different blocks for position 0 concurrently.
    a = a
        .propose_block(Block::of(a.timestamp() + 1, kp_a.account_key(), []))
        .unwrap();
    b = b
        .propose_block(Block::of(b.timestamp() + 1, kp_b.account_key(), []))
        .unwrap();

    // A few exchange rounds align the orders and finalize one winner.
    for _ in 0..3 {
        let (a_view, b_view) = (a.belief().clone(), b.belief().clone());
        a = a.merge_beliefs(&[&b_view]);
        b = b.merge_beliefs(&[&a_view]);
    }
    assert!(a.consensus_point() >= 1);
    assert!(b.consensus_point() >= 1);

    let a_first = a.peer_order().unwrap().block(0).unwrap().clone();
    let b_first = b.peer_order().unwrap().block(0).unwrap().clone();
    assert_eq!(a_first, b_first);
}

#[test]
fn bad_signature_rejected_test() {
    let kp_a = keypair(1);
    let kp_b = keypair(2);
    let genesis = equal_stake_genesis(&[kp_a.account_key(), kp_b.account_key()]);
    let a = Peer::create(kp_a.clone(), genesis.clone());
    let b = Peer::create(kp_b.clone(), genesis);

    // A belief carrying A's order with one signature bit flipped.
    let a = a
        .propose_block(Block::of(a.timestamp() + 1, kp_a.account_key(), []))
        .unwrap();
    let good = a.belief().signed_order(&kp_a.account_key()).unwrap().clone();
    let mut bad_sig = good.signature().bytes();
    bad_sig[17] ^= 0x01;
    let tampered = SignedData::new(
        good.key(),
        SignatureBytes::new(bad_sig),
        good.payload().clone(),
    );
    let forged_orders = b
        .belief()
        .orders()
        .assoc(Blob::from_slice(kp_a.account_key().as_slice()), tampered.cell());
    let forged_belief = Belief::new(forged_orders, b.timestamp());

    // The offending entry is silently dropped; B's own order is unchanged.
    let merged = b.merge_beliefs(&[&forged_belief]);
    assert!(merged.order(&kp_a.account_key()).is_none());
    assert_eq!(merged.peer_order().unwrap().block_count(), 0);
    assert_eq!(merged.consensus_point(), 0);
}

#[test]
fn unstaked_peer_is_ignored() {
    let kp_a = keypair(1);
    let stranger = keypair(9);
    let genesis = equal_stake_genesis(&[kp_a.account_key()]);
    let a = Peer::create(kp_a.clone(), genesis.clone());

    // The stranger runs a peer on the same genesis but holds no stake.
    let outsider = Peer::create(stranger.clone(), genesis);
    let outsider = outsider
        .propose_block(Block::of(outsider.timestamp() + 1, stranger.account_key(), []))
        .unwrap();

    let outsider_view = outsider.belief().clone();
    let merged = a.merge_beliefs(&[&outsider_view]);
    assert!(merged.order(&stranger.account_key()).is_none());
    assert_eq!(merged.peer_order().unwrap().block_count(), 0);
}

#[test]
fn listener_replays_to_identical_states() {
    // Deterministic replay: a staked peer builds history from a seeded transaction
    // stream; an unstaked listener merges the signed beliefs and must reproduce
    // byte-identical states at every index.
    let kp_a = keypair(1);
    let kp_listener = keypair(7);
    let genesis = equal_stake_genesis(&[kp_a.account_key()]);
    let mut a = Peer::create(kp_a.clone(), genesis.clone());

    let owner = peer_owner_address(&kp_a.account_key());
    let mut rng = StdRng::seed_from_u64(42);
    let mut sequence = 0u64;

    for block_index in 0..10u64 {
        let mut txs = Vec::new();
        for _ in 0..rng.gen_range(1..=5) {
            sequence += 1;
            let lhs: i64 = rng.gen_range(0..1_000);
            let rhs: i64 = rng.gen_range(0..1_000);
            let op = compile(&form(vec![sym("+"), Cell::Long(lhs), Cell::Long(rhs)])).unwrap();
            let tx = Transaction::invoke(owner, Sequence::new(sequence), op);
            txs.push(VerifiedSignedData::sign(&kp_a, tx.cell()).into_signed());
        }
        let block = Block::of(
            a.timestamp() + 1 + block_index,
            kp_a.account_key(),
            txs,
        );
        a = a.propose_block(block).unwrap().merge_beliefs(&[]);
    }
    assert_eq!(a.consensus_point(), 10);
    assert_eq!(a.state_count(), 11);

    // The listener starts from the same genesis and learns everything from A's belief.
    let a_view = a.belief().clone();
    let listener = Peer::create(kp_listener, genesis).merge_beliefs(&[&a_view]);
    assert_eq!(listener.consensus_point(), 10);
    assert_eq!(listener.state_count(), 11);

    for i in 0..a.state_count() {
        let ours = a.state(i).unwrap().encode();
        let theirs = listener.state(i).unwrap().encode();
        assert_eq!(ours, theirs, "state {} diverged", i);
    }

    // Every recorded transaction result matches as well.
    for block_index in 0..10u64 {
        let a_result = a.block_result(block_index).unwrap();
        let l_result = listener.block_result(block_index).unwrap();
        assert_eq!(a_result, l_result);
    }
}

#[test]
fn belief_round_trips_through_the_store() {
    // A belief persisted by one peer can be decoded by another through the store, as the
    // transport would do, and merging the decoded copy behaves like merging the
    // original.
    use concord::store::{self, memory::MemStore};

    let kp_a = keypair(1);
    let kp_b = keypair(2);
    let genesis = equal_stake_genesis(&[kp_a.account_key(), kp_b.account_key()]);
    let a = Peer::create(kp_a.clone(), genesis.clone());
    let b = Peer::create(kp_b.clone(), genesis);

    let a = a
        .propose_block(Block::of(a.timestamp() + 1, kp_a.account_key(), []))
        .unwrap();

    let store = MemStore::new();
    let belief_cell = a.belief().clone().cell();
    let root = store::persist(&belief_cell, &store);

    let fetched = store::fetch(&store, &root).unwrap();
    let Cell::Belief(decoded) = fetched else {
        panic!("expected a belief cell");
    };

    let merged = b.merge_beliefs(&[&*decoded]);
    assert_eq!(
        merged.order(&kp_a.account_key()).unwrap().block_count(),
        1
    );
    assert_eq!(merged.peer_order().unwrap().block_count(), 1);
}

#[test]
fn bootstrap_from_remote_belief() {
    let kp_a = keypair(1);
    let kp_b = keypair(2);
    let genesis = equal_stake_genesis(&[kp_a.account_key(), kp_b.account_key()]);
    let a = Peer::create(kp_a.clone(), genesis.clone());
    let a = a
        .propose_block(Block::of(a.timestamp() + 1, kp_a.account_key(), []))
        .unwrap();

    let a_view = a.belief().clone();
    let b = Peer::create_from_remote(kp_b, genesis, &a_view);
    // B starts out already tracking A's proposal.
    assert_eq!(b.order(&kp_a.account_key()).unwrap().block_count(), 1);
    assert_eq!(b.peer_order().unwrap().block_count(), 1);
}
