//! Sync state machine scenarios across the peer pool.

use crate::generators::{test_block, test_node_handler, test_wrapper, TestPeer};
use crate::harness::SyncHarness;
use ember_core::SyncState;
use ember_network::{NodeId, PeerHandle};
use ember_sync::{LARGE_GAP_THRESHOLD, PEERS_COUNT};
use num_bigint::BigUint;
use std::sync::Arc;

#[test]
fn test_admit_better_peer_from_empty_state() {
    let harness = SyncHarness::with_local_difficulty(100);
    let peer = harness.peer(1, 500);

    harness.sync.add_peer(peer.clone());

    assert_eq!(harness.sync.peer_count(), 1);
    assert_eq!(harness.sync.state(), SyncState::HashRetrieving);
    assert_eq!(
        harness.sync.master_peer().unwrap().peer_id(),
        peer.peer_id()
    );
    assert_eq!(peer.sync_state(), SyncState::HashRetrieving);
    assert_eq!(
        harness.hash_store.highest_total_difficulty(),
        Some(BigUint::from(500u32))
    );
}

#[test]
fn test_peer_within_range_joins_ongoing_block_retrieval() {
    let harness = SyncHarness::with_local_difficulty(100);
    let master = harness.peer(1, 1000);
    harness.sync.add_peer(master.clone());
    master.finish_hash_retrieval();
    harness.sync.tick();
    assert_eq!(harness.sync.state(), SyncState::BlockRetrieving);

    let helper = harness.peer(2, 1050);
    harness.sync.add_peer(helper.clone());

    assert_eq!(harness.sync.state(), SyncState::BlockRetrieving);
    assert_eq!(helper.sync_state(), SyncState::BlockRetrieving);
}

#[test]
fn test_small_gap_forces_parent_download() {
    let harness = SyncHarness::with_local_difficulty(100);
    harness.chain.set_best_block(test_block(10));

    let wrapper = test_wrapper(10 + LARGE_GAP_THRESHOLD, false);
    harness.sync.recover_gap(&wrapper);

    assert_eq!(harness.sync.state(), SyncState::Init);
    assert_eq!(
        harness.hash_store.poll_batch(10).unwrap(),
        vec![wrapper.parent_hash()]
    );
}

#[test]
fn test_large_gap_elects_master_and_caps_ask() {
    let harness = SyncHarness::with_local_difficulty(100);
    harness.chain.set_best_block(test_block(10));
    let master = harness.peer(1, 500);
    harness.sync.add_peer(master.clone());

    let wrapper = test_wrapper(20, false);
    harness.sync.recover_gap(&wrapper);

    assert_eq!(harness.sync.state(), SyncState::GapRecovery);
    assert_eq!(harness.sync.max_hashes_ask(), 10);
    assert_eq!(harness.sync.best_hash(), Some(wrapper.hash()));
    assert_eq!(master.max_hashes_ask(), 10);
    assert_eq!(harness.hash_store.best_hash(), Some(wrapper.hash()));
}

#[test]
fn test_gap_recovery_waits_for_master() {
    let harness = SyncHarness::with_local_difficulty(100);
    harness.chain.set_best_block(test_block(10));
    let master = harness.peer(1, 500);
    harness.sync.add_peer(master.clone());
    harness.sync.recover_gap(&test_wrapper(20, false));
    assert_eq!(harness.sync.state(), SyncState::GapRecovery);

    // The master has not finished: ticks change nothing.
    harness.sync.tick();
    harness.sync.tick();
    assert_eq!(harness.sync.state(), SyncState::GapRecovery);

    master.finish_hash_retrieval();
    harness.sync.tick();
    assert_ne!(harness.sync.state(), SyncState::GapRecovery);
}

#[test]
fn test_master_election_prefers_highest_difficulty_first_on_ties() {
    let harness = SyncHarness::with_local_difficulty(100);
    let first = harness.peer(1, 700);
    let tied = harness.peer(2, 700);
    let lower = harness.peer(3, 300);
    harness.sync.add_peer(first.clone());
    harness.sync.add_peer(tied);
    harness.sync.add_peer(lower);

    assert_eq!(
        harness.sync.master_peer().unwrap().peer_id(),
        first.peer_id()
    );
}

#[test]
fn test_pool_is_not_topped_up_beyond_peers_count() {
    let harness = SyncHarness::with_local_difficulty(100);
    for tag in 1..=PEERS_COUNT as u8 {
        harness.sync.add_peer(harness.peer(tag, 400 + tag as u64));
    }
    assert_eq!(harness.sync.peer_count(), PEERS_COUNT);

    for tag in 20..30u8 {
        harness
            .node_manager
            .node_appeared(test_node_handler(tag, Some(900)));
    }
    harness.sync.tick();

    assert!(harness.connector.dialed().is_empty());
    assert_eq!(harness.sync.peer_count(), PEERS_COUNT);
}

#[test]
fn test_admitted_peers_always_beat_local_difficulty() {
    let harness = SyncHarness::with_local_difficulty(1000);

    harness.sync.add_peer(harness.peer(1, 999));
    harness.sync.add_peer(harness.peer(2, 1000));
    harness.sync.add_peer(harness.peer(3, 1001));

    assert_eq!(harness.sync.peer_count(), 1);
    let master = harness.sync.master_peer().unwrap();
    assert_eq!(master.peer_id(), NodeId([3; 64]));
}

#[test]
fn test_importer_flow_drives_gap_recovery() {
    let harness = SyncHarness::with_local_difficulty(100);
    harness.chain.set_best_block(test_block(10));
    harness.sync.add_peer(harness.peer(1, 500));

    // A downloaded block lands in the queue; the importer drains it,
    // discovers the missing parent and reports the gap.
    let wrapper = test_wrapper(13, false);
    harness.queue.add(wrapper.clone()).unwrap();

    let drained = harness.queue.poll().unwrap().unwrap();
    assert_eq!(drained, wrapper);
    harness.sync.recover_gap(&drained);

    // Small gap: the parent hash is scheduled for retrieval.
    assert!(!harness.hash_store.is_empty());
    assert_eq!(
        harness.hash_store.poll_batch(1).unwrap(),
        vec![wrapper.parent_hash()]
    );
}

#[test]
fn test_fresh_announced_import_completes_sync_once() {
    let harness = SyncHarness::with_local_difficulty(100);
    let peer = harness.peer(1, 500);
    harness.sync.add_peer(peer.clone());

    harness
        .sync
        .notify_new_block_imported(&test_wrapper(11, true));

    assert!(harness.sync.is_sync_done());
    assert!(harness.listener.sync_done());
    assert_eq!(peer.sync_state(), SyncState::DoneSync);

    // Terminal: admission and removal are locked out.
    harness.sync.add_peer(harness.peer(2, 900));
    assert_eq!(harness.sync.peer_count(), 1);
}

#[test]
fn test_interrupted_block_retrieval_resumes_on_first_peer() {
    let harness = SyncHarness::with_local_difficulty(100);
    harness
        .hash_store
        .add(&test_wrapper(3, false).hash())
        .unwrap();

    let peer = harness.peer(1, 500);
    harness.sync.add_peer(peer.clone());

    assert_eq!(harness.sync.state(), SyncState::BlockRetrieving);
    assert_eq!(peer.sync_state(), SyncState::BlockRetrieving);
}

#[test]
fn test_drained_peers_leave_the_pool_and_raise_the_floor() {
    let harness = SyncHarness::with_local_difficulty(100);
    let drained: Arc<TestPeer> = harness.peer(1, 800);
    let healthy = harness.peer(2, 600);
    harness.sync.add_peer(drained.clone());
    harness.sync.add_peer(healthy);

    drained.run_out_of_blocks();
    harness.sync.tick();

    assert_eq!(harness.sync.peer_count(), 1);
    assert_eq!(harness.sync.lower_useful_difficulty(), BigUint::from(800u32));
    assert_eq!(drained.sync_state(), SyncState::Idle);

    // Candidates at or below the raised floor are no longer dialed.
    harness
        .node_manager
        .node_appeared(test_node_handler(9, Some(700)));
    harness.sync.tick();
    assert!(harness.connector.dialed().is_empty());
}
