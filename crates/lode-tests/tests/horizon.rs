//! Retention limits as seen by a syncing node: fossilized history cannot be
//! reorganized away, shallow forks still can, and stale side branches go.

use std::sync::Arc;

use lode_core::traits::NodeStore;
use lode_processor::{DataStatus, Horizon, NoopHooks, ProcessorConfig};
use lode_tests::helpers::*;

fn pruned(seed: u8, branching: u64, fossil: u64) -> lode_processor::NodeProcessor<lode_core::store::MemoryStore> {
    let config = ProcessorConfig {
        horizon: Horizon::new(branching, fossil).unwrap(),
        ..ProcessorConfig::default()
    };
    processor_with(seed, Arc::new(NoopHooks), config)
}

#[test]
fn heavier_fork_below_fossil_height_is_ignored() {
    let mut node = pruned(1, 2, 2);
    let own: Vec<Block> = (0..5).map(|_| extend(&mut node)).collect();
    assert_eq!(node.store().fossil_height().unwrap(), 3);
    let root = node.live_root();

    let mut rival = processor(2);
    let deep: Vec<Block> = (0..8).map(|_| extend(&mut rival)).collect();
    let statuses = feed(&mut node, &deep, peer(2));

    // Heights at or below the retained height are refused outright.
    assert_eq!(&statuses[..3], &[DataStatus::Rejected; 3]);
    assert_eq!(node.cursor().id, own[4].0.id());
    assert_eq!(node.live_root(), root);
    assert!(node.enum_congestions().unwrap().is_empty());
}

#[test]
fn heavier_fork_above_fossil_height_reorgs() {
    let mut node = pruned(1, 2, 2);
    let own: Vec<Block> = (0..5).map(|_| extend(&mut node)).collect();

    let mut rival = processor(2);
    feed(&mut rival, &own[..4], peer(1));
    let fork: Vec<Block> = (0..2).map(|_| extend(&mut rival)).collect();

    assert_eq!(feed(&mut node, &fork, peer(2)), vec![DataStatus::Accepted; 2]);
    assert_eq!(node.cursor(), rival.cursor());
    assert_eq!(node.live_root(), rival.live_root());
    assert_eq!(node.store().fossil_height().unwrap(), 4);
}

#[test]
fn stale_side_branch_is_deleted() {
    let mut rival = processor(2);
    let stale = extend(&mut rival);

    let mut node = pruned(1, 2, 3);
    extend(&mut node);
    feed(&mut node, &[stale.clone()], peer(2));
    assert!(node.store().get_state(&stale.0.id()).unwrap().is_some());

    extend(&mut node);
    assert!(node.store().get_state(&stale.0.id()).unwrap().is_some());
    extend(&mut node);
    // The branch hangs off height 0, now more than two below the tip.
    assert!(node.store().get_state(&stale.0.id()).unwrap().is_none());
    assert!(!node.is_state_needed(&stale.0.id()).unwrap());
}

#[test]
fn fossilized_blocks_keep_headers_only() {
    let mut node = pruned(1, 1, 2);
    let blocks: Vec<Block> = (0..6).map(|_| extend(&mut node)).collect();

    assert_eq!(node.store().fossil_height().unwrap(), 4);
    for (header, _) in &blocks[..4] {
        let record = node.store().get_state(&header.id()).unwrap().unwrap();
        assert!(record.active);
        assert!(!record.has_body());
        assert!(node.store().get_rollback(&header.id()).unwrap().is_none());
    }
    for (header, _) in &blocks[4..] {
        assert!(node.store().get_body(&header.id()).unwrap().is_some());
        assert!(node.store().get_rollback(&header.id()).unwrap().is_some());
    }
}
