//! End-to-end flow between full nodes backed by RocksDB: pooled transactions
//! confirmed by a miner and relayed to a peer, reorg-driven pool refresh,
//! and bootstrap of a third node from an exported bundle file.

use std::sync::Arc;

use lode_core::constants::BLOCK_TIME_SECS;
use lode_core::types::PeerId;
use lode_node_lib::{BootstrapBundle, Node, NodeConfig, NodeEvent};
use lode_processor::{mine_header, DataStatus};
use lode_tests::helpers::*;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

struct TestNode {
    node: Arc<Node>,
    events: UnboundedReceiver<NodeEvent>,
    _dir: TempDir,
}

fn test_node(seed: u32) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    };
    let (node, events) = Node::open(config, Some(key(seed))).unwrap();
    TestNode { node, events, _dir: dir }
}

/// Generate and mine a block on `node`, apply it locally and return it.
fn mine(node: &Node) -> Block {
    let height = node.status().unwrap().height + 1;
    let mut block = node.generate_block(T0 + height * BLOCK_TIME_SECS).unwrap();
    assert!(mine_header(&mut block.header, 1_000_000));
    let bytes = block.body.encode().unwrap();
    relay(node, &[(block.header.clone(), bytes.clone())], PeerId::default());
    (block.header, bytes)
}

fn relay(node: &Node, blocks: &[Block], from: PeerId) {
    for (header, bytes) in blocks {
        node.process_header(header.clone(), false, from).unwrap();
        assert_ne!(node.process_block(&header.id(), bytes, from).unwrap(), DataStatus::Invalid);
    }
}

#[test]
fn relayed_block_confirms_pooled_transaction_everywhere() {
    let miner = test_node(1);
    let peer_node = test_node(2);

    let tx = mint_tx(500, 40, u64::MAX);
    let txid = miner.node.process_transaction(tx.clone()).unwrap();
    peer_node.node.process_transaction(tx).unwrap();
    assert_eq!(peer_node.node.status().unwrap().pool, 1);

    let block = mine(&miner.node);
    assert_eq!(block.0.height, 1);
    relay(&peer_node.node, &[block], peer(1));

    let miner_status = miner.node.status().unwrap();
    let peer_status = peer_node.node.status().unwrap();
    assert_eq!(peer_status.tip, miner_status.tip);
    assert_eq!(peer_status.utxos, 2);
    assert_eq!(miner_status.pool, 0);
    assert_eq!(peer_status.pool, 0);
    assert!(!txid.is_zero());
}

#[test]
fn peer_follows_heavier_chain_and_reports_new_tips() {
    let a = test_node(1);
    let b = test_node(2);
    let mut observer = test_node(3);

    let a_blocks: Vec<Block> = (0..2).map(|_| mine(&a.node)).collect();
    let b_blocks: Vec<Block> = (0..3).map(|_| mine(&b.node)).collect();

    relay(&observer.node, &a_blocks, peer(1));
    relay(&observer.node, &b_blocks, peer(2));
    assert_eq!(observer.node.status().unwrap().tip, b.node.status().unwrap().tip);
    assert_eq!(observer.node.status().unwrap().states, 5);

    let mut tips = Vec::new();
    while let Ok(event) = observer.events.try_recv() {
        if let NodeEvent::NewState { tip } = event {
            tips.push(tip);
        }
    }
    assert_eq!(tips.first(), Some(&a_blocks[0].0.id()));
    assert_eq!(tips.last(), Some(&b_blocks[2].0.id()));
}

#[test]
fn bundle_file_bootstraps_third_node() {
    let source = test_node(1);
    for seed in 0..3 {
        source.node.process_transaction(mint_tx(600 + seed, 5, u64::MAX)).unwrap();
    }
    for _ in 0..4 {
        mine(&source.node);
    }

    let files = tempfile::tempdir().unwrap();
    let path = files.path().join("bundle.bin");
    source.node.export_bundle().unwrap().write_to(&path).unwrap();

    let fresh = test_node(2);
    let bundle = BootstrapBundle::read_from(&path).unwrap();
    assert_eq!(bundle.headers.len(), 4);
    assert_eq!(fresh.node.import_bundle(&bundle).unwrap(), DataStatus::Accepted);

    let expected = source.node.status().unwrap();
    let status = fresh.node.status().unwrap();
    assert_eq!(status.tip, expected.tip);
    assert_eq!(status.utxos, expected.utxos);
    assert_eq!(status.kernels, expected.kernels);
    assert_eq!(status.floor, 4);

    // The bootstrapped node keeps following the source.
    let next = mine(&source.node);
    relay(&fresh.node, &[next], peer(1));
    assert_eq!(fresh.node.status().unwrap().tip, source.node.status().unwrap().tip);
}
