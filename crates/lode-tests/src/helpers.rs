//! Shared test helpers for scenario and property tests.
//!
//! Every helper panics on node failure: callers are tests.

use std::sync::Arc;

use parking_lot::Mutex;

use lode_core::constants::BLOCK_TIME_SECS;
use lode_core::crypto::{sign_kernel, KeyPair};
use lode_core::difficulty::work_for_target;
use lode_core::store::MemoryStore;
use lode_core::txpool::TxPool;
use lode_core::types::{BlockHeader, Commitment, Input, Output, PeerId, StateId, Transaction};
use lode_processor::{
    mine_header, Cursor, DataRequest, DataStatus, NodeHooks, NodeProcessor, NoopHooks,
    ProcessorConfig,
};

/// Timestamp of height 0. Helpers space blocks `BLOCK_TIME_SECS` apart.
pub const T0: u64 = 1_700_000_000;

/// A header with its encoded body, as it travels between peers.
pub type Block = (BlockHeader, Vec<u8>);

pub fn peer(seed: u8) -> PeerId {
    PeerId([seed; 32])
}

/// Key pair from a 32-bit seed, distinct per seed.
pub fn key(seed: u32) -> KeyPair {
    let mut secret = [1u8; 32];
    secret[..4].copy_from_slice(&seed.to_le_bytes());
    KeyPair::from_secret_bytes(secret)
}

/// Commitment from a 32-bit seed, distinct per seed.
pub fn commitment(seed: u32) -> Commitment {
    let mut c = [0u8; 32];
    c[..4].copy_from_slice(&seed.to_le_bytes());
    c[31] = 0xC0;
    Commitment(c)
}

pub fn output(seed: u32) -> Output {
    Output {
        commitment: commitment(seed),
        coinbase: false,
        incubation: 0,
    }
}

/// A transaction without inputs that creates `commitment(seed)`.
pub fn mint_tx(seed: u32, fee: u64, max_height: u64) -> Transaction {
    let mut tx = Transaction {
        inputs: vec![],
        outputs: vec![output(seed)],
        kernels: vec![sign_kernel(&key(seed), fee, 0, max_height)],
    };
    tx.normalize();
    tx
}

/// A transaction spending `input` into `commitment(out_seed)`.
pub fn spend_tx(input: Commitment, out_seed: u32, fee: u64) -> Transaction {
    let mut tx = Transaction {
        inputs: vec![Input { commitment: input }],
        outputs: vec![output(out_seed)],
        kernels: vec![sign_kernel(&key(out_seed), fee, 0, u64::MAX)],
    };
    tx.normalize();
    tx
}

/// In-memory processor mining to `key(seed)`.
pub fn processor(seed: u8) -> NodeProcessor<MemoryStore> {
    processor_with(seed, Arc::new(NoopHooks), ProcessorConfig::default())
}

pub fn processor_with(
    seed: u8,
    hooks: Arc<dyn NodeHooks>,
    config: ProcessorConfig,
) -> NodeProcessor<MemoryStore> {
    NodeProcessor::initialize(MemoryStore::new(), hooks, config)
        .expect("initialize processor")
        .with_coinbase_key(key(u32::from(seed)))
}

/// Generate an empty block on `p`'s tip and apply it there.
pub fn extend(p: &mut NodeProcessor<MemoryStore>) -> Block {
    extend_with(p, &TxPool::with_defaults())
}

/// Generate a block from `pool` on `p`'s tip and apply it there.
pub fn extend_with(p: &mut NodeProcessor<MemoryStore>, pool: &TxPool) -> Block {
    let ts = T0 + (p.cursor().height() + 1) * BLOCK_TIME_SECS;
    let mut block = p.generate_new_block(pool, ts).expect("generate block");
    assert!(mine_header(&mut block.header, 1_000_000), "no nonce found");
    let bytes = block.body.encode().expect("encode body");
    submit(p, (block.header, bytes))
}

/// Like [`extend`], but with a target `factor` times harder than required,
/// so the block carries `factor` times the work.
pub fn extend_heavy(p: &mut NodeProcessor<MemoryStore>, factor: u64) -> Block {
    let ts = T0 + (p.cursor().height() + 1) * BLOCK_TIME_SECS;
    let block = p
        .generate_new_block(&TxPool::with_defaults(), ts)
        .expect("generate block");
    let mut header = block.header;
    let base_work = header.chain_work - work_for_target(header.difficulty);
    header.difficulty /= factor;
    header.chain_work = base_work + work_for_target(header.difficulty);
    assert!(mine_header(&mut header, 1_000_000), "no nonce found");
    let bytes = block.body.encode().expect("encode body");
    submit(p, (header, bytes))
}

fn submit(p: &mut NodeProcessor<MemoryStore>, block: Block) -> Block {
    let (header, bytes) = &block;
    assert_eq!(p.on_header(header.clone(), false, peer(0)).expect("on_header"), DataStatus::Accepted);
    assert_eq!(p.on_block(&header.id(), bytes, peer(0)).expect("on_block"), DataStatus::Accepted);
    block
}

/// Deliver headers and bodies in order, returning each body's status.
pub fn feed(p: &mut NodeProcessor<MemoryStore>, blocks: &[Block], from: PeerId) -> Vec<DataStatus> {
    blocks
        .iter()
        .map(|(header, bytes)| {
            p.on_header(header.clone(), false, from).expect("on_header");
            p.on_block(&header.id(), bytes, from).expect("on_block")
        })
        .collect()
}

/// Hooks that remember every callback.
#[derive(Default)]
pub struct RecordingHooks {
    pub requests: Mutex<Vec<DataRequest>>,
    pub insane: Mutex<Vec<PeerId>>,
    pub new_states: Mutex<Vec<StateId>>,
    pub corrupted: Mutex<Vec<String>>,
}

impl NodeHooks for RecordingHooks {
    fn request_data(&self, request: &DataRequest) {
        self.requests.lock().push(request.clone());
    }

    fn on_peer_insane(&self, peer: &PeerId) {
        self.insane.lock().push(*peer);
    }

    fn on_new_state(&self, cursor: &Cursor) {
        self.new_states.lock().push(cursor.id);
    }

    fn on_corrupted(&self, reason: &str) {
        self.corrupted.lock().push(reason.to_string());
    }
}
