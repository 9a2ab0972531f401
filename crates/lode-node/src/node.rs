//! Full node composition and work loop.
//!
//! The [`Node`] wires a [`NodeProcessor`] over [`RocksStore`] together with
//! the transaction pool. Inbound headers, bodies and transactions are
//! serialized through a single consumer ([`Node::spawn_worker`]); processor
//! notifications are forwarded as [`NodeEvent`]s on an unbounded channel so
//! hooks never block the processing thread.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use lode_core::crypto::KeyPair;
use lode_core::error::{LodeError, MempoolError};
use lode_core::traits::NodeStore;
use lode_core::txpool::TxPool;
use lode_core::types::{BlockBody, BlockHeader, Hash256, PeerId, StateId, Transaction};
use lode_processor::{
    Cursor, DataRequest, DataStatus, MacroBlock, NewBlock, NodeHooks, NodeProcessor,
};

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// Bound of the inbound work queue.
const WORK_QUEUE_CAPACITY: usize = 1024;

/// Notification from the processor to the network layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    NewState { tip: StateId },
    DataRequested(DataRequest),
    PeerInsane(PeerId),
    Corrupted(String),
}

/// Unit of inbound work.
#[derive(Clone, Debug)]
pub enum Inbound {
    Header {
        header: BlockHeader,
        ignore_pow: bool,
        peer: PeerId,
    },
    Block {
        id: StateId,
        bytes: Vec<u8>,
        peer: PeerId,
    },
    Transaction(Transaction),
}

/// Forwards processor hooks into the event channel.
struct ChannelHooks {
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelHooks {
    fn send(&self, event: NodeEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

impl NodeHooks for ChannelHooks {
    fn request_data(&self, request: &DataRequest) {
        self.send(NodeEvent::DataRequested(request.clone()));
    }

    fn on_peer_insane(&self, peer: &PeerId) {
        self.send(NodeEvent::PeerInsane(*peer));
    }

    fn on_new_state(&self, cursor: &Cursor) {
        self.send(NodeEvent::NewState { tip: cursor.id });
    }

    fn on_corrupted(&self, reason: &str) {
        self.send(NodeEvent::Corrupted(reason.to_string()));
    }
}

/// Snapshot of node state for status reporting.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeStatus {
    pub tip: String,
    pub height: u64,
    pub chain_work: u128,
    pub utxos: usize,
    pub kernels: usize,
    pub pool: usize,
    pub states: usize,
    pub floor: u64,
    pub fossil_height: u64,
}

/// Headers of the active chain plus a snapshot at its tip.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BootstrapBundle {
    /// Ascending from height 1 to the snapshot tip.
    pub headers: Vec<BlockHeader>,
    pub macroblock: MacroBlock,
}

impl BootstrapBundle {
    pub fn write_to(&self, path: &Path) -> Result<(), LodeError> {
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| LodeError::Storage(format!("bundle encode: {e}")))?;
        std::fs::write(path, bytes).map_err(|e| LodeError::Storage(e.to_string()))
    }

    pub fn read_from(path: &Path) -> Result<Self, LodeError> {
        let bytes = std::fs::read(path).map_err(|e| LodeError::Storage(e.to_string()))?;
        bincode::decode_from_slice(&bytes, bincode::config::standard())
            .map(|(bundle, _)| bundle)
            .map_err(|e| LodeError::Storage(format!("bundle decode: {e}")))
    }
}

/// The full node: processor, pool and configuration.
pub struct Node {
    processor: Mutex<NodeProcessor<RocksStore>>,
    pool: Mutex<TxPool>,
    config: NodeConfig,
}

impl Node {
    /// Open storage under `config.db_path()` and initialize the processor.
    ///
    /// Returns the node and the receiving end of its event channel.
    pub fn open(
        config: NodeConfig,
        coinbase_key: Option<KeyPair>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>), LodeError> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| LodeError::Storage(format!("create data_dir: {e}")))?;
        let store = RocksStore::open(config.db_path())?;

        let (events, event_rx) = mpsc::unbounded_channel();
        let hooks: Arc<dyn NodeHooks> = Arc::new(ChannelHooks { events });
        let mut processor = NodeProcessor::initialize(store, hooks, config.processor.clone())?;
        if let Some(key) = coinbase_key {
            processor = processor.with_coinbase_key(key);
        }

        let node = Arc::new(Self {
            processor: Mutex::new(processor),
            pool: Mutex::new(TxPool::new(config.pool_max_count)),
            config,
        });
        Ok((node, event_rx))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Submit a header.
    pub fn process_header(
        &self,
        header: BlockHeader,
        ignore_pow: bool,
        peer: PeerId,
    ) -> Result<DataStatus, LodeError> {
        self.processor.lock().on_header(header, ignore_pow, peer)
    }

    /// Submit a body and bring the pool in line with any tip change.
    pub fn process_block(
        &self,
        id: &StateId,
        bytes: &[u8],
        peer: PeerId,
    ) -> Result<DataStatus, LodeError> {
        let mut processor = self.processor.lock();
        let before = processor.cursor().id;
        let status = processor.on_block(id, bytes, peer)?;
        if processor.cursor().id != before {
            self.refresh_pool(&processor, &before)?;
        }
        Ok(status)
    }

    /// Add a transaction to the pool, evicting the least profitable entries
    /// beyond capacity. Returns its id, or [`MempoolError::Full`] when the
    /// transaction itself is the one evicted.
    pub fn process_transaction(&self, tx: Transaction) -> Result<Hash256, LodeError> {
        let height = self.processor.lock().cursor().height();
        let mut pool = self.pool.lock();
        let txid = pool.add_tx(tx, height)?;
        let capacity = pool.capacity();
        let evicted = pool.shrink_up_to(capacity);
        if !pool.contains(&txid) {
            debug!(%txid, capacity, "transaction priced out of full pool");
            return Err(MempoolError::Full { capacity }.into());
        }
        debug!(%txid, evicted, "added transaction to pool");
        Ok(txid)
    }

    /// Assemble a block template from the pool.
    pub fn generate_block(&self, timestamp: u64) -> Result<NewBlock, LodeError> {
        let mut processor = self.processor.lock();
        let pool = self.pool.lock();
        processor.generate_new_block(&pool, timestamp)
    }

    /// Re-evaluate missing data. Requests are also emitted as events.
    pub fn enum_congestions(&self) -> Result<Vec<DataRequest>, LodeError> {
        self.processor.lock().enum_congestions()
    }

    pub fn export_bundle(&self) -> Result<BootstrapBundle, LodeError> {
        let processor = self.processor.lock();
        let macroblock = processor.export_macroblock()?;

        let mut headers = Vec::new();
        let mut id = macroblock.tip;
        while !id.is_origin() {
            let record = processor
                .store()
                .get_state(&id)?
                .ok_or_else(|| LodeError::Corrupted(format!("active state {id} missing")))?;
            id = record.parent();
            headers.push(record.header);
        }
        headers.reverse();
        Ok(BootstrapBundle { headers, macroblock })
    }

    /// Feed the bundle's headers, then adopt its snapshot.
    pub fn import_bundle(&self, bundle: &BootstrapBundle) -> Result<DataStatus, LodeError> {
        let mut processor = self.processor.lock();
        for header in &bundle.headers {
            if processor.on_header(header.clone(), false, PeerId::default())? == DataStatus::Invalid {
                warn!(id = %header.id(), "bundle header invalid");
                return Ok(DataStatus::Invalid);
            }
        }
        let status = processor.import_macroblock(&bundle.macroblock.tip, &bundle.macroblock)?;
        if status == DataStatus::Accepted {
            self.pool.lock().delete_out_of_bound(processor.cursor().height());
        }
        Ok(status)
    }

    pub fn status(&self) -> Result<NodeStatus, LodeError> {
        let processor = self.processor.lock();
        let cursor = processor.cursor();
        Ok(NodeStatus {
            tip: cursor.id.to_string(),
            height: cursor.height(),
            chain_work: cursor.chain_work(),
            utxos: processor.utxos().len(),
            kernels: processor.kernels().len(),
            pool: self.pool.lock().len(),
            states: processor.store().state_count()?,
            floor: processor.store().floor()?,
            fossil_height: processor.store().fossil_height()?,
        })
    }

    /// Start the single consumer of inbound work on a blocking thread.
    ///
    /// The consumer exits when every sender is dropped or the store reports
    /// corruption.
    pub fn spawn_worker(
        self: &Arc<Self>,
    ) -> (mpsc::Sender<Inbound>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(WORK_QUEUE_CAPACITY);
        let node = Arc::clone(self);
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(work) = rx.blocking_recv() {
                match node.handle(work) {
                    Ok(()) => {}
                    Err(LodeError::Corrupted(reason)) => {
                        error!(%reason, "stopping work loop");
                        break;
                    }
                    Err(e) => warn!("work item failed: {e}"),
                }
            }
            info!("work loop exited");
        });
        (tx, handle)
    }

    fn handle(&self, work: Inbound) -> Result<(), LodeError> {
        match work {
            Inbound::Header {
                header,
                ignore_pow,
                peer,
            } => {
                let id = header.id();
                let status = self.process_header(header, ignore_pow, peer)?;
                debug!(%id, ?status, "header processed");
            }
            Inbound::Block { id, bytes, peer } => {
                let status = self.process_block(&id, &bytes, peer)?;
                debug!(%id, ?status, "body processed");
            }
            Inbound::Transaction(tx) => {
                if let Err(e) = self.process_transaction(tx) {
                    debug!("rejected transaction: {e}");
                }
            }
        }
        Ok(())
    }

    /// Drop pool transactions confirmed by the blocks applied since `before`
    /// and those that can no longer be included.
    fn refresh_pool(
        &self,
        processor: &NodeProcessor<RocksStore>,
        before: &StateId,
    ) -> Result<(), LodeError> {
        let store = processor.store();

        // Fork point between the previous tip and the active chain.
        let mut id = *before;
        while !id.is_origin() {
            match store.get_state(&id)? {
                Some(record) if !record.active => id = record.parent(),
                _ => break,
            }
        }
        let fork_height = id.height;

        let mut pool = self.pool.lock();
        let mut confirmed = 0;
        let mut id = processor.cursor().id;
        while id.height > fork_height {
            let Some(record) = store.get_state(&id)? else {
                break;
            };
            if let Some(bytes) = store.get_body(&id)? {
                let body = BlockBody::decode(&bytes)?;
                confirmed += pool.remove_confirmed(&body);
            }
            id = record.parent();
        }
        let expired = pool.delete_out_of_bound(processor.cursor().height());
        let capacity = pool.capacity();
        let evicted = pool.shrink_up_to(capacity);
        if confirmed > 0 || expired > 0 || evicted > 0 {
            debug!(confirmed, expired, evicted, remaining = pool.len(), "pool refreshed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::constants::BLOCK_TIME_SECS;
    use lode_core::crypto::sign_kernel;
    use lode_core::types::{Commitment, Input, Output};

    const T0: u64 = 1_700_000_000;

    fn test_config(dir: &tempfile::TempDir) -> NodeConfig {
        NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..NodeConfig::default()
        }
    }

    fn test_node() -> (Arc<Node>, mpsc::UnboundedReceiver<NodeEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let key = KeyPair::from_secret_bytes([7; 32]);
        let (node, events) = Node::open(test_config(&dir), Some(key)).unwrap();
        (node, events, dir)
    }

    fn mine_next_block(node: &Node) -> (BlockHeader, Vec<u8>) {
        let height = node.status().unwrap().height + 1;
        let block = node.generate_block(T0 + height * BLOCK_TIME_SECS).unwrap();
        let bytes = block.body.encode().unwrap();
        (block.header, bytes)
    }

    fn apply(node: &Node, block: &(BlockHeader, Vec<u8>)) -> DataStatus {
        node.process_header(block.0.clone(), false, PeerId::default()).unwrap();
        node.process_block(&block.0.id(), &block.1, PeerId::default()).unwrap()
    }

    fn output_tx(seed: u8, fee: u64, max_height: u64) -> Transaction {
        Transaction {
            inputs: vec![],
            outputs: vec![Output { commitment: Commitment([seed; 32]), coinbase: false, incubation: 0 }],
            kernels: vec![sign_kernel(&KeyPair::from_secret_bytes([seed; 32]), fee, 0, max_height)],
        }
    }

    #[test]
    fn node_starts_at_origin() {
        let (node, _events, _dir) = test_node();
        let status = node.status().unwrap();
        assert_eq!(status.height, 0);
        assert_eq!(status.utxos, 0);
        assert_eq!(status.pool, 0);
    }

    #[test]
    fn process_valid_block() {
        let (node, mut events, _dir) = test_node();
        let block = mine_next_block(&node);
        assert_eq!(apply(&node, &block), DataStatus::Accepted);

        let status = node.status().unwrap();
        assert_eq!(status.height, 1);
        assert_eq!(status.utxos, 1);
        assert_eq!(events.try_recv().unwrap(), NodeEvent::NewState { tip: block.0.id() });
    }

    #[test]
    fn confirmed_transaction_leaves_pool() {
        let (node, _events, _dir) = test_node();
        node.process_transaction(output_tx(1, 50, 1_000)).unwrap();
        assert_eq!(node.status().unwrap().pool, 1);

        let block = mine_next_block(&node);
        apply(&node, &block);
        let status = node.status().unwrap();
        assert_eq!(status.pool, 0);
        assert_eq!(status.utxos, 2);
    }

    #[test]
    fn full_pool_evicts_lowest_fee_density() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig { pool_max_count: 2, ..test_config(&dir) };
        let (node, _events) = Node::open(config, None).unwrap();

        for (seed, fee) in [(1, 10), (2, 50), (3, 20), (4, 40)] {
            node.process_transaction(output_tx(seed, fee, 1_000)).unwrap();
            assert!(node.status().unwrap().pool <= 2);
        }
        assert!(matches!(
            node.process_transaction(output_tx(5, 30, 1_000)),
            Err(LodeError::Mempool(MempoolError::Full { capacity: 2 }))
        ));
        assert_eq!(node.status().unwrap().pool, 2);

        // Only the two richest survived.
        let block = node.generate_block(T0).unwrap();
        assert_eq!(block.fees, 90);
    }

    #[test]
    fn expired_transaction_purged_on_new_tip() {
        let (node, _events, _dir) = test_node();
        // Spends an unknown output, so the builder skips it.
        let tx = Transaction {
            inputs: vec![Input { commitment: Commitment([9; 32]) }],
            ..output_tx(2, 10, 1)
        };
        node.process_transaction(tx).unwrap();
        let block = mine_next_block(&node);
        apply(&node, &block);
        assert_eq!(node.status().unwrap().pool, 0);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let tip = {
            let (node, _events) = Node::open(test_config(&dir), Some(KeyPair::from_secret_bytes([7; 32]))).unwrap();
            for _ in 0..3 {
                let block = mine_next_block(&node);
                apply(&node, &block);
            }
            node.status().unwrap()
        };
        let (node, _events) = Node::open(test_config(&dir), None).unwrap();
        assert_eq!(node.status().unwrap(), NodeStatus { pool: 0, ..tip });
    }

    #[test]
    fn bundle_bootstraps_fresh_node() {
        let (source, _events, _dir) = test_node();
        for _ in 0..4 {
            let block = mine_next_block(&source);
            apply(&source, &block);
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.bin");
        source.export_bundle().unwrap().write_to(&path).unwrap();

        let (fresh, _events) = Node::open(test_config(&dir), None).unwrap();
        let bundle = BootstrapBundle::read_from(&path).unwrap();
        assert_eq!(bundle.headers.len(), 4);
        assert_eq!(fresh.import_bundle(&bundle).unwrap(), DataStatus::Accepted);

        let (a, b) = (source.status().unwrap(), fresh.status().unwrap());
        assert_eq!(a.tip, b.tip);
        assert_eq!(a.utxos, b.utxos);
        assert_eq!(b.floor, 4);
    }

    #[tokio::test]
    async fn worker_processes_queued_work() {
        let (node, mut events, _dir) = test_node();
        let (header, bytes) = mine_next_block(&node);
        let id = header.id();

        let (tx, handle) = node.spawn_worker();
        tx.send(Inbound::Header { header, ignore_pow: false, peer: PeerId::default() })
            .await
            .unwrap();
        tx.send(Inbound::Block { id, bytes, peer: PeerId::default() }).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(node.status().unwrap().height, 1);
        assert_eq!(events.recv().await, Some(NodeEvent::NewState { tip: id }));
    }
}
