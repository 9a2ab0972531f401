//! The node processor: header and body intake, chain selection and reorgs.
//!
//! All mutating entry points take `&mut self`; the host serializes calls.
//! Headers are stored as they arrive; bodies trigger [`try_advance`], which
//! moves the cursor to the heaviest branch whose blocks are all available,
//! rolling back and re-applying as needed.
//!
//! [`try_advance`]: NodeProcessor::on_block

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use lode_core::constants::MAX_BLOCK_WEIGHT;
use lode_core::crypto::KeyPair;
use lode_core::difficulty::{
    check_pow, full_window_size, moving_median, next_difficulty, work_for_target, MAX_TARGET,
};
use lode_core::error::{BlockError, ChainStateError, LodeError};
use lode_core::merkle::node_hash;
use lode_core::rollback::RollbackData;
use lode_core::store::StateRecord;
use lode_core::traits::NodeStore;
use lode_core::trees::{KernelTree, LiveTrees, UtxoTree};
use lode_core::types::{BlockBody, BlockHeader, Hash256, PeerId, StateId};

use crate::cursor::Cursor;
use crate::hooks::NodeHooks;
use crate::horizon::Horizon;
use crate::live::{apply_body, Verdict};

/// Result of submitting a header, body or snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataStatus {
    /// Stored (and possibly applied).
    Accepted,
    /// Harmless but useless: duplicate, irrelevant or premature.
    Rejected,
    /// Violates consensus rules. The supplier should be penalized.
    Invalid,
}

/// Processor tuning.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessorConfig {
    pub horizon: Horizon,
    /// Weight budget of a block body.
    pub max_block_weight: u64,
    /// Difficulty target of the first block.
    pub initial_difficulty: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            horizon: Horizon::disabled(),
            max_block_weight: MAX_BLOCK_WEIGHT,
            initial_difficulty: MAX_TARGET,
        }
    }
}

/// A branch that would improve the tip if applied.
struct Candidate {
    fork: StateId,
    /// Ascending, starting just above `fork`.
    path: Vec<StateId>,
    work: u128,
    seq: u64,
}

/// Ledger state machine over a [`NodeStore`].
pub struct NodeProcessor<S: NodeStore> {
    pub(crate) store: S,
    pub(crate) hooks: Arc<dyn NodeHooks>,
    pub(crate) config: ProcessorConfig,
    pub(crate) cursor: Cursor,
    pub(crate) trees: LiveTrees,
    pub(crate) coinbase_key: Option<KeyPair>,
}

impl<S: NodeStore> NodeProcessor<S> {
    /// Load the persisted cursor and live trees and check they agree.
    ///
    /// A fresh store yields a processor at the origin. Fails with
    /// [`LodeError::Corrupted`] (after calling `on_corrupted`) if the live root
    /// does not reproduce the cursor header's definition.
    pub fn initialize(
        store: S,
        hooks: Arc<dyn NodeHooks>,
        config: ProcessorConfig,
    ) -> Result<Self, LodeError> {
        config.horizon.validate()?;
        let trees = store.load_live()?;
        let cursor_id = store.cursor()?;

        let mut processor = Self {
            store,
            hooks,
            config,
            cursor: Cursor::origin(),
            trees,
            coinbase_key: None,
        };
        processor.cursor = processor.load_cursor(&cursor_id)?;

        let consistent = match &processor.cursor.header {
            None => processor.trees.is_empty(),
            Some(header) => {
                node_hash(&processor.cursor.history, &processor.trees.live_root())
                    == header.definition
            }
        };
        if !consistent {
            return Err(processor.corrupted(format!(
                "live trees do not match definition of {}",
                processor.cursor.id
            )));
        }

        info!(
            height = processor.cursor.height(),
            tip = %processor.cursor.id,
            utxos = processor.trees.utxos.len(),
            kernels = processor.trees.kernels.len(),
            "processor initialized"
        );
        Ok(processor)
    }

    /// Key used to sign coinbase outputs in generated blocks.
    pub fn with_coinbase_key(mut self, key: KeyPair) -> Self {
        self.coinbase_key = Some(key);
        self
    }

    // --- Accessors ---

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn utxos(&self) -> &UtxoTree {
        &self.trees.utxos
    }

    pub fn kernels(&self) -> &KernelTree {
        &self.trees.kernels
    }

    pub fn live_root(&self) -> Hash256 {
        self.trees.live_root()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn horizon(&self) -> &Horizon {
        &self.config.horizon
    }

    /// Headers at or below this height are ignored.
    pub fn lowest_retained_height(&self) -> Result<u64, LodeError> {
        let floor = self.store.floor()?;
        let branch_limit = self
            .cursor
            .height()
            .saturating_sub(self.config.horizon.branching_depth);
        Ok(floor.max(branch_limit))
    }

    /// Lowest fork point a reorg may roll back to.
    pub(crate) fn lowest_rollback_height(&self) -> Result<u64, LodeError> {
        Ok(self.store.floor()?.max(self.store.fossil_height()?))
    }

    /// Whether the header (or body, for a known header) of `id` is still wanted.
    pub fn is_state_needed(&self, id: &StateId) -> Result<bool, LodeError> {
        if id.height <= self.lowest_retained_height()? {
            return Ok(false);
        }
        Ok(match self.store.get_state(id)? {
            None => true,
            Some(record) => !record.has_body() && !record.active,
        })
    }

    // --- Intake ---

    /// Validate and store a header.
    pub fn on_header(
        &mut self,
        header: BlockHeader,
        ignore_pow: bool,
        peer: PeerId,
    ) -> Result<DataStatus, LodeError> {
        if header.height == 0 {
            warn!(%peer, "header at height 0");
            return Ok(DataStatus::Invalid);
        }
        let id = header.id();
        if id.height <= self.lowest_retained_height()? {
            debug!(%id, "header below retained height");
            return Ok(DataStatus::Rejected);
        }
        if self.store.contains_state(&id)? {
            debug!(%id, "duplicate header");
            return Ok(DataStatus::Rejected);
        }
        if !ignore_pow && !check_pow(&header) {
            warn!(%id, %peer, "header fails proof of work");
            return Ok(DataStatus::Invalid);
        }

        // Without a parent the context checks wait; see `verify_waiting`.
        let parent = header.parent_id();
        let connected = parent.is_origin() || self.store.contains_state(&parent)?;
        if connected {
            if let Err(e) = self.header_context(&header)? {
                warn!(%id, %peer, "invalid header: {e}");
                return Ok(DataStatus::Invalid);
            }
        }

        let seq = self.store.next_seq()?;
        self.store
            .insert_state(&StateRecord::new(header, peer, seq))?;
        debug!(%id, seq, connected, "header accepted");
        if connected {
            self.verify_waiting(&id)?;
        }
        Ok(DataStatus::Accepted)
    }

    /// Run the context checks of headers stored ahead of their parent, now
    /// that `id` connects them. Failing headers go with their subtree.
    ///
    /// Every stored header whose parent is stored has passed these checks,
    /// so chain work is only ever compared along verified ancestry.
    fn verify_waiting(&mut self, id: &StateId) -> Result<(), LodeError> {
        let mut stack = vec![*id];
        while let Some(parent) = stack.pop() {
            for child in self.store.children(&parent)? {
                let Some(record) = self.store.get_state(&child)? else {
                    continue;
                };
                match self.header_context(&record.header)? {
                    Ok(()) => stack.push(child),
                    Err(e) => {
                        warn!(id = %child, peer = %record.peer, "invalid header: {e}");
                        self.reject_branch(&child)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Store a body for a known header and advance the tip if possible.
    pub fn on_block(
        &mut self,
        id: &StateId,
        body_bytes: &[u8],
        peer: PeerId,
    ) -> Result<DataStatus, LodeError> {
        let Some(record) = self.store.get_state(id)? else {
            debug!(%id, "body for unknown header");
            return Ok(DataStatus::Rejected);
        };
        if record.has_body() || record.active {
            debug!(%id, "body not needed");
            return Ok(DataStatus::Rejected);
        }
        if id.height <= self.lowest_retained_height()? {
            debug!(%id, "body below retained height");
            return Ok(DataStatus::Rejected);
        }
        if let Err(e) = BlockBody::decode(body_bytes) {
            warn!(%id, %peer, "undecodable body: {e}");
            return Ok(DataStatus::Invalid);
        }

        self.store.put_body(id, body_bytes, peer)?;
        debug!(%id, bytes = body_bytes.len(), "body stored");

        let failed = self.try_advance()?;
        if failed.contains(id) {
            return Ok(DataStatus::Invalid);
        }
        Ok(DataStatus::Accepted)
    }

    // --- Chain selection ---

    /// Repeatedly switch to the best candidate branch. Returns the blocks
    /// that failed application.
    pub(crate) fn try_advance(&mut self) -> Result<Vec<StateId>, LodeError> {
        let start = self.cursor.id;
        let mut lowest_fork = start.height;
        let mut failed = Vec::new();

        while let Some(candidate) = self.best_candidate()? {
            lowest_fork = lowest_fork.min(candidate.fork.height);
            while self.cursor.id != candidate.fork {
                self.rollback_tip()?;
            }
            for id in &candidate.path {
                if let Err(e) = self.go_forward(id)? {
                    warn!(%id, "block failed application: {e}");
                    self.reject_branch(id)?;
                    failed.push(*id);
                    break;
                }
            }
        }

        if self.cursor.id != start {
            if lowest_fork < start.height {
                info!(
                    from = %start,
                    to = %self.cursor.id,
                    depth = start.height - lowest_fork,
                    "chain reorganized"
                );
            } else {
                info!(height = self.cursor.height(), tip = %self.cursor.id, "new tip");
            }
            self.prune_old()?;
            self.hooks.on_new_state(&self.cursor);
        }
        Ok(failed)
    }

    /// Heaviest applicable branch with strictly more work than the cursor.
    /// Equal work prefers the first-seen candidate.
    fn best_candidate(&self) -> Result<Option<Candidate>, LodeError> {
        let min_fork = self.lowest_rollback_height()?;
        let mut best: Option<Candidate> = None;

        for tip in self.store.tips()? {
            let Some(candidate) = self.candidate_from(&tip)? else {
                continue;
            };
            if candidate.work <= self.cursor.chain_work() || candidate.fork.height < min_fork {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => {
                    candidate.work > b.work || (candidate.work == b.work && candidate.seq < b.seq)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    /// Walk down from `tip` to the active chain and keep the prefix whose
    /// bodies are all present.
    fn candidate_from(&self, tip: &StateId) -> Result<Option<Candidate>, LodeError> {
        let mut branch = Vec::new();
        let mut id = *tip;
        let fork = loop {
            if id.is_origin() {
                break id;
            }
            let Some(record) = self.store.get_state(&id)? else {
                // Disconnected from anything we know.
                return Ok(None);
            };
            if record.active {
                break id;
            }
            id = record.parent();
            branch.push(record);
        };

        branch.reverse();
        let usable = branch.iter().take_while(|r| r.has_body()).count();
        let Some(last) = usable.checked_sub(1).map(|i| &branch[i]) else {
            return Ok(None);
        };
        Ok(Some(Candidate {
            fork,
            work: last.header.chain_work,
            seq: last.seq,
            path: branch[..usable].iter().map(StateRecord::id).collect(),
        }))
    }

    /// Undo the tip block using its journal and move the cursor to its parent.
    pub(crate) fn rollback_tip(&mut self) -> Result<(), LodeError> {
        let id = self.cursor.id;
        if id.is_origin() || id.height <= self.lowest_rollback_height()? {
            return Err(ChainStateError::BelowFloor {
                floor: self.lowest_rollback_height()?,
            }
            .into());
        }
        let Some(journal) = self.store.get_rollback(&id)? else {
            return Err(self.corrupted(format!("rollback data missing for {id}")));
        };

        let mut undo = journal.clone();
        if let Err(e) = undo.undo(&mut self.trees) {
            return Err(self.corrupted(format!("rollback of {id} failed: {e}")));
        }
        self.store.commit_rollback(&id, &journal, &self.trees)?;
        let parent = self.cursor.header.as_ref().map_or(StateId::ORIGIN, BlockHeader::parent_id);
        self.cursor = self.load_cursor(&parent)?;
        debug!(%id, "rolled back");
        Ok(())
    }

    /// Apply the stored child `id` of the cursor.
    fn go_forward(&mut self, id: &StateId) -> Result<Verdict, LodeError> {
        let record = self
            .store
            .get_state(id)?
            .ok_or_else(|| ChainStateError::StateNotFound(id.to_string()))?;
        if record.parent() != self.cursor.id {
            return Err(ChainStateError::StateNotFound(format!("{id} is not a child of the tip")).into());
        }
        let header = record.header;
        let height = header.height;

        if let Err(e) = self.header_context(&header)? {
            return Ok(Err(e));
        }

        let bytes = self
            .store
            .get_body(id)?
            .ok_or_else(|| ChainStateError::BodyMissing(id.to_string()))?;
        let body = match BlockBody::decode(&bytes) {
            Ok(body) => body,
            Err(e) => return Ok(Err(e.into())),
        };
        let weight = body.weight();
        if weight > self.config.max_block_weight {
            return Ok(Err(BlockError::Oversized {
                weight,
                max: self.config.max_block_weight,
            }));
        }
        if let Err(e) = self.hooks.verify_block(&body, height, height) {
            return Ok(Err(e));
        }

        let mut journal = RollbackData::new();
        if let Err(e) = apply_body(&mut self.trees, &body, height, &mut journal)? {
            return Ok(Err(e));
        }
        if node_hash(&self.cursor.history_next, &self.trees.live_root()) != header.definition {
            journal.undo(&mut self.trees)?;
            return Ok(Err(BlockError::DefinitionMismatch(id.to_string())));
        }

        let next = self.cursor.advance(header);
        self.store
            .commit_forward(id, next.history, &journal, &self.trees)?;
        self.cursor = next;
        debug!(%id, inputs = body.inputs.len(), outputs = body.outputs.len(), kernels = body.kernels.len(), "block applied");
        Ok(Ok(()))
    }

    /// Drop `id` and all its descendants and report the body's supplier.
    fn reject_branch(&mut self, id: &StateId) -> Result<(), LodeError> {
        let peer = self.store.get_state(id)?.map(|r| r.peer);
        let removed = self.delete_subtree(id)?;
        if let Some(peer) = peer {
            warn!(%id, %peer, removed, "peer supplied invalid data");
            self.hooks.on_peer_insane(&peer);
        }
        Ok(())
    }

    /// Delete `id` and every known descendant. Returns the number deleted.
    pub(crate) fn delete_subtree(&mut self, id: &StateId) -> Result<usize, LodeError> {
        let mut stack = vec![*id];
        let mut removed = 0;
        while let Some(next) = stack.pop() {
            stack.extend(self.store.children(&next)?);
            if self.store.contains_state(&next)? {
                self.store.delete_state(&next)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // --- Helpers ---

    /// Contextual checks for a header whose parent is the origin or stored.
    fn header_context(&self, header: &BlockHeader) -> Result<Verdict, LodeError> {
        let parent_id = header.parent_id();
        let parent = if parent_id.is_origin() {
            None
        } else {
            let record = self
                .store
                .get_state(&parent_id)?
                .ok_or_else(|| ChainStateError::StateNotFound(parent_id.to_string()))?;
            Some(record.header)
        };
        let timestamps = self.ancestor_timestamps(&parent_id)?;
        Ok(check_header_context(
            header,
            parent.as_ref(),
            &timestamps,
            self.config.initial_difficulty,
        ))
    }

    /// Timestamps of `from` and its ancestors, oldest first, at most one
    /// difficulty window.
    pub(crate) fn ancestor_timestamps(&self, from: &StateId) -> Result<Vec<u64>, LodeError> {
        let window = full_window_size() as usize;
        let mut timestamps = Vec::with_capacity(window);
        let mut id = *from;
        while !id.is_origin() && timestamps.len() < window {
            let Some(record) = self.store.get_state(&id)? else {
                break;
            };
            timestamps.push(record.header.timestamp);
            id = record.parent();
        }
        timestamps.reverse();
        Ok(timestamps)
    }

    pub(crate) fn load_cursor(&self, id: &StateId) -> Result<Cursor, LodeError> {
        if id.is_origin() {
            return Ok(Cursor::origin());
        }
        let Some(record) = self.store.get_state(id)? else {
            return Err(self.corrupted(format!("cursor state {id} missing")));
        };
        let Some(history) = record.history else {
            return Err(self.corrupted(format!("cursor state {id} has no history root")));
        };
        Ok(Cursor::at(record.header, history))
    }

    pub(crate) fn corrupted(&self, reason: String) -> LodeError {
        error!("node state corrupted: {reason}");
        self.hooks.on_corrupted(&reason);
        LodeError::Corrupted(reason)
    }
}

/// Difficulty, timestamp and work rules for a header given its parent
/// (`None` for the first block) and the ancestor timestamps ending at the
/// parent.
pub fn check_header_context(
    header: &BlockHeader,
    parent: Option<&BlockHeader>,
    timestamps: &[u64],
    initial_difficulty: u64,
) -> Verdict {
    if header.height == 1 && !header.prev.is_zero() {
        return Err(BlockError::InvalidPrev);
    }

    let parent_target = parent.map_or(initial_difficulty, |p| p.difficulty);
    let expected = next_difficulty(header.height, parent_target, timestamps, initial_difficulty);
    if header.difficulty > expected {
        return Err(BlockError::InvalidDifficulty {
            got: header.difficulty,
            expected,
        });
    }

    let median = moving_median(timestamps);
    if header.timestamp <= median {
        return Err(BlockError::TimestampNotAfterMedian {
            timestamp: header.timestamp,
            median,
        });
    }

    let parent_work = parent.map_or(0, |p| p.chain_work);
    let expected_work = parent_work.saturating_add(work_for_target(header.difficulty));
    if header.chain_work != expected_work {
        return Err(BlockError::InvalidChainWork {
            got: header.chain_work,
            expected: expected_work,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::testing::RecordingHooks;
    use crate::hooks::NoopHooks;
    use lode_core::constants::BLOCK_TIME_SECS;
    use lode_core::crypto::sign_kernel;
    use lode_core::store::MemoryStore;
    use lode_core::txpool::TxPool;
    use lode_core::types::{Commitment, Input, Output, Transaction};

    const T0: u64 = 1_700_000_000;

    fn processor(seed: u8) -> NodeProcessor<MemoryStore> {
        NodeProcessor::initialize(MemoryStore::new(), Arc::new(NoopHooks), ProcessorConfig::default())
            .unwrap()
            .with_coinbase_key(KeyPair::from_secret_bytes([seed; 32]))
    }

    fn peer(seed: u8) -> PeerId {
        PeerId([seed; 32])
    }

    /// Build a block on `p`'s tip and apply it there.
    fn extend(p: &mut NodeProcessor<MemoryStore>) -> (BlockHeader, Vec<u8>) {
        extend_with(p, &TxPool::with_defaults())
    }

    fn extend_with(p: &mut NodeProcessor<MemoryStore>, pool: &TxPool) -> (BlockHeader, Vec<u8>) {
        let ts = T0 + (p.cursor().height() + 1) * BLOCK_TIME_SECS;
        let block = p.generate_new_block(pool, ts).unwrap();
        let bytes = block.body.encode().unwrap();
        assert_eq!(p.on_header(block.header.clone(), false, peer(0)).unwrap(), DataStatus::Accepted);
        assert_eq!(p.on_block(&block.header.id(), &bytes, peer(0)).unwrap(), DataStatus::Accepted);
        (block.header, bytes)
    }

    fn feed(p: &mut NodeProcessor<MemoryStore>, blocks: &[(BlockHeader, Vec<u8>)], from: PeerId) {
        for (header, bytes) in blocks {
            p.on_header(header.clone(), false, from).unwrap();
            p.on_block(&header.id(), bytes, from).unwrap();
        }
    }

    #[test]
    fn first_block_moves_cursor() {
        let mut p = processor(1);
        let (header, _) = extend(&mut p);
        assert_eq!(p.cursor().id, header.id());
        assert_eq!(p.cursor().chain_work(), 1);
        assert_eq!(p.utxos().len(), 1);
        assert_eq!(p.kernels().len(), 1);
    }

    #[test]
    fn header_at_height_zero_invalid() {
        let mut p = processor(1);
        let header = BlockHeader { difficulty: MAX_TARGET, ..BlockHeader::default() };
        assert_eq!(p.on_header(header, false, peer(1)).unwrap(), DataStatus::Invalid);
    }

    #[test]
    fn duplicate_header_rejected() {
        let mut a = processor(1);
        let block = extend(&mut a);
        let mut b = processor(2);
        assert_eq!(b.on_header(block.0.clone(), false, peer(1)).unwrap(), DataStatus::Accepted);
        assert_eq!(b.on_header(block.0, false, peer(1)).unwrap(), DataStatus::Rejected);
    }

    #[test]
    fn body_for_unknown_header_rejected() {
        let mut a = processor(1);
        let (header, bytes) = extend(&mut a);
        let mut b = processor(2);
        assert_eq!(b.on_block(&header.id(), &bytes, peer(1)).unwrap(), DataStatus::Rejected);
    }

    #[test]
    fn undecodable_body_invalid_and_duplicate_rejected() {
        let mut a = processor(1);
        let (header, bytes) = extend(&mut a);
        let mut b = processor(2);
        b.on_header(header.clone(), false, peer(1)).unwrap();
        assert_eq!(b.on_block(&header.id(), &[0xFF, 0xFF], peer(1)).unwrap(), DataStatus::Invalid);
        assert_eq!(b.on_block(&header.id(), &bytes, peer(1)).unwrap(), DataStatus::Accepted);
        assert_eq!(b.on_block(&header.id(), &bytes, peer(1)).unwrap(), DataStatus::Rejected);
        assert_eq!(b.cursor().id, header.id());
    }

    #[test]
    fn too_easy_difficulty_invalid() {
        let config = ProcessorConfig { initial_difficulty: MAX_TARGET / 2, ..ProcessorConfig::default() };
        let mut p = NodeProcessor::initialize(MemoryStore::new(), Arc::new(NoopHooks), config).unwrap();
        let header = BlockHeader {
            height: 1,
            chain_work: 1,
            timestamp: T0,
            difficulty: MAX_TARGET,
            ..BlockHeader::default()
        };
        assert_eq!(p.on_header(header, true, peer(1)).unwrap(), DataStatus::Invalid);
    }

    #[test]
    fn wrong_chain_work_invalid() {
        let mut a = processor(1);
        let mut header = a.generate_new_block(&Default::default(), T0).unwrap().header;
        header.chain_work = 5;
        assert_eq!(a.on_header(header, false, peer(1)).unwrap(), DataStatus::Invalid);
    }

    #[test]
    fn timestamp_must_pass_median() {
        let mut a = processor(1);
        let (first, _) = extend(&mut a);
        let mut header = a.generate_new_block(&Default::default(), T0).unwrap().header;
        header.timestamp = first.timestamp;
        assert_eq!(a.on_header(header, false, peer(1)).unwrap(), DataStatus::Invalid);
    }

    #[test]
    fn equal_work_keeps_current_tip() {
        let mut a = processor(1);
        let mut b = processor(2);
        let (a1, _) = extend(&mut a);
        let b1 = extend(&mut b);
        feed(&mut a, &[b1.clone()], peer(2));
        assert_eq!(a.cursor().id, a1.id());
        assert!(a.store().get_state(&b1.0.id()).unwrap().is_some());
    }

    #[test]
    fn heavier_branch_triggers_reorg() {
        let mut a = processor(1);
        let mut b = processor(2);
        extend(&mut a);
        let b_blocks = vec![extend(&mut b), extend(&mut b)];
        feed(&mut a, &b_blocks, peer(2));
        assert_eq!(a.cursor().id, b.cursor().id);
        assert_eq!(a.live_root(), b.live_root());
    }

    #[test]
    fn out_of_order_bodies_apply_once_complete() {
        let mut a = processor(1);
        let blocks = vec![extend(&mut a), extend(&mut a), extend(&mut a)];
        let mut b = processor(2);
        for (header, _) in &blocks {
            b.on_header(header.clone(), false, peer(1)).unwrap();
        }
        b.on_block(&blocks[2].0.id(), &blocks[2].1, peer(1)).unwrap();
        b.on_block(&blocks[1].0.id(), &blocks[1].1, peer(1)).unwrap();
        assert!(b.cursor().is_origin());
        b.on_block(&blocks[0].0.id(), &blocks[0].1, peer(1)).unwrap();
        assert_eq!(b.cursor().id, a.cursor().id);
    }

    #[test]
    fn bad_definition_rejects_block_and_reports_peer() {
        let mut a = processor(1);
        let mut block = a.generate_new_block(&Default::default(), T0).unwrap();
        block.header.definition = Hash256([0xAB; 32]);

        let hooks = Arc::new(RecordingHooks::default());
        let mut b = NodeProcessor::initialize(MemoryStore::new(), hooks.clone(), ProcessorConfig::default()).unwrap();
        let id = block.header.id();
        assert_eq!(b.on_header(block.header, false, peer(9)).unwrap(), DataStatus::Accepted);
        let bytes = block.body.encode().unwrap();
        assert_eq!(b.on_block(&id, &bytes, peer(7)).unwrap(), DataStatus::Invalid);
        assert!(b.cursor().is_origin());
        assert!(b.store().get_state(&id).unwrap().is_none());
        assert!(b.live_root() == LiveTrees::new().live_root());
        assert_eq!(hooks.insane.lock().as_slice(), &[peer(7)]);
    }

    #[test]
    fn double_spend_block_invalid_and_supplier_reported() {
        let tx = |input: Option<u8>, out: u8| Transaction {
            inputs: input.map(|c| Input { commitment: Commitment([c; 32]) }).into_iter().collect(),
            outputs: vec![Output { commitment: Commitment([out; 32]), coinbase: false, incubation: 0 }],
            kernels: vec![sign_kernel(&KeyPair::from_secret_bytes([out; 32]), 5, 0, 1_000)],
        };
        let mut a = processor(1);
        let mut pool = TxPool::with_defaults();
        pool.add_tx(tx(None, 0x10), 0).unwrap();
        let funding = extend_with(&mut a, &pool);
        let mut pool = TxPool::with_defaults();
        pool.add_tx(tx(Some(0x10), 0x11), 1).unwrap();
        let spend = extend_with(&mut a, &pool);
        assert!(!a.utxos().contains(&Commitment([0x10; 32])));

        // Spends 0x10 again on top of the block that consumed it.
        let header = a.generate_new_block(&TxPool::with_defaults(), T0 + 3 * BLOCK_TIME_SECS).unwrap().header;
        let mut body = BlockBody::default();
        body.merge(&tx(Some(0x10), 0x12));
        body.normalize();
        let bytes = body.encode().unwrap();

        let hooks = Arc::new(RecordingHooks::default());
        let mut b = NodeProcessor::initialize(MemoryStore::new(), hooks.clone(), ProcessorConfig::default()).unwrap();
        feed(&mut b, &[funding, spend.clone()], peer(1));
        assert_eq!(b.on_header(header.clone(), false, peer(1)).unwrap(), DataStatus::Accepted);
        assert_eq!(b.on_block(&header.id(), &bytes, peer(7)).unwrap(), DataStatus::Invalid);
        assert_eq!(b.cursor().id, spend.0.id());
        assert!(b.store().get_state(&header.id()).unwrap().is_none());
        assert!(b.utxos().contains(&Commitment([0x11; 32])));
        assert_eq!(hooks.insane.lock().as_slice(), &[peer(7)]);
    }

    #[test]
    fn orphan_header_checked_once_parent_arrives() {
        let mut a = processor(1);
        let (first, _) = extend(&mut a);
        let mut second = a.generate_new_block(&TxPool::with_defaults(), T0 + 2 * BLOCK_TIME_SECS).unwrap().header;
        second.chain_work += 1;

        let hooks = Arc::new(RecordingHooks::default());
        let mut b = NodeProcessor::initialize(MemoryStore::new(), hooks.clone(), ProcessorConfig::default()).unwrap();
        assert_eq!(b.on_header(second.clone(), false, peer(6)).unwrap(), DataStatus::Accepted);
        assert_eq!(b.on_header(first, false, peer(1)).unwrap(), DataStatus::Accepted);
        assert!(b.store().get_state(&second.id()).unwrap().is_none());
        assert_eq!(hooks.insane.lock().as_slice(), &[peer(6)]);
    }

    #[test]
    fn initialize_restores_persisted_state() {
        let mut a = processor(1);
        extend(&mut a);
        extend(&mut a);
        let tip = a.cursor().clone();
        let root = a.live_root();
        let restored = NodeProcessor::initialize(a.store, Arc::new(NoopHooks), ProcessorConfig::default()).unwrap();
        assert_eq!(restored.cursor(), &tip);
        assert_eq!(restored.live_root(), root);
    }

    #[test]
    fn initialize_rejects_invalid_horizon() {
        let config = ProcessorConfig {
            horizon: Horizon { branching_depth: 10, fossil_depth: 5 },
            ..ProcessorConfig::default()
        };
        assert!(matches!(
            NodeProcessor::initialize(MemoryStore::new(), Arc::new(NoopHooks), config),
            Err(LodeError::ChainState(ChainStateError::InvalidHorizon { .. }))
        ));
    }

    #[test]
    fn state_needed_tracks_bodies() {
        let mut a = processor(1);
        let (header, bytes) = extend(&mut a);
        let mut b = processor(2);
        let id = header.id();
        assert!(b.is_state_needed(&id).unwrap());
        b.on_header(header, false, peer(1)).unwrap();
        assert!(b.is_state_needed(&id).unwrap());
        b.on_block(&id, &bytes, peer(1)).unwrap();
        assert!(!b.is_state_needed(&id).unwrap());
    }

    #[test]
    fn first_block_needs_zero_prev() {
        let header = BlockHeader {
            height: 1,
            prev: Hash256([1; 32]),
            chain_work: 1,
            timestamp: T0,
            difficulty: MAX_TARGET,
            ..BlockHeader::default()
        };
        assert_eq!(
            check_header_context(&header, None, &[], MAX_TARGET),
            Err(BlockError::InvalidPrev)
        );
    }
}
