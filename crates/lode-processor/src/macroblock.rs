//! Snapshot of the live state at one block, for fast bootstrap.
//!
//! A macroblock carries everything needed to adopt a tip without replaying
//! history: the tip header, the header-history root through its parent and
//! the full UTXO and kernel sets. The importer checks the snapshot against
//! the header's `definition`, so only the header chain has to be trusted.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use lode_core::error::{LodeError, MacroBlockError};
use lode_core::merkle::node_hash;
use lode_core::traits::NodeStore;
use lode_core::trees::LiveTrees;
use lode_core::types::{BlockHeader, Commitment, Hash256, StateId, UtxoEntry};

use crate::cursor::Cursor;
use crate::processor::{DataStatus, NodeProcessor};

#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct MacroBlock {
    pub tip: StateId,
    pub header: BlockHeader,
    /// Header-history root through the tip's parent.
    pub history: Hash256,
    pub utxos: Vec<(Commitment, UtxoEntry)>,
    pub kernels: Vec<Hash256>,
}

impl MacroBlock {
    pub fn encode(&self) -> Result<Vec<u8>, LodeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| LodeError::Storage(format!("macroblock encode: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LodeError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(mb, _)| mb)
            .map_err(|e| LodeError::Storage(format!("macroblock decode: {e}")))
    }

    /// Rebuild the live trees, rejecting duplicate entries.
    fn trees(&self) -> Result<LiveTrees, MacroBlockError> {
        let mut trees = LiveTrees::new();
        for (commitment, entry) in &self.utxos {
            if !trees.utxos.insert(*commitment, *entry) {
                return Err(MacroBlockError::DuplicateUtxo(commitment.to_string()));
            }
        }
        for id in &self.kernels {
            if !trees.kernels.insert(*id) {
                return Err(MacroBlockError::DuplicateKernel(id.to_string()));
            }
        }
        Ok(trees)
    }
}

impl<S: NodeStore> NodeProcessor<S> {
    /// Snapshot the live state at the cursor.
    ///
    /// Borrows the processor immutably, so no block can be applied while the
    /// snapshot is taken.
    pub fn export_macroblock(&self) -> Result<MacroBlock, LodeError> {
        let Some(header) = self.cursor.header.clone() else {
            return Err(MacroBlockError::UnknownTarget(self.cursor.id.to_string()).into());
        };
        let macroblock = MacroBlock {
            tip: self.cursor.id,
            header,
            history: self.cursor.history,
            utxos: self.trees.utxos.iter().map(|(c, e)| (*c, *e)).collect(),
            kernels: self.trees.kernels.iter().copied().collect(),
        };
        info!(
            tip = %macroblock.tip,
            utxos = macroblock.utxos.len(),
            kernels = macroblock.kernels.len(),
            "macroblock exported"
        );
        Ok(macroblock)
    }

    /// Adopt a snapshot at `target`.
    ///
    /// Only a fresh processor may import. The target header and all its
    /// ancestors must already be stored. Nothing is adopted unless the
    /// snapshot reproduces the header's definition.
    pub fn import_macroblock(
        &mut self,
        target: &StateId,
        macroblock: &MacroBlock,
    ) -> Result<DataStatus, LodeError> {
        if !self.cursor.is_origin() || !self.trees.is_empty() {
            warn!(%target, "{}", MacroBlockError::NotFresh);
            return Ok(DataStatus::Rejected);
        }
        let Some(path) = self.header_path(target)? else {
            warn!(%target, "{}", MacroBlockError::AncestryIncomplete(target.to_string()));
            return Ok(DataStatus::Rejected);
        };
        let Some(record) = self.store.get_state(target)? else {
            warn!(%target, "{}", MacroBlockError::UnknownTarget(target.to_string()));
            return Ok(DataStatus::Rejected);
        };

        match self.check_macroblock(target, &record.header, &path, macroblock) {
            Ok(trees) => {
                self.store.commit_import(&path, &trees)?;
                self.trees = trees;
                self.cursor = Cursor::at(record.header, macroblock.history);
                info!(
                    tip = %target,
                    utxos = self.trees.utxos.len(),
                    kernels = self.trees.kernels.len(),
                    "macroblock imported"
                );
                self.hooks.on_new_state(&self.cursor);
                Ok(DataStatus::Accepted)
            }
            Err(e) => {
                warn!(%target, "invalid macroblock: {e}");
                Ok(DataStatus::Invalid)
            }
        }
    }

    fn check_macroblock(
        &self,
        target: &StateId,
        header: &BlockHeader,
        path: &[(StateId, Hash256)],
        macroblock: &MacroBlock,
    ) -> Result<LiveTrees, MacroBlockError> {
        if macroblock.tip != *target || macroblock.header != *header {
            return Err(MacroBlockError::TipMismatch {
                snapshot: macroblock.tip.to_string(),
                target: target.to_string(),
            });
        }
        let history = path.last().map(|(_, h)| *h).unwrap_or(Hash256::ZERO);
        if macroblock.history != history {
            return Err(MacroBlockError::HistoryMismatch);
        }
        let trees = macroblock.trees()?;
        if node_hash(&history, &trees.live_root()) != header.definition {
            return Err(MacroBlockError::DefinitionMismatch);
        }
        Ok(trees)
    }

    /// Ascending ids from height 1 to `target`, each paired with the history
    /// root through its parent. `None` if any header is missing.
    fn header_path(&self, target: &StateId) -> Result<Option<Vec<(StateId, Hash256)>>, LodeError> {
        let mut ids = Vec::new();
        let mut id = *target;
        while !id.is_origin() {
            let Some(record) = self.store.get_state(&id)? else {
                return Ok(None);
            };
            ids.push(id);
            id = record.parent();
        }
        ids.reverse();

        let mut history = Hash256::ZERO;
        let mut path = Vec::with_capacity(ids.len());
        for id in ids {
            path.push((id, history));
            history = node_hash(&history, &id.hash);
        }
        Ok(Some(path))
    }
}
