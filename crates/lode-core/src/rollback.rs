//! Append-only journal of tree mutations.
//!
//! Every mutation of the live trees during forward application goes through
//! a [`RollbackData`] so it can be reversed exactly. Undo replays the journal
//! backwards; it never re-derives anything from the block body, so it stays
//! correct even if bodies are later pruned.

use serde::{Deserialize, Serialize};

use crate::error::ChainStateError;
use crate::trees::LiveTrees;
use crate::types::{Commitment, Hash256, UtxoEntry};

/// One recorded tree mutation.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum TreeOp {
    UtxoInserted { commitment: Commitment },
    /// Carries the removed entry so undo can restore it verbatim.
    UtxoRemoved { commitment: Commitment, entry: UtxoEntry },
    KernelInserted { id: Hash256 },
}

/// Journal for one applied block (or a tentative transaction batch).
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct RollbackData {
    ops: Vec<TreeOp>,
}

impl RollbackData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[TreeOp] {
        &self.ops
    }

    /// Insert a UTXO and record it. Returns `false` if it already existed;
    /// nothing is recorded in that case.
    pub fn insert_utxo(
        &mut self,
        trees: &mut LiveTrees,
        commitment: Commitment,
        entry: UtxoEntry,
    ) -> bool {
        if !trees.utxos.insert(commitment, entry) {
            return false;
        }
        self.ops.push(TreeOp::UtxoInserted { commitment });
        true
    }

    /// Remove a UTXO and record the removed entry.
    pub fn remove_utxo(
        &mut self,
        trees: &mut LiveTrees,
        commitment: &Commitment,
    ) -> Option<UtxoEntry> {
        let entry = trees.utxos.remove(commitment)?;
        self.ops.push(TreeOp::UtxoRemoved {
            commitment: *commitment,
            entry,
        });
        Some(entry)
    }

    /// Insert a kernel id and record it. Returns `false` if already present.
    pub fn insert_kernel(&mut self, trees: &mut LiveTrees, id: Hash256) -> bool {
        if !trees.kernels.insert(id) {
            return false;
        }
        self.ops.push(TreeOp::KernelInserted { id });
        true
    }

    /// Undo every recorded op, newest first, leaving the journal empty.
    pub fn undo(&mut self, trees: &mut LiveTrees) -> Result<(), ChainStateError> {
        self.undo_to(trees, 0)
    }

    /// Undo ops recorded after `mark` (a previous [`len`](Self::len)).
    pub fn undo_to(&mut self, trees: &mut LiveTrees, mark: usize) -> Result<(), ChainStateError> {
        while self.ops.len() > mark {
            let Some(op) = self.ops.pop() else { break };
            revert(trees, &op)?;
        }
        Ok(())
    }

    /// Append another journal's ops after this one's.
    pub fn extend(&mut self, other: RollbackData) {
        self.ops.extend(other.ops);
    }

    pub fn encode(&self) -> Result<Vec<u8>, ChainStateError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ChainStateError::UndoFailed(format!("encode: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChainStateError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(data, _)| data)
            .map_err(|e| ChainStateError::UndoFailed(format!("decode: {e}")))
    }
}

fn revert(trees: &mut LiveTrees, op: &TreeOp) -> Result<(), ChainStateError> {
    match op {
        TreeOp::UtxoInserted { commitment } => {
            trees.utxos.remove(commitment).map(|_| ()).ok_or_else(|| {
                ChainStateError::UndoFailed(format!("utxo {commitment} not present"))
            })
        }
        TreeOp::UtxoRemoved { commitment, entry } => {
            if trees.utxos.insert(*commitment, *entry) {
                Ok(())
            } else {
                Err(ChainStateError::UndoFailed(format!(
                    "utxo {commitment} already present"
                )))
            }
        }
        TreeOp::KernelInserted { id } => {
            if trees.kernels.remove(id) {
                Ok(())
            } else {
                Err(ChainStateError::UndoFailed(format!("kernel {id} not present")))
            }
        }
    }
}
