//! The processor's position on the active chain.

use serde::{Deserialize, Serialize};

use lode_core::merkle::node_hash;
use lode_core::types::{BlockHeader, Hash256, StateId};

/// Current tip plus the header-history roots around it.
///
/// `history` accumulates header hashes through the tip's parent and is what
/// the tip's `definition` commits to; `history_next` includes the tip itself
/// and is what the next block will commit to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub id: StateId,
    /// `None` before the first block.
    pub header: Option<BlockHeader>,
    pub history: Hash256,
    pub history_next: Hash256,
}

impl Cursor {
    /// Position before the first block. Both roots are zero.
    pub fn origin() -> Self {
        Self {
            id: StateId::ORIGIN,
            header: None,
            history: Hash256::ZERO,
            history_next: Hash256::ZERO,
        }
    }

    /// Cursor at `header`, given the history root through its parent.
    pub fn at(header: BlockHeader, history: Hash256) -> Self {
        let id = header.id();
        Self {
            id,
            history_next: node_hash(&history, &id.hash),
            header: Some(header),
            history,
        }
    }

    /// Cursor one block further, at a child of the current tip.
    pub fn advance(&self, header: BlockHeader) -> Self {
        Self::at(header, self.history_next)
    }

    pub fn height(&self) -> u64 {
        self.id.height
    }

    pub fn chain_work(&self) -> u128 {
        self.header.as_ref().map_or(0, |h| h.chain_work)
    }

    pub fn is_origin(&self) -> bool {
        self.id.is_origin()
    }
}
