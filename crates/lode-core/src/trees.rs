//! Commitment trees: the live UTXO set and the spent-kernel set.
//!
//! Both are ordered maps so iteration (and therefore the Merkle root) is
//! deterministic. The live root binds the two together and is what a block
//! header's `definition` commits to.

use std::collections::{BTreeMap, BTreeSet};

use crate::merkle::{merkle_root, node_hash};
use crate::types::{Commitment, Hash256, UtxoEntry};

/// Unspent outputs keyed by commitment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtxoTree {
    entries: BTreeMap<Commitment, UtxoEntry>,
}

impl UtxoTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, commitment: &Commitment) -> Option<&UtxoEntry> {
        self.entries.get(commitment)
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.entries.contains_key(commitment)
    }

    /// Insert a new entry. Returns `false` (and leaves the tree untouched) if
    /// the commitment is already present.
    pub fn insert(&mut self, commitment: Commitment, entry: UtxoEntry) -> bool {
        use std::collections::btree_map::Entry;
        match self.entries.entry(commitment) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    pub fn remove(&mut self, commitment: &Commitment) -> Option<UtxoEntry> {
        self.entries.remove(commitment)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Commitment, &UtxoEntry)> {
        self.entries.iter()
    }

    pub fn root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self
            .entries
            .iter()
            .map(|(c, e)| utxo_leaf(c, e))
            .collect();
        merkle_root(&leaves)
    }
}

fn utxo_leaf(commitment: &Commitment, entry: &UtxoEntry) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&commitment.0);
    hasher.update(&entry.created.to_le_bytes());
    hasher.update(&entry.maturity.to_le_bytes());
    Hash256(hasher.finalize().into())
}

/// Ids of every kernel committed on the active chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelTree {
    ids: BTreeSet<Hash256>,
}

impl KernelTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if the id is already present.
    pub fn insert(&mut self, id: Hash256) -> bool {
        self.ids.insert(id)
    }

    pub fn remove(&mut self, id: &Hash256) -> bool {
        self.ids.remove(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hash256> {
        self.ids.iter()
    }

    pub fn root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self.ids.iter().copied().collect();
        merkle_root(&leaves)
    }
}

/// The two live trees as one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveTrees {
    pub utxos: UtxoTree,
    pub kernels: KernelTree,
}

impl LiveTrees {
    pub fn new() -> Self {
        Self::default()
    }

    /// `node_hash(utxo_root, kernel_root)`.
    pub fn live_root(&self) -> Hash256 {
        node_hash(&self.utxos.root(), &self.kernels.root())
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty() && self.kernels.is_empty()
    }
}
