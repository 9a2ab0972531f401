//! Persistence contract for the node processor.
//!
//! [`NodeStore`] is implemented in memory by
//! [`MemoryStore`](crate::store::MemoryStore) and on disk by `lode-node`'s
//! RocksDB store. Every `commit_*` method is one atomic unit: after a crash
//! the store reflects either the state before the call or the state after,
//! never a mix, so the persisted live trees always match the persisted cursor.

use crate::error::LodeError;
use crate::rollback::RollbackData;
use crate::store::StateRecord;
use crate::trees::LiveTrees;
use crate::types::{Hash256, PeerId, StateId};

pub trait NodeStore {
    // --- State records ---

    /// Insert a new header record. Assigns no sequence number; callers take one
    /// from [`next_seq`](Self::next_seq).
    fn insert_state(&mut self, record: &StateRecord) -> Result<(), LodeError>;

    fn get_state(&self, id: &StateId) -> Result<Option<StateRecord>, LodeError>;

    fn contains_state(&self, id: &StateId) -> Result<bool, LodeError> {
        Ok(self.get_state(id)?.is_some())
    }

    /// Delete a record together with its body reference and rollback data.
    fn delete_state(&mut self, id: &StateId) -> Result<(), LodeError>;

    /// Known children of `id` (the parent itself need not be known).
    fn children(&self, id: &StateId) -> Result<Vec<StateId>, LodeError>;

    /// Known states without known children.
    fn tips(&self) -> Result<Vec<StateId>, LodeError>;

    /// Active state at `height`, if any.
    fn active_at(&self, height: u64) -> Result<Option<StateId>, LodeError>;

    /// Monotonic first-seen counter.
    fn next_seq(&mut self) -> Result<u64, LodeError>;

    fn state_count(&self) -> Result<usize, LodeError>;

    // --- Bodies (reference-counted arena keyed by body hash) ---

    /// Attach body bytes to a state. `peer` becomes the state's reporting peer.
    fn put_body(&mut self, id: &StateId, bytes: &[u8], peer: PeerId) -> Result<Hash256, LodeError>;

    fn get_body(&self, id: &StateId) -> Result<Option<Vec<u8>>, LodeError>;

    /// Drop the state's body reference; the bytes go with the last reference.
    fn erase_body(&mut self, id: &StateId) -> Result<(), LodeError>;

    // --- Rollback journals ---

    fn get_rollback(&self, id: &StateId) -> Result<Option<RollbackData>, LodeError>;

    // --- Atomic transitions ---

    /// Mark `id` active, record its history root and journal, persist the
    /// post-application `trees` and move the cursor to `id`.
    fn commit_forward(
        &mut self,
        id: &StateId,
        history: Hash256,
        rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError>;

    /// Reverse of [`commit_forward`](Self::commit_forward): `trees` is the state
    /// after undoing `rollback`; the cursor moves to the parent of `id`.
    fn commit_rollback(
        &mut self,
        id: &StateId,
        rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError>;

    /// Adopt a snapshot: mark `path` (ascending, each with its history root)
    /// active, replace the live trees, set cursor, floor and fossil height to
    /// the last entry.
    fn commit_import(
        &mut self,
        path: &[(StateId, Hash256)],
        trees: &LiveTrees,
    ) -> Result<(), LodeError>;

    /// Erase the body reference and rollback journal of an active state and
    /// advance the fossil height to it.
    fn commit_fossil(&mut self, id: &StateId) -> Result<(), LodeError>;

    // --- Markers ---

    /// Current tip. [`StateId::ORIGIN`] before the first block.
    fn cursor(&self) -> Result<StateId, LodeError>;

    /// Height below which nothing may be rolled back (set by snapshot import).
    fn floor(&self) -> Result<u64, LodeError>;

    /// Highest fossilized height.
    fn fossil_height(&self) -> Result<u64, LodeError>;

    /// Persisted live trees.
    fn load_live(&self) -> Result<LiveTrees, LodeError>;
}
