//! State records, the body arena and the in-memory [`NodeStore`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{ChainStateError, LodeError};
use crate::rollback::RollbackData;
use crate::traits::NodeStore;
use crate::trees::LiveTrees;
use crate::types::{BlockHeader, Hash256, PeerId, StateId};

/// One known header and what the node knows about it.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct StateRecord {
    pub header: BlockHeader,
    /// Peer that supplied the header, replaced by the body's supplier.
    pub peer: PeerId,
    /// Arena key of the body, if held.
    pub body: Option<Hash256>,
    /// On the active chain.
    pub active: bool,
    /// Header-history root through the parent. Set while active.
    pub history: Option<Hash256>,
    /// First-seen order.
    pub seq: u64,
}

impl StateRecord {
    pub fn new(header: BlockHeader, peer: PeerId, seq: u64) -> Self {
        Self {
            header,
            peer,
            body: None,
            active: false,
            history: None,
            seq,
        }
    }

    pub fn id(&self) -> StateId {
        self.header.id()
    }

    pub fn parent(&self) -> StateId {
        self.header.parent_id()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

/// Reference-counted body storage.
///
/// Competing branches frequently carry identical bodies (empty blocks in
/// particular), so bodies are keyed by content hash and shared.
#[derive(Debug, Default)]
pub struct BodyArena {
    bodies: HashMap<Hash256, (Vec<u8>, usize)>,
}

impl BodyArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which `bytes` are stored.
    pub fn key(bytes: &[u8]) -> Hash256 {
        Hash256::blake3(bytes)
    }

    /// Add a reference, storing the bytes if this is the first.
    pub fn add_ref(&mut self, bytes: &[u8]) -> Hash256 {
        let key = Self::key(bytes);
        self.bodies
            .entry(key)
            .and_modify(|(_, refs)| *refs += 1)
            .or_insert_with(|| (bytes.to_vec(), 1));
        key
    }

    /// Drop a reference. Returns `true` when the bytes were freed.
    pub fn release(&mut self, key: &Hash256) -> bool {
        let Some((_, refs)) = self.bodies.get_mut(key) else {
            return false;
        };
        *refs -= 1;
        if *refs == 0 {
            self.bodies.remove(key);
            return true;
        }
        false
    }

    pub fn get(&self, key: &Hash256) -> Option<&[u8]> {
        self.bodies.get(key).map(|(bytes, _)| bytes.as_slice())
    }

    pub fn ref_count(&self, key: &Hash256) -> usize {
        self.bodies.get(key).map_or(0, |(_, refs)| *refs)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// In-memory [`NodeStore`] for tests and ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: BTreeMap<StateId, StateRecord>,
    children: HashMap<StateId, BTreeSet<StateId>>,
    /// Stored states without stored children.
    tips: BTreeSet<StateId>,
    active: BTreeMap<u64, StateId>,
    arena: BodyArena,
    rollbacks: HashMap<StateId, RollbackData>,
    trees: LiveTrees,
    cursor: StateId,
    floor: u64,
    fossil_height: u64,
    seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct body blobs held.
    pub fn body_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of rollback journals held.
    pub fn rollback_count(&self) -> usize {
        self.rollbacks.len()
    }

    fn record_mut(&mut self, id: &StateId) -> Result<&mut StateRecord, LodeError> {
        self.states
            .get_mut(id)
            .ok_or_else(|| ChainStateError::StateNotFound(id.to_string()).into())
    }
}

impl NodeStore for MemoryStore {
    fn insert_state(&mut self, record: &StateRecord) -> Result<(), LodeError> {
        let id = record.id();
        self.children.entry(record.parent()).or_default().insert(id);
        self.tips.remove(&record.parent());
        if !self.children.contains_key(&id) {
            self.tips.insert(id);
        }
        if record.active {
            self.active.insert(id.height, id);
        }
        self.states.insert(id, record.clone());
        Ok(())
    }

    fn get_state(&self, id: &StateId) -> Result<Option<StateRecord>, LodeError> {
        Ok(self.states.get(id).cloned())
    }

    fn delete_state(&mut self, id: &StateId) -> Result<(), LodeError> {
        let Some(record) = self.states.remove(id) else {
            return Ok(());
        };
        self.tips.remove(id);
        let parent = record.parent();
        if let Some(siblings) = self.children.get_mut(&parent) {
            siblings.remove(id);
            if siblings.is_empty() {
                self.children.remove(&parent);
                if self.states.contains_key(&parent) {
                    self.tips.insert(parent);
                }
            }
        }
        if record.active && self.active.get(&id.height) == Some(id) {
            self.active.remove(&id.height);
        }
        if let Some(key) = record.body {
            self.arena.release(&key);
        }
        self.rollbacks.remove(id);
        Ok(())
    }

    fn children(&self, id: &StateId) -> Result<Vec<StateId>, LodeError> {
        Ok(self
            .children
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn tips(&self) -> Result<Vec<StateId>, LodeError> {
        Ok(self.tips.iter().copied().collect())
    }

    fn active_at(&self, height: u64) -> Result<Option<StateId>, LodeError> {
        Ok(self.active.get(&height).copied())
    }

    fn next_seq(&mut self) -> Result<u64, LodeError> {
        self.seq += 1;
        Ok(self.seq)
    }

    fn state_count(&self) -> Result<usize, LodeError> {
        Ok(self.states.len())
    }

    fn put_body(&mut self, id: &StateId, bytes: &[u8], peer: PeerId) -> Result<Hash256, LodeError> {
        if !self.states.contains_key(id) {
            return Err(ChainStateError::StateNotFound(id.to_string()).into());
        }
        let key = self.arena.add_ref(bytes);
        let record = self.record_mut(id)?;
        let previous = record.body.replace(key);
        record.peer = peer;
        if let Some(old) = previous {
            self.arena.release(&old);
        }
        Ok(key)
    }

    fn get_body(&self, id: &StateId) -> Result<Option<Vec<u8>>, LodeError> {
        Ok(self
            .states
            .get(id)
            .and_then(|r| r.body)
            .and_then(|key| self.arena.get(&key))
            .map(<[u8]>::to_vec))
    }

    fn erase_body(&mut self, id: &StateId) -> Result<(), LodeError> {
        let key = self.record_mut(id)?.body.take();
        if let Some(key) = key {
            self.arena.release(&key);
        }
        Ok(())
    }

    fn get_rollback(&self, id: &StateId) -> Result<Option<RollbackData>, LodeError> {
        Ok(self.rollbacks.get(id).cloned())
    }

    fn commit_forward(
        &mut self,
        id: &StateId,
        history: Hash256,
        rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        let record = self.record_mut(id)?;
        record.active = true;
        record.history = Some(history);
        self.active.insert(id.height, *id);
        self.rollbacks.insert(*id, rollback.clone());
        self.trees = trees.clone();
        self.cursor = *id;
        Ok(())
    }

    fn commit_rollback(
        &mut self,
        id: &StateId,
        _rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        let record = self.record_mut(id)?;
        record.active = false;
        record.history = None;
        let parent = record.parent();
        self.active.remove(&id.height);
        self.rollbacks.remove(id);
        self.trees = trees.clone();
        self.cursor = parent;
        Ok(())
    }

    fn commit_import(
        &mut self,
        path: &[(StateId, Hash256)],
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        for (id, history) in path {
            let record = self.record_mut(id)?;
            record.active = true;
            record.history = Some(*history);
            self.active.insert(id.height, *id);
        }
        if let Some((target, _)) = path.last() {
            self.cursor = *target;
            self.floor = target.height;
            self.fossil_height = target.height;
        }
        self.trees = trees.clone();
        Ok(())
    }

    fn commit_fossil(&mut self, id: &StateId) -> Result<(), LodeError> {
        self.erase_body(id)?;
        self.rollbacks.remove(id);
        self.fossil_height = self.fossil_height.max(id.height);
        Ok(())
    }

    fn cursor(&self) -> Result<StateId, LodeError> {
        Ok(self.cursor)
    }

    fn floor(&self) -> Result<u64, LodeError> {
        Ok(self.floor)
    }

    fn fossil_height(&self) -> Result<u64, LodeError> {
        Ok(self.fossil_height)
    }

    fn load_live(&self) -> Result<LiveTrees, LodeError> {
        Ok(self.trees.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Commitment, UtxoEntry};

    fn header(height: u64, prev: Hash256, nonce: u64) -> BlockHeader {
        BlockHeader {
            height,
            prev,
            nonce,
            difficulty: u64::MAX,
            ..BlockHeader::default()
        }
    }

    fn insert(store: &mut MemoryStore, h: BlockHeader) -> StateId {
        let seq = store.next_seq().unwrap();
        let record = StateRecord::new(h, PeerId::default(), seq);
        store.insert_state(&record).unwrap();
        record.id()
    }

    #[test]
    fn arena_shares_identical_bodies() {
        let mut arena = BodyArena::new();
        let a = arena.add_ref(b"body");
        let b = arena.add_ref(b"body");
        assert_eq!(a, b);
        assert_eq!(arena.ref_count(&a), 2);
        assert!(!arena.release(&a));
        assert_eq!(arena.get(&a), Some(&b"body"[..]));
        assert!(arena.release(&a));
        assert!(arena.get(&a).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn tips_and_children() {
        let mut store = MemoryStore::new();
        let a = insert(&mut store, header(1, Hash256::ZERO, 0));
        let b = insert(&mut store, header(2, a.hash, 0));
        let c = insert(&mut store, header(2, a.hash, 1));
        assert_eq!(store.children(&a).unwrap().len(), 2);
        let tips = store.tips().unwrap();
        assert_eq!(tips.len(), 2);
        assert!(tips.contains(&b) && tips.contains(&c));

        store.delete_state(&b).unwrap();
        store.delete_state(&c).unwrap();
        assert_eq!(store.tips().unwrap(), vec![a]);
    }

    #[test]
    fn orphan_inserted_before_parent_stays_tip() {
        let mut store = MemoryStore::new();
        let a_header = header(1, Hash256::ZERO, 0);
        let a = a_header.id();
        let b = insert(&mut store, header(2, a.hash, 0));
        assert_eq!(store.tips().unwrap(), vec![b]);

        insert(&mut store, a_header);
        assert_eq!(store.tips().unwrap(), vec![b]);

        // The parent becomes a tip again once its last child goes.
        store.delete_state(&b).unwrap();
        assert_eq!(store.tips().unwrap(), vec![a]);
        store.delete_state(&a).unwrap();
        assert!(store.tips().unwrap().is_empty());
    }

    #[test]
    fn deleting_state_releases_body() {
        let mut store = MemoryStore::new();
        let a = insert(&mut store, header(1, Hash256::ZERO, 0));
        let b = insert(&mut store, header(1, Hash256::ZERO, 1));
        store.put_body(&a, b"same", PeerId([1; 32])).unwrap();
        store.put_body(&b, b"same", PeerId([2; 32])).unwrap();
        assert_eq!(store.body_count(), 1);
        assert_eq!(store.get_state(&b).unwrap().unwrap().peer, PeerId([2; 32]));

        store.delete_state(&a).unwrap();
        assert_eq!(store.get_body(&b).unwrap().as_deref(), Some(&b"same"[..]));
        store.erase_body(&b).unwrap();
        assert_eq!(store.body_count(), 0);
    }

    #[test]
    fn forward_and_rollback_move_cursor() {
        let mut store = MemoryStore::new();
        let a = insert(&mut store, header(1, Hash256::ZERO, 0));
        let mut trees = LiveTrees::new();
        let mut journal = RollbackData::new();
        journal.insert_utxo(&mut trees, Commitment([1; 32]), UtxoEntry { created: 1, maturity: 1 });

        store.commit_forward(&a, Hash256::ZERO, &journal, &trees).unwrap();
        assert_eq!(store.cursor().unwrap(), a);
        assert_eq!(store.active_at(1).unwrap(), Some(a));
        assert_eq!(store.load_live().unwrap(), trees);
        assert_eq!(store.get_rollback(&a).unwrap(), Some(journal.clone()));

        journal.undo(&mut trees).unwrap();
        store.commit_rollback(&a, &RollbackData::new(), &trees).unwrap();
        assert_eq!(store.cursor().unwrap(), StateId::ORIGIN);
        assert_eq!(store.active_at(1).unwrap(), None);
        assert!(store.load_live().unwrap().is_empty());
        assert_eq!(store.rollback_count(), 0);
    }

    #[test]
    fn fossil_erases_body_and_rollback() {
        let mut store = MemoryStore::new();
        let a = insert(&mut store, header(1, Hash256::ZERO, 0));
        store.put_body(&a, b"x", PeerId::default()).unwrap();
        store
            .commit_forward(&a, Hash256::ZERO, &RollbackData::new(), &LiveTrees::new())
            .unwrap();
        store.commit_fossil(&a).unwrap();
        assert!(store.get_body(&a).unwrap().is_none());
        assert!(store.get_rollback(&a).unwrap().is_none());
        assert_eq!(store.fossil_height().unwrap(), 1);
        assert!(store.get_state(&a).unwrap().unwrap().active);
    }
}
