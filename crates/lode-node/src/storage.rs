//! RocksDB-backed persistent node state.
//!
//! Implements [`NodeStore`] using RocksDB column families for state records,
//! the parent/child index, the tip set, the active-chain index, reference-counted bodies,
//! rollback journals, the live UTXO and kernel trees, and metadata. Every
//! `commit_*` call is a single [`WriteBatch`], so the persisted trees always
//! match the persisted cursor.

use std::collections::BTreeSet;
use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, SliceTransform, WriteBatch, DB};

use lode_core::error::{ChainStateError, LodeError};
use lode_core::rollback::{RollbackData, TreeOp};
use lode_core::store::{BodyArena, StateRecord};
use lode_core::traits::NodeStore;
use lode_core::trees::LiveTrees;
use lode_core::types::{Commitment, Hash256, PeerId, StateId, UtxoEntry};

// --- Column family names ---

const CF_STATES: &str = "states";
const CF_CHILDREN: &str = "children";
const CF_TIPS: &str = "tips";
const CF_ACTIVE: &str = "active";
const CF_BODIES: &str = "bodies";
const CF_ROLLBACK: &str = "rollback";
const CF_UTXOS: &str = "utxos";
const CF_KERNELS: &str = "kernels";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_STATES,
    CF_CHILDREN,
    CF_TIPS,
    CF_ACTIVE,
    CF_BODIES,
    CF_ROLLBACK,
    CF_UTXOS,
    CF_KERNELS,
    CF_METADATA,
];

// --- Metadata keys ---

const META_CURSOR: &[u8] = b"cursor";
const META_FLOOR: &[u8] = b"floor";
const META_FOSSIL_HEIGHT: &[u8] = b"fossil_height";
const META_SEQ: &[u8] = b"seq";

/// Length of an encoded [`StateId`]: height (BE) || hash.
const STATE_KEY_LEN: usize = 40;

fn storage_err(e: impl std::fmt::Display) -> LodeError {
    LodeError::Storage(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, LodeError> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, LodeError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(storage_err)
}

/// RocksDB-backed [`NodeStore`].
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at the given path, creating missing column
    /// families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LodeError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                // Child index keys are parent || child; look up by parent.
                if *name == CF_CHILDREN {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(STATE_KEY_LEN));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(storage_err)?;
        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), LodeError> {
        self.db.flush().map_err(storage_err)
    }

    /// Number of distinct body blobs held.
    pub fn body_count(&self) -> Result<usize, LodeError> {
        let cf = self.cf_handle(CF_BODIES)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(storage_err)?;
            count += 1;
        }
        Ok(count)
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, LodeError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LodeError::Storage(format!("missing column family: {name}")))
    }

    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, LodeError> {
        let cf = self.cf_handle(cf)?;
        self.db.get_cf(cf, key).map_err(storage_err)
    }

    fn state_key(id: &StateId) -> [u8; STATE_KEY_LEN] {
        let mut key = [0u8; STATE_KEY_LEN];
        key[..8].copy_from_slice(&id.height.to_be_bytes());
        key[8..].copy_from_slice(id.hash.as_bytes());
        key
    }

    fn decode_state_key(bytes: &[u8]) -> Result<StateId, LodeError> {
        if bytes.len() != STATE_KEY_LEN {
            return Err(LodeError::Storage("invalid state key length".into()));
        }
        let height = u64::from_be_bytes(bytes[..8].try_into().map_err(storage_err)?);
        let hash: [u8; 32] = bytes[8..].try_into().map_err(storage_err)?;
        Ok(StateId::new(height, Hash256(hash)))
    }

    fn child_key(parent: &StateId, child: &StateId) -> [u8; 2 * STATE_KEY_LEN] {
        let mut key = [0u8; 2 * STATE_KEY_LEN];
        key[..STATE_KEY_LEN].copy_from_slice(&Self::state_key(parent));
        key[STATE_KEY_LEN..].copy_from_slice(&Self::state_key(child));
        key
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, LodeError> {
        match self.get(CF_METADATA, key)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| LodeError::Storage("invalid metadata value length".into()))?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn require_state(&self, id: &StateId) -> Result<StateRecord, LodeError> {
        self.get_state(id)?
            .ok_or_else(|| ChainStateError::StateNotFound(id.to_string()).into())
    }

    fn put_state(&self, batch: &mut WriteBatch, record: &StateRecord) -> Result<(), LodeError> {
        let cf = self.cf_handle(CF_STATES)?;
        batch.put_cf(cf, Self::state_key(&record.id()), encode(record)?);
        Ok(())
    }

    /// Body entries are `refs (u64 LE) || bytes`.
    fn body_entry(&self, key: &Hash256) -> Result<Option<(u64, Vec<u8>)>, LodeError> {
        let Some(value) = self.get(CF_BODIES, key.as_bytes())? else {
            return Ok(None);
        };
        if value.len() < 8 {
            return Err(LodeError::Storage("invalid body entry".into()));
        }
        let refs = u64::from_le_bytes(value[..8].try_into().map_err(storage_err)?);
        Ok(Some((refs, value[8..].to_vec())))
    }

    fn add_body_ref(&self, batch: &mut WriteBatch, bytes: &[u8]) -> Result<Hash256, LodeError> {
        let key = BodyArena::key(bytes);
        let refs = self.body_entry(&key)?.map_or(0, |(refs, _)| refs);
        let mut value = Vec::with_capacity(8 + bytes.len());
        value.extend_from_slice(&(refs + 1).to_le_bytes());
        value.extend_from_slice(bytes);
        batch.put_cf(self.cf_handle(CF_BODIES)?, key.as_bytes(), value);
        Ok(key)
    }

    fn release_body_ref(&self, batch: &mut WriteBatch, key: &Hash256) -> Result<(), LodeError> {
        let cf = self.cf_handle(CF_BODIES)?;
        match self.body_entry(key)? {
            Some((refs, _)) if refs <= 1 => batch.delete_cf(cf, key.as_bytes()),
            Some((refs, bytes)) => {
                let mut value = Vec::with_capacity(8 + bytes.len());
                value.extend_from_slice(&(refs - 1).to_le_bytes());
                value.extend_from_slice(&bytes);
                batch.put_cf(cf, key.as_bytes(), value);
            }
            None => {}
        }
        Ok(())
    }

    /// Write the post-commit value of every tree entry the journal touched.
    fn write_tree_deltas(
        &self,
        batch: &mut WriteBatch,
        rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_kernels = self.cf_handle(CF_KERNELS)?;

        let mut utxos: BTreeSet<Commitment> = BTreeSet::new();
        let mut kernels: BTreeSet<Hash256> = BTreeSet::new();
        for op in rollback.ops() {
            match op {
                TreeOp::UtxoInserted { commitment } | TreeOp::UtxoRemoved { commitment, .. } => {
                    utxos.insert(*commitment);
                }
                TreeOp::KernelInserted { id } => {
                    kernels.insert(*id);
                }
            }
        }

        for commitment in &utxos {
            match trees.utxos.get(commitment) {
                Some(entry) => batch.put_cf(cf_utxos, commitment.0, encode(entry)?),
                None => batch.delete_cf(cf_utxos, commitment.0),
            }
        }
        for id in &kernels {
            if trees.kernels.contains(id) {
                batch.put_cf(cf_kernels, id.as_bytes(), b"");
            } else {
                batch.delete_cf(cf_kernels, id.as_bytes());
            }
        }
        Ok(())
    }

    fn has_children(&self, id: &StateId) -> Result<bool, LodeError> {
        Ok(!self.children(id)?.is_empty())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), LodeError> {
        self.db.write(batch).map_err(storage_err)
    }
}

impl NodeStore for RocksStore {
    fn insert_state(&mut self, record: &StateRecord) -> Result<(), LodeError> {
        let id = record.id();
        let mut batch = WriteBatch::default();
        self.put_state(&mut batch, record)?;
        batch.put_cf(self.cf_handle(CF_CHILDREN)?, Self::child_key(&record.parent(), &id), b"");
        let cf_tips = self.cf_handle(CF_TIPS)?;
        batch.delete_cf(cf_tips, Self::state_key(&record.parent()));
        if !self.has_children(&id)? {
            batch.put_cf(cf_tips, Self::state_key(&id), b"");
        }
        if record.active {
            batch.put_cf(self.cf_handle(CF_ACTIVE)?, id.height.to_be_bytes(), Self::state_key(&id));
        }
        self.write(batch)
    }

    fn get_state(&self, id: &StateId) -> Result<Option<StateRecord>, LodeError> {
        self.get(CF_STATES, &Self::state_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn delete_state(&mut self, id: &StateId) -> Result<(), LodeError> {
        let Some(record) = self.get_state(id)? else {
            return Ok(());
        };
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf_handle(CF_STATES)?, Self::state_key(id));
        let parent = record.parent();
        batch.delete_cf(self.cf_handle(CF_CHILDREN)?, Self::child_key(&parent, id));
        let cf_tips = self.cf_handle(CF_TIPS)?;
        batch.delete_cf(cf_tips, Self::state_key(id));
        if self.children(&parent)? == [*id] && self.contains_state(&parent)? {
            batch.put_cf(cf_tips, Self::state_key(&parent), b"");
        }
        if record.active && self.active_at(id.height)? == Some(*id) {
            batch.delete_cf(self.cf_handle(CF_ACTIVE)?, id.height.to_be_bytes());
        }
        if let Some(key) = record.body {
            self.release_body_ref(&mut batch, &key)?;
        }
        batch.delete_cf(self.cf_handle(CF_ROLLBACK)?, Self::state_key(id));
        self.write(batch)
    }

    fn children(&self, id: &StateId) -> Result<Vec<StateId>, LodeError> {
        let cf = self.cf_handle(CF_CHILDREN)?;
        let prefix = Self::state_key(id);
        let mut children = Vec::new();
        for item in self.db.prefix_iterator_cf(cf, prefix) {
            let (key, _) = item.map_err(storage_err)?;
            // prefix_iterator may overshoot
            if key.len() != 2 * STATE_KEY_LEN || key[..STATE_KEY_LEN] != prefix {
                break;
            }
            children.push(Self::decode_state_key(&key[STATE_KEY_LEN..])?);
        }
        Ok(children)
    }

    fn tips(&self) -> Result<Vec<StateId>, LodeError> {
        let cf = self.cf_handle(CF_TIPS)?;
        let mut tips = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(storage_err)?;
            tips.push(Self::decode_state_key(&key)?);
        }
        Ok(tips)
    }

    fn active_at(&self, height: u64) -> Result<Option<StateId>, LodeError> {
        self.get(CF_ACTIVE, &height.to_be_bytes())?
            .map(|bytes| Self::decode_state_key(&bytes))
            .transpose()
    }

    fn next_seq(&mut self) -> Result<u64, LodeError> {
        let seq = self.get_meta_u64(META_SEQ)? + 1;
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .put_cf(cf, META_SEQ, seq.to_le_bytes())
            .map_err(storage_err)?;
        Ok(seq)
    }

    fn state_count(&self) -> Result<usize, LodeError> {
        let cf = self.cf_handle(CF_STATES)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item.map_err(storage_err)?;
            count += 1;
        }
        Ok(count)
    }

    fn put_body(&mut self, id: &StateId, bytes: &[u8], peer: PeerId) -> Result<Hash256, LodeError> {
        let mut record = self.require_state(id)?;
        let mut batch = WriteBatch::default();
        let key = BodyArena::key(bytes);
        if record.body != Some(key) {
            self.add_body_ref(&mut batch, bytes)?;
            if let Some(old) = record.body.replace(key) {
                self.release_body_ref(&mut batch, &old)?;
            }
        }
        record.peer = peer;
        self.put_state(&mut batch, &record)?;
        self.write(batch)?;
        Ok(key)
    }

    fn get_body(&self, id: &StateId) -> Result<Option<Vec<u8>>, LodeError> {
        let Some(key) = self.get_state(id)?.and_then(|r| r.body) else {
            return Ok(None);
        };
        Ok(self.body_entry(&key)?.map(|(_, bytes)| bytes))
    }

    fn erase_body(&mut self, id: &StateId) -> Result<(), LodeError> {
        let mut record = self.require_state(id)?;
        let Some(key) = record.body.take() else {
            return Ok(());
        };
        let mut batch = WriteBatch::default();
        self.release_body_ref(&mut batch, &key)?;
        self.put_state(&mut batch, &record)?;
        self.write(batch)
    }

    fn get_rollback(&self, id: &StateId) -> Result<Option<RollbackData>, LodeError> {
        self.get(CF_ROLLBACK, &Self::state_key(id))?
            .map(|bytes| RollbackData::decode(&bytes).map_err(LodeError::from))
            .transpose()
    }

    fn commit_forward(
        &mut self,
        id: &StateId,
        history: Hash256,
        rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        let mut record = self.require_state(id)?;
        record.active = true;
        record.history = Some(history);

        let mut batch = WriteBatch::default();
        self.put_state(&mut batch, &record)?;
        batch.put_cf(self.cf_handle(CF_ACTIVE)?, id.height.to_be_bytes(), Self::state_key(id));
        batch.put_cf(self.cf_handle(CF_ROLLBACK)?, Self::state_key(id), rollback.encode()?);
        self.write_tree_deltas(&mut batch, rollback, trees)?;
        batch.put_cf(self.cf_handle(CF_METADATA)?, META_CURSOR, Self::state_key(id));
        self.write(batch)
    }

    fn commit_rollback(
        &mut self,
        id: &StateId,
        rollback: &RollbackData,
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        let mut record = self.require_state(id)?;
        record.active = false;
        record.history = None;

        let mut batch = WriteBatch::default();
        self.put_state(&mut batch, &record)?;
        batch.delete_cf(self.cf_handle(CF_ACTIVE)?, id.height.to_be_bytes());
        batch.delete_cf(self.cf_handle(CF_ROLLBACK)?, Self::state_key(id));
        self.write_tree_deltas(&mut batch, rollback, trees)?;
        batch.put_cf(
            self.cf_handle(CF_METADATA)?,
            META_CURSOR,
            Self::state_key(&record.parent()),
        );
        self.write(batch)
    }

    fn commit_import(
        &mut self,
        path: &[(StateId, Hash256)],
        trees: &LiveTrees,
    ) -> Result<(), LodeError> {
        let mut batch = WriteBatch::default();
        let cf_active = self.cf_handle(CF_ACTIVE)?;
        for (id, history) in path {
            let mut record = self.require_state(id)?;
            record.active = true;
            record.history = Some(*history);
            self.put_state(&mut batch, &record)?;
            batch.put_cf(cf_active, id.height.to_be_bytes(), Self::state_key(id));
        }

        // Replace the live trees wholesale.
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_kernels = self.cf_handle(CF_KERNELS)?;
        for item in self.db.iterator_cf(cf_utxos, IteratorMode::Start) {
            let (key, _) = item.map_err(storage_err)?;
            batch.delete_cf(cf_utxos, key);
        }
        for item in self.db.iterator_cf(cf_kernels, IteratorMode::Start) {
            let (key, _) = item.map_err(storage_err)?;
            batch.delete_cf(cf_kernels, key);
        }
        for (commitment, entry) in trees.utxos.iter() {
            batch.put_cf(cf_utxos, commitment.0, encode(entry)?);
        }
        for id in trees.kernels.iter() {
            batch.put_cf(cf_kernels, id.as_bytes(), b"");
        }

        if let Some((target, _)) = path.last() {
            let cf_meta = self.cf_handle(CF_METADATA)?;
            batch.put_cf(cf_meta, META_CURSOR, Self::state_key(target));
            batch.put_cf(cf_meta, META_FLOOR, target.height.to_le_bytes());
            batch.put_cf(cf_meta, META_FOSSIL_HEIGHT, target.height.to_le_bytes());
        }
        self.write(batch)
    }

    fn commit_fossil(&mut self, id: &StateId) -> Result<(), LodeError> {
        let mut record = self.require_state(id)?;
        let mut batch = WriteBatch::default();
        if let Some(key) = record.body.take() {
            self.release_body_ref(&mut batch, &key)?;
            self.put_state(&mut batch, &record)?;
        }
        batch.delete_cf(self.cf_handle(CF_ROLLBACK)?, Self::state_key(id));
        let fossil = self.fossil_height()?.max(id.height);
        batch.put_cf(self.cf_handle(CF_METADATA)?, META_FOSSIL_HEIGHT, fossil.to_le_bytes());
        self.write(batch)
    }

    fn cursor(&self) -> Result<StateId, LodeError> {
        match self.get(CF_METADATA, META_CURSOR)? {
            Some(bytes) => Self::decode_state_key(&bytes),
            None => Ok(StateId::ORIGIN),
        }
    }

    fn floor(&self) -> Result<u64, LodeError> {
        self.get_meta_u64(META_FLOOR)
    }

    fn fossil_height(&self) -> Result<u64, LodeError> {
        self.get_meta_u64(META_FOSSIL_HEIGHT)
    }

    fn load_live(&self) -> Result<LiveTrees, LodeError> {
        let mut trees = LiveTrees::new();
        for item in self.db.iterator_cf(self.cf_handle(CF_UTXOS)?, IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            let commitment: [u8; 32] = key.as_ref().try_into().map_err(storage_err)?;
            let entry: UtxoEntry = decode(&value)?;
            trees.utxos.insert(Commitment(commitment), entry);
        }
        for item in self.db.iterator_cf(self.cf_handle(CF_KERNELS)?, IteratorMode::Start) {
            let (key, _) = item.map_err(storage_err)?;
            let id: [u8; 32] = key.as_ref().try_into().map_err(storage_err)?;
            trees.kernels.insert(Hash256(id));
        }
        Ok(trees)
    }
}
