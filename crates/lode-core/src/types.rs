//! Core protocol types: headers, bodies, transactions, UTXO entries.
//!
//! Outputs are opaque commitments; amounts never appear in the clear. A
//! transaction proves balance through its kernels, whose signatures are
//! checked as black boxes (see [`crypto`](crate::crypto)).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::{INPUT_WEIGHT, KERNEL_WEIGHT, OUTPUT_WEIGHT};
use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for kernel ids, transaction ids and tree roots (BLAKE3) and for block
/// header hashes (double SHA-256).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Used as the parent of the first block and the empty root.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// BLAKE3 digest of arbitrary bytes.
    pub fn blake3(data: &[u8]) -> Self {
        Self(blake3::hash(data).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An output commitment. Key of the UTXO tree.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Commitment(pub [u8; 32]);

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Opaque identity of the peer that supplied a piece of data.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct PeerId(pub [u8; 32]);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell peers apart in logs.
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Identifies a chain state (a block header) by height and header hash.
///
/// Ordered by height first so that sorted collections of ids walk the chain
/// bottom-up.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct StateId {
    pub height: u64,
    pub hash: Hash256,
}

impl StateId {
    /// The state before the first block: height 0, zero hash.
    pub const ORIGIN: Self = Self {
        height: 0,
        hash: Hash256::ZERO,
    };

    pub fn new(height: u64, hash: Hash256) -> Self {
        Self { height, hash }
    }

    pub fn is_origin(&self) -> bool {
        *self == Self::ORIGIN
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, hex::encode(&self.hash.0[..8]))
    }
}

/// Spends the UTXO with the given commitment.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Input {
    pub commitment: Commitment,
}

/// Creates a UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct Output {
    pub commitment: Commitment,
    /// Minted by a block coinbase. Subject to [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY).
    pub coinbase: bool,
    /// Extra blocks the output must wait before it may be spent.
    pub incubation: u64,
}

/// A transaction kernel: the signed excess that proves a transaction balances.
///
/// Once a kernel is committed its id is recorded in the kernel tree, which
/// makes replaying the same transaction impossible. The kernel is only valid
/// in blocks whose height lies in `min_height..=max_height`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct TxKernel {
    /// Ed25519 public key of the excess.
    pub excess: [u8; 32],
    /// Ed25519 signature (64 bytes) over [`TxKernel::message`].
    pub signature: Vec<u8>,
    pub fee: u64,
    pub min_height: u64,
    pub max_height: u64,
}

impl TxKernel {
    /// Size of the signed message: excess || fee || min_height || max_height.
    pub const MESSAGE_SIZE: usize = 32 + 3 * 8;

    /// The message the excess key signs. Fixed little-endian layout.
    pub fn message(&self) -> [u8; Self::MESSAGE_SIZE] {
        let mut msg = [0u8; Self::MESSAGE_SIZE];
        msg[..32].copy_from_slice(&self.excess);
        msg[32..40].copy_from_slice(&self.fee.to_le_bytes());
        msg[40..48].copy_from_slice(&self.min_height.to_le_bytes());
        msg[48..56].copy_from_slice(&self.max_height.to_le_bytes());
        msg
    }

    /// Kernel id: BLAKE3 over the message followed by the signature.
    pub fn id(&self) -> Hash256 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.message());
        hasher.update(&self.signature);
        Hash256(hasher.finalize().into())
    }

    /// Whether the kernel may appear in a block at `height`.
    pub fn is_valid_at(&self, height: u64) -> bool {
        self.min_height <= height && height <= self.max_height
    }
}

/// A pending transaction.
///
/// Canonical form keeps inputs and outputs sorted by commitment and kernels
/// sorted by id; [`Transaction::normalize`] produces it.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub kernels: Vec<TxKernel>,
}

impl Transaction {
    /// Transaction id: BLAKE3 of the canonical bincode encoding.
    pub fn id(&self) -> Result<Hash256, TransactionError> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(Hash256::blake3(&encoded))
    }

    /// Sum of kernel fees. `None` on overflow.
    pub fn fee(&self) -> Option<u64> {
        self.kernels
            .iter()
            .try_fold(0u64, |acc, k| acc.checked_add(k.fee))
    }

    /// Abstract weight used for block budgeting and fee density.
    pub fn weight(&self) -> u64 {
        element_weight(self.inputs.len(), self.outputs.len(), self.kernels.len())
    }

    /// Heights at which every kernel is valid, as `(lo, hi)`.
    ///
    /// Empty when `lo > hi`.
    pub fn height_range(&self) -> (u64, u64) {
        self.kernels.iter().fold((0, u64::MAX), |(lo, hi), k| {
            (lo.max(k.min_height), hi.min(k.max_height))
        })
    }

    /// Sort all element lists into canonical order.
    pub fn normalize(&mut self) {
        self.inputs.sort_by(|a, b| a.commitment.cmp(&b.commitment));
        self.outputs.sort_by(|a, b| a.commitment.cmp(&b.commitment));
        self.kernels.sort_by_cached_key(TxKernel::id);
    }
}

fn element_weight(inputs: usize, outputs: usize, kernels: usize) -> u64 {
    inputs as u64 * INPUT_WEIGHT + outputs as u64 * OUTPUT_WEIGHT + kernels as u64 * KERNEL_WEIGHT
}

/// Aggregated body of a block.
///
/// Transactions lose their boundaries once merged: the body is a single set
/// of inputs, outputs and kernels plus the subsidy the coinbase claims.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockBody {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub kernels: Vec<TxKernel>,
    pub subsidy: u64,
}

impl BlockBody {
    /// Merge a transaction into the body.
    ///
    /// Cut-through: an input spending an output already present in the body
    /// removes that output and is itself dropped.
    pub fn merge(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            match self
                .outputs
                .iter()
                .position(|o| o.commitment == input.commitment && !o.coinbase)
            {
                Some(pos) => {
                    self.outputs.swap_remove(pos);
                }
                None => self.inputs.push(input.clone()),
            }
        }
        self.outputs.extend(tx.outputs.iter().cloned());
        self.kernels.extend(tx.kernels.iter().cloned());
    }

    /// Sort all element lists into canonical order.
    pub fn normalize(&mut self) {
        self.inputs.sort_by(|a, b| a.commitment.cmp(&b.commitment));
        self.outputs.sort_by(|a, b| a.commitment.cmp(&b.commitment));
        self.kernels.sort_by_cached_key(TxKernel::id);
    }

    /// Sum of kernel fees. `None` on overflow.
    pub fn fee(&self) -> Option<u64> {
        self.kernels
            .iter()
            .try_fold(0u64, |acc, k| acc.checked_add(k.fee))
    }

    pub fn weight(&self) -> u64 {
        element_weight(self.inputs.len(), self.outputs.len(), self.kernels.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.kernels.is_empty()
    }

    /// Canonical bincode encoding, as stored and transported.
    pub fn encode(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Decode a body, rejecting trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransactionError> {
        let (body, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        if read != bytes.len() {
            return Err(TransactionError::Serialization(format!(
                "{} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(body)
    }
}

/// Full block header (a chain "state").
///
/// Hash is computed as double SHA-256 over a fixed byte layout.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Height of this block. The first block is at height 1.
    pub height: u64,
    /// Hash of the parent header (zero for height 1).
    pub prev: Hash256,
    /// Accumulated work of the chain ending at this block.
    pub chain_work: u128,
    /// `node_hash(history through parent, live root after this block)`.
    pub definition: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Difficulty target. Higher is easier.
    pub difficulty: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing.
    const HASH_SIZE: usize = 8 + 32 + 16 + 32 + 3 * 8;

    /// Compute the header hash (double SHA-256).
    ///
    /// Layout: height || prev || chain_work || definition || timestamp ||
    /// difficulty || nonce, all little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.height.to_le_bytes());
        data.extend_from_slice(self.prev.as_bytes());
        data.extend_from_slice(&self.chain_work.to_le_bytes());
        data.extend_from_slice(self.definition.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }

    pub fn id(&self) -> StateId {
        StateId::new(self.height, self.hash())
    }

    /// Id of the parent state. [`StateId::ORIGIN`] for the first block.
    pub fn parent_id(&self) -> StateId {
        StateId::new(self.height.saturating_sub(1), self.prev)
    }
}

/// Spend-enabling metadata kept per unspent output.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    /// Height of the block that created the output.
    pub created: u64,
    /// First height at which the output may be spent.
    pub maturity: u64,
}
