//! BLAKE3 Merkle hashing for commitment roots and header history.
//!
//! Domain-separated:
//! - Leaf hash: `BLAKE3(0x00 || data)`
//! - Internal node: `BLAKE3(0x01 || left || right)`
//!
//! Odd-length layers are padded by duplicating the last element.
//! Empty trees produce [`Hash256::ZERO`].

use crate::types::Hash256;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// `BLAKE3(0x00 || data)`.
pub fn leaf_hash(data: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(data.as_bytes());
    Hash256(hasher.finalize().into())
}

/// `BLAKE3(0x01 || left || right)`.
///
/// Also used outside the trees to chain roots together: the header history
/// accumulator and the block definition are both node hashes.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Merkle root over an ordered list of leaf values.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut current: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();
    while current.len() > 1 {
        current = current
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                [single] => node_hash(single, single),
                _ => unreachable!("chunks(2) yields one or two elements"),
            })
            .collect();
    }
    current[0]
}
