//! Ed25519 kernel signatures and coinbase construction.
//!
//! A kernel's excess is an Ed25519 public key; its signature covers
//! [`TxKernel::message`]. Signature checking is a black box to the rest of the
//! ledger: callers only see [`verify_kernel`] succeed or fail.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Commitment, Output, TxKernel};

/// Ed25519 keypair for signing kernels.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Raw public key bytes, used as the kernel excess.
    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// Build and sign a kernel with the given fee and lock window.
pub fn sign_kernel(key: &KeyPair, fee: u64, min_height: u64, max_height: u64) -> TxKernel {
    let mut kernel = TxKernel {
        excess: key.public_bytes(),
        signature: Vec::new(),
        fee,
        min_height,
        max_height,
    };
    kernel.signature = key.sign(&kernel.message()).to_vec();
    kernel
}

/// Verify a kernel's signature against its excess.
pub fn verify_kernel(kernel: &TxKernel) -> Result<(), CryptoError> {
    let vk = ed25519_dalek::VerifyingKey::from_bytes(&kernel.excess)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig_bytes: [u8; 64] = kernel
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    vk.verify(&kernel.message(), &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Coinbase output and kernel for a block at `height`.
///
/// The commitment is derived from the key and height, so each miner gets a
/// distinct output per height. The kernel is only valid at `height`.
pub fn coinbase(key: &KeyPair, height: u64) -> (Output, TxKernel) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"lode-coinbase");
    hasher.update(&key.public_bytes());
    hasher.update(&height.to_le_bytes());
    let output = Output {
        commitment: Commitment(hasher.finalize().into()),
        coinbase: true,
        incubation: 0,
    };
    (output, sign_kernel(key, 0, height, height))
}
