//! Callbacks from the processor to its host.
//!
//! The processor never talks to the network itself. It reports what it needs
//! and whom it distrusts through [`NodeHooks`]; every method has a no-op
//! default so hosts implement only what they use. Hooks run synchronously on
//! the processor's thread and must return promptly.

use lode_core::error::BlockError;
use lode_core::types::{BlockBody, PeerId, StateId};
use lode_core::validation::validate_body;

use crate::cursor::Cursor;

/// A header or body the processor wants fetched.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRequest {
    pub id: StateId,
    /// `false` asks for the header, `true` for the body.
    pub want_body: bool,
    /// Peer that supplied related data and probably has this too.
    pub preferred_peer: Option<PeerId>,
}

pub trait NodeHooks: Send + Sync {
    /// Ask the host to fetch a header or body.
    fn request_data(&self, _request: &DataRequest) {}

    /// A peer supplied data that failed validation during application.
    fn on_peer_insane(&self, _peer: &PeerId) {}

    /// The cursor moved.
    fn on_new_state(&self, _cursor: &Cursor) {}

    /// Persisted state is inconsistent. The processor refuses to continue.
    fn on_corrupted(&self, _reason: &str) {}

    /// Context-free body check for a block at any height in `h0..=h1`.
    fn verify_block(&self, body: &BlockBody, h0: u64, h1: u64) -> Result<(), BlockError> {
        validate_body(body, h0, h1)
    }
}

/// Hooks that do nothing beyond the default body verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl NodeHooks for NoopHooks {}
