//! Retention policy: how deep forks may go and when history turns to fossil.
//!
//! After every tip change the processor calls [`NodeProcessor::prune_old`]:
//! - side branches diverging more than `branching_depth` below the tip are
//!   deleted outright (headers, bodies, rollback data)
//! - active blocks at depth `fossil_depth` or more lose their body reference
//!   and rollback journal; the header and history root stay
//!
//! `u64::MAX` disables either rule.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lode_core::error::{ChainStateError, LodeError};
use lode_core::traits::NodeStore;
use lode_core::types::StateId;

use crate::processor::NodeProcessor;

/// Depth thresholds. `fossil_depth >= branching_depth` always holds.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Horizon {
    pub branching_depth: u64,
    pub fossil_depth: u64,
}

impl Horizon {
    /// Keep everything.
    pub const fn disabled() -> Self {
        Self {
            branching_depth: u64::MAX,
            fossil_depth: u64::MAX,
        }
    }

    pub fn new(branching_depth: u64, fossil_depth: u64) -> Result<Self, ChainStateError> {
        let horizon = Self {
            branching_depth,
            fossil_depth,
        };
        horizon.validate()?;
        Ok(horizon)
    }

    pub fn validate(&self) -> Result<(), ChainStateError> {
        if self.fossil_depth < self.branching_depth {
            return Err(ChainStateError::InvalidHorizon {
                branching: self.branching_depth,
                fossil: self.fossil_depth,
            });
        }
        Ok(())
    }
}

impl Default for Horizon {
    fn default() -> Self {
        Self::disabled()
    }
}

impl<S: NodeStore> NodeProcessor<S> {
    /// Apply the retention policy relative to the current cursor.
    pub fn prune_old(&mut self) -> Result<(), LodeError> {
        let branches = self.prune_branches()?;
        let fossils = self.prune_fossils()?;
        if branches > 0 || fossils > 0 {
            info!(
                tip = %self.cursor.id,
                states_removed = branches,
                fossilized = fossils,
                "pruned old data"
            );
        }
        Ok(())
    }

    /// Erase the body reference and rollback journal of the active block at
    /// `height`. Returns `false` if there is no active block there.
    pub fn dereference_fossil_block(&mut self, height: u64) -> Result<bool, LodeError> {
        let Some(id) = self.store.active_at(height)? else {
            return Ok(false);
        };
        self.store.commit_fossil(&id)?;
        debug!(%id, "fossilized");
        Ok(true)
    }

    fn prune_branches(&mut self) -> Result<usize, LodeError> {
        let depth = self.config.horizon.branching_depth;
        if depth == u64::MAX {
            return Ok(0);
        }
        let Some(limit) = self.cursor.height().checked_sub(depth) else {
            return Ok(0);
        };

        let mut removed = 0;
        for tip in self.store.tips()? {
            let (branch, fork_height) = self.side_branch(&tip)?;
            if branch.is_empty() || fork_height >= limit {
                continue;
            }
            // Tip first; stop at a state another branch still hangs off.
            for id in &branch {
                if !self.store.children(id)?.is_empty() {
                    break;
                }
                self.store.delete_state(id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Inactive states from `tip` downward and the height they hang off
    /// (an active state, the origin, or a missing parent).
    fn side_branch(&self, tip: &StateId) -> Result<(Vec<StateId>, u64), LodeError> {
        let mut branch = Vec::new();
        let mut id = *tip;
        while !id.is_origin() {
            match self.store.get_state(&id)? {
                Some(record) if !record.active => {
                    branch.push(id);
                    id = record.parent();
                }
                _ => break,
            }
        }
        Ok((branch, id.height))
    }

    fn prune_fossils(&mut self) -> Result<usize, LodeError> {
        let depth = self.config.horizon.fossil_depth;
        if depth == u64::MAX {
            return Ok(0);
        }
        let Some(target) = self.cursor.height().checked_sub(depth) else {
            return Ok(0);
        };

        let mut count = 0;
        for height in self.store.fossil_height()? + 1..=target {
            if self.dereference_fossil_block(height)? {
                count += 1;
            }
        }
        Ok(count)
    }
}
