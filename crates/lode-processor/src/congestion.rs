//! Missing-data tracking for branches that would improve the tip.
//!
//! The processor keeps no timers. The host calls
//! [`NodeProcessor::enum_congestions`] periodically (and after new data
//! arrives); every call recomputes what is missing from the stored headers
//! and re-issues the requests.

use std::collections::BTreeSet;

use tracing::debug;

use lode_core::error::LodeError;
use lode_core::store::StateRecord;
use lode_core::traits::NodeStore;
use lode_core::types::StateId;

use crate::hooks::DataRequest;
use crate::processor::NodeProcessor;

/// Where a branch stops when walking down from its tip.
enum BranchBase {
    /// Reached the active chain (or the origin) at this state.
    Connected(StateId),
    /// The parent of the lowest known header is not stored.
    Missing(StateId),
}

impl<S: NodeStore> NodeProcessor<S> {
    /// Requests needed to complete every branch heavier than the cursor.
    ///
    /// A disconnected branch asks for the parent header of its lowest known
    /// state; a connected one asks for the lowest missing body. Each request
    /// is also passed to [`NodeHooks::request_data`].
    ///
    /// [`NodeHooks::request_data`]: crate::hooks::NodeHooks::request_data
    pub fn enum_congestions(&self) -> Result<Vec<DataRequest>, LodeError> {
        let retained = self.lowest_retained_height()?;
        let min_fork = self.lowest_rollback_height()?;
        let work = self.cursor.chain_work();
        let mut requests = BTreeSet::new();

        for tip in self.store.tips()? {
            let Some(tip_record) = self.store.get_state(&tip)? else {
                continue;
            };
            if tip_record.active || tip.height <= retained || tip_record.header.chain_work <= work {
                continue;
            }

            let (branch, base) = self.branch_down(tip_record)?;
            let Some(lowest) = branch.last() else {
                continue;
            };
            match base {
                // Claimed work is unchecked here; only a header is fetched,
                // and the branch is verified once it connects.
                BranchBase::Missing(parent) => {
                    if parent.height > retained {
                        requests.insert(DataRequest {
                            id: parent,
                            want_body: false,
                            preferred_peer: Some(lowest.peer),
                        });
                    }
                }
                BranchBase::Connected(fork) => {
                    if fork.height < min_fork {
                        continue;
                    }
                    if let Some(record) = branch.iter().rev().find(|r| !r.has_body()) {
                        requests.insert(DataRequest {
                            id: record.id(),
                            want_body: true,
                            preferred_peer: Some(record.peer),
                        });
                    }
                }
            }
        }

        let requests: Vec<_> = requests.into_iter().collect();
        for request in &requests {
            self.hooks.request_data(request);
        }
        if !requests.is_empty() {
            debug!(count = requests.len(), "congestions enumerated");
        }
        Ok(requests)
    }

    /// Inactive records from `tip` downward (tip first) and where the walk
    /// stopped.
    fn branch_down(&self, tip: StateRecord) -> Result<(Vec<StateRecord>, BranchBase), LodeError> {
        let mut parent = tip.parent();
        let mut branch = vec![tip];
        loop {
            if parent.is_origin() {
                return Ok((branch, BranchBase::Connected(parent)));
            }
            match self.store.get_state(&parent)? {
                None => return Ok((branch, BranchBase::Missing(parent))),
                Some(record) if record.active => {
                    return Ok((branch, BranchBase::Connected(parent)));
                }
                Some(record) => {
                    parent = record.parent();
                    branch.push(record);
                }
            }
        }
    }
}
