//! Block template assembly from the transaction pool.
//!
//! Selection is greedy by fee density: walk the pool from the most
//! profitable transaction down, admit whatever fits the remaining weight and
//! applies cleanly on top of what was already admitted. Rejected
//! transactions stay pooled; they may fit a later block.

use tracing::{debug, info};

use lode_core::constants::{BLOCK_SUBSIDY, COINBASE_WEIGHT};
use lode_core::crypto;
use lode_core::difficulty::{check_pow, moving_median, next_difficulty, work_for_target};
use lode_core::error::{BlockError, LodeError, TransactionError};
use lode_core::merkle::node_hash;
use lode_core::rollback::RollbackData;
use lode_core::traits::NodeStore;
use lode_core::txpool::TxPool;
use lode_core::types::{BlockBody, BlockHeader};

use crate::live::{apply_body, apply_tx};
use crate::processor::NodeProcessor;

/// A generated block, ready for proof of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBlock {
    pub header: BlockHeader,
    pub body: BlockBody,
    /// Sum of fees of the admitted transactions.
    pub fees: u64,
}

impl<S: NodeStore> NodeProcessor<S> {
    /// Assemble a block on top of the cursor.
    ///
    /// The live trees are used as scratch space and are back to their
    /// original state when this returns. The header's nonce is 0; the caller
    /// mines it (see [`mine_header`]).
    pub fn generate_new_block(
        &mut self,
        pool: &TxPool,
        timestamp: u64,
    ) -> Result<NewBlock, LodeError> {
        self.generate_new_block_with(BlockBody::default(), pool, timestamp)
    }

    /// Like [`generate_new_block`](Self::generate_new_block), but starting
    /// from `body`. Its elements come first and count toward fees and weight;
    /// pool transactions fill the remaining budget. `body` must not carry the
    /// coinbase and must apply on the cursor, otherwise this fails with
    /// [`LodeError::Block`].
    pub fn generate_new_block_with(
        &mut self,
        mut body: BlockBody,
        pool: &TxPool,
        timestamp: u64,
    ) -> Result<NewBlock, LodeError> {
        let height = self.cursor.height() + 1;
        let budget = self
            .config
            .max_block_weight
            .saturating_sub(COINBASE_WEIGHT);

        let mut used = body.weight();
        if used > budget {
            return Err(BlockError::Oversized { weight: used, max: budget }.into());
        }
        let mut fees = body.fee().ok_or(TransactionError::FeeOverflow)?;
        let mut admitted = 0usize;
        let mut journal = RollbackData::new();
        apply_body(&mut self.trees, &body, height, &mut journal)??;

        for element in pool.iter_by_profit() {
            if used + element.weight > budget {
                continue;
            }
            let (lo, hi) = element.tx.height_range();
            if height < lo || height > hi {
                continue;
            }
            let Some(total) = fees.checked_add(element.fee) else {
                continue;
            };
            // A body cannot both spend and create the same commitment.
            if element
                .tx
                .outputs
                .iter()
                .any(|o| body.inputs.iter().any(|i| i.commitment == o.commitment))
            {
                debug!(txid = %element.txid, "tx skipped: recreates an output spent in this block");
                continue;
            }
            match apply_tx(&mut self.trees, &element.tx, height, &mut journal)? {
                Ok(()) => {
                    body.merge(&element.tx);
                    fees = total;
                    used += element.weight;
                    admitted += 1;
                }
                Err(e) => debug!(txid = %element.txid, "tx skipped: {e}"),
            }
        }
        journal.undo(&mut self.trees)?;

        if let Some(key) = &self.coinbase_key {
            let (output, kernel) = crypto::coinbase(key, height);
            body.outputs.push(output);
            body.kernels.push(kernel);
            body.subsidy = BLOCK_SUBSIDY;
        }
        body.normalize();

        // Apply the final body the regular way to learn the new live root.
        let mut journal = RollbackData::new();
        apply_body(&mut self.trees, &body, height, &mut journal)??;
        let live_root = self.trees.live_root();
        journal.undo(&mut self.trees)?;

        let timestamps = self.ancestor_timestamps(&self.cursor.id)?;
        let parent_target = self
            .cursor
            .header
            .as_ref()
            .map_or(self.config.initial_difficulty, |h| h.difficulty);
        let difficulty = next_difficulty(
            height,
            parent_target,
            &timestamps,
            self.config.initial_difficulty,
        );
        let timestamp = timestamp.max(moving_median(&timestamps) + 1);

        let header = BlockHeader {
            height,
            prev: self.cursor.id.hash,
            chain_work: self
                .cursor
                .chain_work()
                .saturating_add(work_for_target(difficulty)),
            definition: node_hash(&self.cursor.history_next, &live_root),
            timestamp,
            difficulty,
            nonce: 0,
        };

        info!(
            height,
            txs = admitted,
            fees,
            weight = body.weight(),
            "block template generated"
        );
        Ok(NewBlock { header, body, fees })
    }
}

/// Search nonces `0..=max_nonce` for one satisfying the header's target.
pub fn mine_header(header: &mut BlockHeader, max_nonce: u64) -> bool {
    for nonce in 0..=max_nonce {
        header.nonce = nonce;
        if check_pow(header) {
            return true;
        }
    }
    false
}
