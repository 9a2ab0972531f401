//! Pool of pending transactions awaiting inclusion in a block.
//!
//! One owned collection of elements, indexed three ways by stable
//! [`ElementId`]s:
//! - identity (`txid`), for deduplication
//! - profit (fee density), for greedy block assembly and eviction
//! - height threshold, for expiry
//!
//! Every mutation updates the collection and all three indices together.
//!
//! Admission is context-free: the pool never looks at the UTXO set. A pooled
//! transaction may double-spend another or the committed state; the block
//! builder filters those out by tentative application.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::constants::DEFAULT_POOL_MAX_COUNT;
use crate::error::MempoolError;
use crate::types::{BlockBody, Hash256, Transaction};
use crate::validation::validate_transaction;

/// Stable handle of a pool element. Never reused within one pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

/// Fee-density key. Orders by `fee / weight` ascending, compared exactly by
/// cross-multiplication. Equal densities order by txid *descending*, so the
/// first key in ascending order is the one evicted first.
#[derive(Clone, Copy, Debug)]
pub struct Profit {
    pub fee: u64,
    pub weight: u64,
    pub txid: Hash256,
}

impl Ord for Profit {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = u128::from(self.fee) * u128::from(other.weight);
        let rhs = u128::from(other.fee) * u128::from(self.weight);
        lhs.cmp(&rhs).then_with(|| other.txid.cmp(&self.txid))
    }
}

impl PartialOrd for Profit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Profit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Profit {}

/// A pooled transaction with precomputed metadata.
#[derive(Debug, Clone)]
pub struct PoolElement {
    pub tx: Transaction,
    pub txid: Hash256,
    pub fee: u64,
    pub weight: u64,
    /// Smallest kernel `max_height`. Once the tip reaches this height the
    /// transaction can no longer be included.
    pub height_threshold: u64,
}

impl PoolElement {
    pub fn profit(&self) -> Profit {
        Profit {
            fee: self.fee,
            weight: self.weight,
            txid: self.txid,
        }
    }
}

/// Pending-transaction pool.
///
/// Not thread-safe; the node wraps it in a `Mutex` alongside the processor.
pub struct TxPool {
    elements: HashMap<ElementId, PoolElement>,
    by_tx: HashMap<Hash256, ElementId>,
    by_profit: BTreeSet<(Profit, ElementId)>,
    by_threshold: BTreeSet<(u64, ElementId)>,
    next_id: u64,
    max_count: usize,
}

impl TxPool {
    /// Create a pool whose [`capacity`](Self::capacity) is `max_count`.
    pub fn new(max_count: usize) -> Self {
        Self {
            elements: HashMap::new(),
            by_tx: HashMap::new(),
            by_profit: BTreeSet::new(),
            by_threshold: BTreeSet::new(),
            next_id: 0,
            max_count,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_POOL_MAX_COUNT)
    }

    /// Configured maximum element count, enforced by [`shrink_up_to`](Self::shrink_up_to).
    pub fn capacity(&self) -> usize {
        self.max_count
    }

    /// Validate and insert a transaction.
    ///
    /// `current_height` is the tip height; a transaction whose threshold is at
    /// or below it has already expired.
    pub fn add_tx(
        &mut self,
        mut tx: Transaction,
        current_height: u64,
    ) -> Result<Hash256, MempoolError> {
        tx.normalize();
        validate_transaction(&tx)?;

        let txid = tx.id()?;
        if self.by_tx.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_string()));
        }

        let (_, height_threshold) = tx.height_range();
        if height_threshold <= current_height {
            return Err(MempoolError::Expired {
                threshold: height_threshold,
                height: current_height,
            });
        }

        // validate_transaction already rejected fee overflow.
        let fee = tx.fee().unwrap_or(0);
        let element = PoolElement {
            weight: tx.weight(),
            tx,
            txid,
            fee,
            height_threshold,
        };

        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.by_tx.insert(txid, id);
        self.by_profit.insert((element.profit(), id));
        self.by_threshold.insert((height_threshold, id));
        self.elements.insert(id, element);

        debug!(%txid, fee, height_threshold, pool_size = self.elements.len(), "tx added to pool");
        Ok(txid)
    }

    /// Remove an element from the collection and every index.
    pub fn delete(&mut self, id: ElementId) -> Option<PoolElement> {
        let element = self.elements.remove(&id)?;
        self.by_tx.remove(&element.txid);
        self.by_profit.remove(&(element.profit(), id));
        self.by_threshold.remove(&(element.height_threshold, id));
        Some(element)
    }

    /// Remove a transaction by id.
    pub fn remove(&mut self, txid: &Hash256) -> Option<PoolElement> {
        let id = *self.by_tx.get(txid)?;
        self.delete(id)
    }

    /// Drop every element whose height threshold is at or below `height`.
    ///
    /// Returns the number removed.
    pub fn delete_out_of_bound(&mut self, height: u64) -> usize {
        let expired: Vec<ElementId> = self
            .by_threshold
            .iter()
            .take_while(|(threshold, _)| *threshold <= height)
            .map(|(_, id)| *id)
            .collect();
        for id in &expired {
            self.delete(*id);
        }
        if !expired.is_empty() {
            debug!(height, removed = expired.len(), "expired pool txs");
        }
        expired.len()
    }

    /// Evict lowest fee density first until at most `max_count` remain.
    ///
    /// Returns the number evicted.
    pub fn shrink_up_to(&mut self, max_count: usize) -> usize {
        let mut evicted = 0;
        while self.elements.len() > max_count {
            let Some(&(_, id)) = self.by_profit.iter().next() else {
                break;
            };
            self.delete(id);
            evicted += 1;
        }
        if evicted > 0 {
            debug!(max_count, evicted, "pool shrunk");
        }
        evicted
    }

    /// Drop pooled transactions that share a kernel with `body`.
    pub fn remove_confirmed(&mut self, body: &BlockBody) -> usize {
        let committed: HashSet<Hash256> = body.kernels.iter().map(|k| k.id()).collect();
        let confirmed: Vec<ElementId> = self
            .elements
            .iter()
            .filter(|(_, e)| e.tx.kernels.iter().any(|k| committed.contains(&k.id())))
            .map(|(id, _)| *id)
            .collect();
        for id in &confirmed {
            self.delete(*id);
        }
        confirmed.len()
    }

    /// Elements in descending fee density. Equal densities yield the smaller
    /// txid first.
    pub fn iter_by_profit(&self) -> impl Iterator<Item = &PoolElement> + '_ {
        self.by_profit
            .iter()
            .rev()
            .filter_map(|(_, id)| self.elements.get(id))
    }

    pub fn get(&self, txid: &Hash256) -> Option<&PoolElement> {
        self.by_tx.get(txid).and_then(|id| self.elements.get(id))
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.by_tx.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.by_tx.clear();
        self.by_profit.clear();
        self.by_threshold.clear();
    }

    #[cfg(test)]
    fn indices_consistent(&self) -> bool {
        self.by_tx.len() == self.elements.len()
            && self.by_profit.len() == self.elements.len()
            && self.by_threshold.len() == self.elements.len()
            && self.by_profit.iter().all(|(_, id)| self.elements.contains_key(id))
            && self.by_threshold.iter().all(|(_, id)| self.elements.contains_key(id))
    }
}

impl Default for TxPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}
