//! Contextual application of bodies and transactions to the live trees.
//!
//! Application is all-or-nothing: on the first failing element every
//! mutation made so far is undone from the journal before returning.

use lode_core::constants::COINBASE_MATURITY;
use lode_core::error::{BlockError, ChainStateError};
use lode_core::rollback::RollbackData;
use lode_core::trees::LiveTrees;
use lode_core::types::{BlockBody, Input, Output, Transaction, TxKernel, UtxoEntry};

/// Outcome of validating data against the chain: `Err` means the data is
/// invalid, as opposed to the outer `Result` which reports node failures.
pub type Verdict = Result<(), BlockError>;

/// Apply a block body at `height`, recording mutations in `journal`.
pub fn apply_body(
    trees: &mut LiveTrees,
    body: &BlockBody,
    height: u64,
    journal: &mut RollbackData,
) -> Result<Verdict, ChainStateError> {
    apply_atomically(trees, journal, |trees, journal| {
        apply_elements(trees, journal, &body.inputs, &body.outputs, &body.kernels, height)
    })
}

/// Apply a single transaction at `height`, recording mutations in `journal`.
pub fn apply_tx(
    trees: &mut LiveTrees,
    tx: &Transaction,
    height: u64,
    journal: &mut RollbackData,
) -> Result<Verdict, ChainStateError> {
    apply_atomically(trees, journal, |trees, journal| {
        apply_elements(trees, journal, &tx.inputs, &tx.outputs, &tx.kernels, height)
    })
}

fn apply_atomically(
    trees: &mut LiveTrees,
    journal: &mut RollbackData,
    apply: impl FnOnce(&mut LiveTrees, &mut RollbackData) -> Verdict,
) -> Result<Verdict, ChainStateError> {
    let mark = journal.len();
    let verdict = apply(trees, journal);
    if verdict.is_err() {
        journal.undo_to(trees, mark)?;
    }
    Ok(verdict)
}

fn apply_elements(
    trees: &mut LiveTrees,
    journal: &mut RollbackData,
    inputs: &[Input],
    outputs: &[Output],
    kernels: &[TxKernel],
    height: u64,
) -> Verdict {
    for input in inputs {
        let entry = journal
            .remove_utxo(trees, &input.commitment)
            .ok_or_else(|| BlockError::MissingUtxo(input.commitment.to_string()))?;
        if entry.maturity > height {
            return Err(BlockError::ImmatureUtxo {
                commitment: input.commitment.to_string(),
                maturity: entry.maturity,
                height,
            });
        }
    }

    for output in outputs {
        let lock = if output.coinbase { COINBASE_MATURITY } else { 0 };
        let entry = UtxoEntry {
            created: height,
            maturity: height.saturating_add(lock).saturating_add(output.incubation),
        };
        if !journal.insert_utxo(trees, output.commitment, entry) {
            return Err(BlockError::DuplicateOutput(output.commitment.to_string()));
        }
    }

    for kernel in kernels {
        let id = kernel.id();
        if !kernel.is_valid_at(height) {
            return Err(BlockError::KernelOutsideWindow {
                kernel: id.to_string(),
                height,
            });
        }
        if !journal.insert_kernel(trees, id) {
            return Err(BlockError::DuplicateKernel(id.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::crypto::{sign_kernel, KeyPair};
    use lode_core::types::Commitment;

    fn c(seed: u8) -> Commitment {
        Commitment([seed; 32])
    }

    fn out(seed: u8) -> Output {
        Output { commitment: c(seed), coinbase: false, incubation: 0 }
    }

    fn kernel(seed: u8, min: u64, max: u64) -> TxKernel {
        sign_kernel(&KeyPair::from_secret_bytes([seed; 32]), 1, min, max)
    }

    fn funded() -> LiveTrees {
        let mut trees = LiveTrees::new();
        trees.utxos.insert(c(1), UtxoEntry { created: 1, maturity: 1 });
        trees
    }

    #[test]
    fn applies_spend_and_records_journal() {
        let mut trees = funded();
        let mut journal = RollbackData::new();
        let tx = Transaction {
            inputs: vec![Input { commitment: c(1) }],
            outputs: vec![out(2)],
            kernels: vec![kernel(1, 0, 10)],
        };
        assert_eq!(apply_tx(&mut trees, &tx, 5, &mut journal).unwrap(), Ok(()));
        assert!(!trees.utxos.contains(&c(1)));
        assert_eq!(trees.utxos.get(&c(2)), Some(&UtxoEntry { created: 5, maturity: 5 }));
        assert_eq!(journal.len(), 3);
    }

    #[test]
    fn missing_input_leaves_trees_untouched() {
        let mut trees = funded();
        let before = trees.clone();
        let mut journal = RollbackData::new();
        let body = BlockBody {
            inputs: vec![Input { commitment: c(1) }, Input { commitment: c(9) }],
            outputs: vec![out(2)],
            ..BlockBody::default()
        };
        let verdict = apply_body(&mut trees, &body, 5, &mut journal).unwrap();
        assert!(matches!(verdict, Err(BlockError::MissingUtxo(_))));
        assert_eq!(trees, before);
        assert!(journal.is_empty());
    }

    #[test]
    fn immature_coinbase_rejected() {
        let mut trees = LiveTrees::new();
        let mut journal = RollbackData::new();
        let coinbase = BlockBody {
            outputs: vec![Output { commitment: c(3), coinbase: true, incubation: 0 }],
            ..BlockBody::default()
        };
        apply_body(&mut trees, &coinbase, 1, &mut journal).unwrap().unwrap();
        let maturity = 1 + COINBASE_MATURITY;

        let spend = BlockBody { inputs: vec![Input { commitment: c(3) }], ..BlockBody::default() };
        let verdict = apply_body(&mut trees, &spend, maturity - 1, &mut journal).unwrap();
        assert!(matches!(verdict, Err(BlockError::ImmatureUtxo { .. })));
        assert!(trees.utxos.contains(&c(3)));
        assert_eq!(apply_body(&mut trees, &spend, maturity, &mut journal).unwrap(), Ok(()));
    }

    #[test]
    fn incubation_delays_maturity() {
        let mut trees = LiveTrees::new();
        let mut journal = RollbackData::new();
        let body = BlockBody {
            outputs: vec![Output { commitment: c(4), coinbase: false, incubation: 7 }],
            ..BlockBody::default()
        };
        apply_body(&mut trees, &body, 10, &mut journal).unwrap().unwrap();
        assert_eq!(trees.utxos.get(&c(4)).map(|e| e.maturity), Some(17));
    }

    #[test]
    fn duplicate_output_rejected() {
        let mut trees = funded();
        let mut journal = RollbackData::new();
        let body = BlockBody { outputs: vec![out(1)], ..BlockBody::default() };
        let verdict = apply_body(&mut trees, &body, 2, &mut journal).unwrap();
        assert!(matches!(verdict, Err(BlockError::DuplicateOutput(_))));
    }

    #[test]
    fn kernel_replay_rejected() {
        let mut trees = LiveTrees::new();
        let mut journal = RollbackData::new();
        let body = BlockBody { kernels: vec![kernel(5, 0, 100)], ..BlockBody::default() };
        apply_body(&mut trees, &body, 2, &mut journal).unwrap().unwrap();
        let verdict = apply_body(&mut trees, &body, 3, &mut journal).unwrap();
        assert!(matches!(verdict, Err(BlockError::DuplicateKernel(_))));
    }

    #[test]
    fn kernel_outside_window_rejected() {
        let mut trees = LiveTrees::new();
        let mut journal = RollbackData::new();
        let body = BlockBody { kernels: vec![kernel(6, 5, 6)], ..BlockBody::default() };
        let verdict = apply_body(&mut trees, &body, 7, &mut journal).unwrap();
        assert!(matches!(verdict, Err(BlockError::KernelOutsideWindow { height: 7, .. })));
        assert!(trees.is_empty());
    }

    #[test]
    fn journal_undo_reverts_applied_body() {
        let mut trees = funded();
        let before = trees.live_root();
        let mut journal = RollbackData::new();
        let body = BlockBody {
            inputs: vec![Input { commitment: c(1) }],
            outputs: vec![out(2), out(3)],
            kernels: vec![kernel(1, 0, 10)],
            subsidy: 0,
        };
        apply_body(&mut trees, &body, 4, &mut journal).unwrap().unwrap();
        journal.undo(&mut trees).unwrap();
        assert_eq!(trees.live_root(), before);
    }
}
