//! Context-free validation of transactions and block bodies.
//!
//! Nothing here touches the live trees. Contextual rules (UTXO existence,
//! maturity, kernel uniqueness) are enforced while applying a body in
//! `lode-processor`.

use std::cmp::Ordering;

use crate::constants::{BLOCK_SUBSIDY, MAX_INCUBATION, MAX_TX_WEIGHT};
use crate::crypto;
use crate::error::{BlockError, TransactionError};
use crate::types::{BlockBody, Commitment, Hash256, Input, Output, Transaction, TxKernel};

/// Validate transaction structure.
///
/// Checks:
/// - At least one kernel
/// - Inputs, outputs and kernels in canonical order with no duplicates
/// - No input spends an output of the same transaction
/// - No coinbase outputs, incubation within [`MAX_INCUBATION`]
/// - Weight within [`MAX_TX_WEIGHT`], fee sum does not overflow
/// - Non-empty lock window, every kernel signature valid
pub fn validate_transaction(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.kernels.is_empty() {
        return Err(TransactionError::NoKernels);
    }

    check_elements(&tx.inputs, &tx.outputs, &tx.kernels)?;

    if let Some(out) = tx.outputs.iter().find(|o| o.coinbase) {
        return Err(TransactionError::CoinbaseOutput(out.commitment.to_string()));
    }

    let weight = tx.weight();
    if weight > MAX_TX_WEIGHT {
        return Err(TransactionError::Oversized {
            weight,
            max: MAX_TX_WEIGHT,
        });
    }

    let (lo, hi) = tx.height_range();
    if lo > hi {
        return Err(TransactionError::EmptyLockWindow { lo, hi });
    }

    verify_kernels(&tx.kernels)
}

/// Validate a block body for inclusion at any height in `h0..=h1`.
///
/// Checks everything [`validate_transaction`] does on the aggregate, except
/// that coinbase outputs are allowed when `subsidy > 0`, plus:
/// - every kernel's lock window covers `h0..=h1`
/// - `subsidy <= BLOCK_SUBSIDY`
/// - a non-zero subsidy needs a coinbase output and vice versa
///
/// The weight budget is node configuration and is checked by the caller.
pub fn validate_body(body: &BlockBody, h0: u64, h1: u64) -> Result<(), BlockError> {
    check_elements(&body.inputs, &body.outputs, &body.kernels)?;

    if body.subsidy > BLOCK_SUBSIDY {
        return Err(BlockError::InvalidSubsidy {
            got: body.subsidy,
            max: BLOCK_SUBSIDY,
        });
    }
    let has_coinbase = body.outputs.iter().any(|o| o.coinbase);
    match (has_coinbase, body.subsidy > 0) {
        (true, false) => return Err(BlockError::UnexpectedCoinbase),
        (false, true) => return Err(BlockError::MissingCoinbase),
        _ => {}
    }

    if body.kernels.iter().any(|k| k.min_height > h0 || k.max_height < h1) {
        return Err(BlockError::LockWindow { h0, h1 });
    }

    verify_kernels(&body.kernels)?;
    Ok(())
}

fn check_elements(
    inputs: &[Input],
    outputs: &[Output],
    kernels: &[TxKernel],
) -> Result<(), TransactionError> {
    let input_keys: Vec<Commitment> = inputs.iter().map(|i| i.commitment).collect();
    check_canonical(&input_keys, "inputs", |c| {
        TransactionError::DuplicateInput(c.to_string())
    })?;

    let output_keys: Vec<Commitment> = outputs.iter().map(|o| o.commitment).collect();
    check_canonical(&output_keys, "outputs", |c| {
        TransactionError::DuplicateOutput(c.to_string())
    })?;

    let kernel_ids: Vec<Hash256> = kernels.iter().map(TxKernel::id).collect();
    check_canonical(&kernel_ids, "kernels", |id| {
        TransactionError::DuplicateKernel(id.to_string())
    })?;

    // Both lists are sorted, so a merge walk finds shared commitments.
    let (mut i, mut o) = (0, 0);
    while i < input_keys.len() && o < output_keys.len() {
        match input_keys[i].cmp(&output_keys[o]) {
            Ordering::Less => i += 1,
            Ordering::Greater => o += 1,
            Ordering::Equal => {
                return Err(TransactionError::SelfSpend(input_keys[i].to_string()));
            }
        }
    }

    if let Some(out) = outputs.iter().find(|o| o.incubation > MAX_INCUBATION) {
        return Err(TransactionError::IncubationTooLong {
            got: out.incubation,
            max: MAX_INCUBATION,
        });
    }

    if kernels
        .iter()
        .try_fold(0u64, |acc, k| acc.checked_add(k.fee))
        .is_none()
    {
        return Err(TransactionError::FeeOverflow);
    }
    Ok(())
}

fn check_canonical<T: Ord>(
    keys: &[T],
    what: &'static str,
    duplicate: impl Fn(&T) -> TransactionError,
) -> Result<(), TransactionError> {
    for pair in keys.windows(2) {
        match pair[0].cmp(&pair[1]) {
            Ordering::Less => {}
            Ordering::Equal => return Err(duplicate(&pair[0])),
            Ordering::Greater => return Err(TransactionError::NotCanonical(what)),
        }
    }
    Ok(())
}

fn verify_kernels(kernels: &[TxKernel]) -> Result<(), TransactionError> {
    for (index, kernel) in kernels.iter().enumerate() {
        crypto::verify_kernel(kernel)
            .map_err(|source| TransactionError::InvalidKernel { index, source })?;
    }
    Ok(())
}
