//! Error types for the Lode ledger.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
    #[error("no kernels")] NoKernels,
    #[error("{0} not in canonical order")] NotCanonical(&'static str),
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("duplicate output: {0}")] DuplicateOutput(String),
    #[error("duplicate kernel: {0}")] DuplicateKernel(String),
    #[error("input spends output of the same transaction: {0}")] SelfSpend(String),
    #[error("coinbase output outside a block body: {0}")] CoinbaseOutput(String),
    #[error("incubation too long: {got} > {max}")] IncubationTooLong { got: u64, max: u64 },
    #[error("oversized: weight {weight} > {max}")] Oversized { weight: u64, max: u64 },
    #[error("fee overflow")] FeeOverflow,
    #[error("empty lock window: {lo} > {hi}")] EmptyLockWindow { lo: u64, hi: u64 },
    #[error("invalid kernel {index}: {source}")] InvalidKernel { index: usize, source: CryptoError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid PoW")] InvalidPoW,
    #[error("invalid height 0")] ZeroHeight,
    #[error("first block must have zero prev hash")] InvalidPrev,
    #[error("difficulty too easy: got {got}, expected at most {expected}")] InvalidDifficulty { got: u64, expected: u64 },
    #[error("timestamp {timestamp} not after median {median}")] TimestampNotAfterMedian { timestamp: u64, median: u64 },
    #[error("invalid chain work: got {got}, expected {expected}")] InvalidChainWork { got: u128, expected: u128 },
    #[error("definition mismatch at {0}")] DefinitionMismatch(String),
    #[error("missing UTXO: {0}")] MissingUtxo(String),
    #[error("immature UTXO {commitment}: spendable at {maturity}, height {height}")] ImmatureUtxo { commitment: String, maturity: u64, height: u64 },
    #[error("duplicate output: {0}")] DuplicateOutput(String),
    #[error("duplicate kernel: {0}")] DuplicateKernel(String),
    #[error("kernel {kernel} not valid at height {height}")] KernelOutsideWindow { kernel: String, height: u64 },
    #[error("lock window does not cover heights {h0}..={h1}")] LockWindow { h0: u64, h1: u64 },
    #[error("invalid subsidy: got {got}, max {max}")] InvalidSubsidy { got: u64, max: u64 },
    #[error("coinbase output without subsidy")] UnexpectedCoinbase,
    #[error("subsidy without coinbase output")] MissingCoinbase,
    #[error("oversized: weight {weight} > {max}")] Oversized { weight: u64, max: u64 },
    #[error("rejected by verifier: {0}")] Rejected(String),
    #[error("body: {0}")] Body(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("transaction expired: threshold {threshold} <= height {height}")] Expired { threshold: u64, height: u64 },
    #[error("pool full: fee density below all {capacity} pooled transactions")] Full { capacity: usize },
    #[error("invalid transaction: {0}")] Invalid(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("state not found: {0}")] StateNotFound(String),
    #[error("rollback data missing for state: {0}")] RollbackMissing(String),
    #[error("body missing for state: {0}")] BodyMissing(String),
    #[error("undo failed: {0}")] UndoFailed(String),
    #[error("cannot roll back below floor {floor}")] BelowFloor { floor: u64 },
    #[error("invalid horizon: fossil depth {fossil} < branching depth {branching}")] InvalidHorizon { branching: u64, fossil: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacroBlockError {
    #[error("processor is not fresh")] NotFresh,
    #[error("target state unknown: {0}")] UnknownTarget(String),
    #[error("header ancestry incomplete below {0}")] AncestryIncomplete(String),
    #[error("tip mismatch: snapshot {snapshot}, target {target}")] TipMismatch { snapshot: String, target: String },
    #[error("duplicate UTXO: {0}")] DuplicateUtxo(String),
    #[error("duplicate kernel: {0}")] DuplicateKernel(String),
    #[error("history root mismatch")] HistoryMismatch,
    #[error("definition mismatch")] DefinitionMismatch,
}

#[derive(Error, Debug)]
pub enum LodeError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error(transparent)] MacroBlock(#[from] MacroBlockError),
    #[error("storage: {0}")] Storage(String),
    #[error("corrupted: {0}")] Corrupted(String),
}
