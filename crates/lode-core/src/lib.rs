//! # lode-core
//! Foundation types, commitment trees, rollback journal and transaction pool
//! for the Lode ledger.

pub mod constants;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod merkle;
pub mod rollback;
pub mod store;
pub mod traits;
pub mod trees;
pub mod txpool;
pub mod types;
pub mod validation;
