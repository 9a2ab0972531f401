//! # lode-processor — Chain selection, reorgs, pruning and block building.
//!
//! [`NodeProcessor`] owns the live UTXO and kernel trees and drives them
//! along the heaviest known branch of a [`NodeStore`](lode_core::traits::NodeStore).
//! The host feeds it headers and bodies, receives notifications through
//! [`NodeHooks`], and asks it for block templates and snapshots.

pub mod builder;
pub mod congestion;
pub mod cursor;
pub mod hooks;
pub mod horizon;
pub mod live;
pub mod macroblock;
pub mod processor;

pub use builder::{mine_header, NewBlock};
pub use cursor::Cursor;
pub use hooks::{DataRequest, NodeHooks, NoopHooks};
pub use horizon::Horizon;
pub use live::Verdict;
pub use macroblock::MacroBlock;
pub use processor::{check_header_context, DataStatus, NodeProcessor, ProcessorConfig};
