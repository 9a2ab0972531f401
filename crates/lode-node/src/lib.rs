//! # lode-node — Full node: RocksDB storage, configuration, work loop.
//!
//! Composes the Lode processor into a running node:
//! - [`storage::RocksStore`] — persistent [`NodeStore`](lode_core::traits::NodeStore) backed by RocksDB
//! - [`node::Node`] — single-consumer work loop over the processor and pool
//! - [`config::NodeConfig`] — node configuration

pub mod config;
pub mod node;
pub mod storage;

pub use config::{LogFormat, NodeConfig};
pub use node::{BootstrapBundle, Inbound, Node, NodeEvent, NodeStatus};
pub use storage::RocksStore;
