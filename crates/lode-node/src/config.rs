//! Node configuration for the Lode full node.
//!
//! [`NodeConfig`] carries defaults for the data directory, logging and the
//! processor. [`NodeConfig::load`] layers an optional TOML file and `LODE_*`
//! environment variables (nested keys separated by `__`, e.g.
//! `LODE_PROCESSOR__HORIZON__BRANCHING_DEPTH=1440`) over those defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lode_core::constants::DEFAULT_POOL_MAX_COUNT;
use lode_core::error::LodeError;
use lode_processor::ProcessorConfig;

/// Log output format.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for a full node instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "lode_processor=trace").
    pub log_level: String,
    pub log_format: LogFormat,
    pub processor: ProcessorConfig,
    /// Transaction pool capacity.
    pub pool_max_count: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lode");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            processor: ProcessorConfig::default(),
            pool_max_count: DEFAULT_POOL_MAX_COUNT,
        }
    }
}

impl NodeConfig {
    /// Load from an optional TOML file, then `LODE_*` environment variables.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, LodeError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix("LODE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<NodeConfig>())
            .map_err(|e| LodeError::Storage(format!("config: {e}")))
    }

    /// Path to the RocksDB node data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("nodedata")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_log_level_is_info() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn default_data_dir_ends_with_lode() {
        let cfg = NodeConfig::default();
        assert!(
            cfg.data_dir.ends_with("lode"),
            "data_dir should end with 'lode': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn db_path_appends_nodedata() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/lode-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/lode-test/nodedata"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NodeConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.pool_max_count, DEFAULT_POOL_MAX_COUNT);
        assert_eq!(cfg.processor, ProcessorConfig::default());
    }

    #[test]
    fn file_overrides_nested_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lode.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\nlog_format = \"json\"\npool_max_count = 7\n\n\
             [processor]\nmax_block_weight = 500\n\n\
             [processor.horizon]\nbranching_depth = 10\nfossil_depth = 20"
        )
        .unwrap();

        let cfg = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.pool_max_count, 7);
        assert_eq!(cfg.processor.max_block_weight, 500);
        assert_eq!(cfg.processor.horizon.branching_depth, 10);
        assert_eq!(cfg.processor.horizon.fossil_depth, 20);
        assert_eq!(cfg.processor.initial_difficulty, ProcessorConfig::default().initial_difficulty);
    }
}
