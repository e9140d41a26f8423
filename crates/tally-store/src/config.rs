//! Ledger configuration.
//!
//! Provides [`LedgerConfig`] with defaults for the data directory, chain
//! limits and the reference consensus/incentive parameters. Values can be
//! overridden from an optional TOML file and `TALLY_*` environment variables
//! (nested fields use `__`, e.g. `TALLY_CHAIN__MAX_BLOCK_SIZE`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tally_core::constants::{ChainParams, DEFAULT_TARGET, HALVING_INTERVAL, INITIAL_REWARD};
use tally_core::types::Hash256;

/// Configuration for a ledger instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "tally_store=trace").
    pub log_level: String,
    /// Validation limits.
    pub chain: ChainParams,
    /// Proof target for the fixed-target consensus.
    pub target: Hash256,
    pub initial_reward: u64,
    pub halving_interval: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally");

        Self {
            data_dir,
            log_level: "info".to_string(),
            chain: ChainParams::default(),
            target: Hash256(DEFAULT_TARGET),
            initial_reward: INITIAL_REWARD,
            halving_interval: HALVING_INTERVAL,
        }
    }
}

impl LedgerConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Defaults, then `file` (if given), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("TALLY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_log_level_is_info() {
        assert_eq!(LedgerConfig::default().log_level, "info");
    }

    #[test]
    fn default_data_dir_ends_with_tally() {
        let cfg = LedgerConfig::default();
        assert!(cfg.data_dir.ends_with("tally"), "data_dir should end with 'tally': {:?}", cfg.data_dir);
    }

    #[test]
    fn db_path_appends_chaindata() {
        let cfg = LedgerConfig {
            data_dir: PathBuf::from("/tmp/tally-test"),
            ..LedgerConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/tally-test/chaindata"));
    }

    #[test]
    fn load_from_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "data_dir = \"/var/lib/tally\"").unwrap();
        writeln!(file, "initial_reward = 1000").unwrap();
        writeln!(file, "[chain]").unwrap();
        writeln!(file, "max_block_transactions = 10").unwrap();
        drop(file);

        let cfg = LedgerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/tally"));
        assert_eq!(cfg.initial_reward, 1000);
        assert_eq!(cfg.chain.max_block_transactions, 10);
        assert_eq!(cfg.chain.max_block_size, ChainParams::default().max_block_size);
        assert_eq!(cfg.halving_interval, HALVING_INTERVAL);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LedgerConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
