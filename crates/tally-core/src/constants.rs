//! Ledger constants. All monetary values in base units (1 TALLY = 10^8 units).

use serde::{Deserialize, Serialize};

pub const COIN: u64 = 100_000_000;

/// Height of the implicit genesis block. It is never stored; the first
/// committed block sits at `GENESIS_HEIGHT + 1`.
pub const GENESIS_HEIGHT: u64 = 0;

/// Highest block height the running rule set knows how to validate.
///
/// Blocks above it are rejected by the system-version gate until the node is
/// upgraded.
pub const MAX_SUPPORTED_HEIGHT: u64 = 100_000_000;

/// Number of hex characters in a block nonce (32 bytes).
pub const NONCE_HEX_LENGTH: usize = 64;

/// Maximum encoded block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Maximum encoded transaction size in bytes.
pub const MAX_TRANSACTION_SIZE: usize = 16 * 1024;

/// Maximum encoded script size in bytes.
pub const MAX_SCRIPT_SIZE: usize = 1024;

/// Maximum number of transactions in one block, reward transaction included.
pub const MAX_BLOCK_TRANSACTIONS: usize = 600;

/// Block reward at height 1, before any halving.
pub const INITIAL_REWARD: u64 = 50 * COIN;

/// Number of blocks between reward halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Address version byte prepended before Base58Check encoding.
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of a public-key hash (RIPEMD-160 output).
pub const PUBKEY_HASH_LENGTH: usize = 20;

/// Length of an Ed25519 public key.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// Default proof target used by the fixed-target consensus: any hash passes.
pub const DEFAULT_TARGET: [u8; 32] = [0xff; 32];

/// Tunable limits the validation pipeline enforces.
///
/// Stores carry their own copy so tests and alternate networks can tighten or
/// relax them without touching the constants above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub max_supported_height: u64,
    pub max_block_size: usize,
    pub max_transaction_size: usize,
    pub max_script_size: usize,
    pub max_block_transactions: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            max_supported_height: MAX_SUPPORTED_HEIGHT,
            max_block_size: MAX_BLOCK_SIZE,
            max_transaction_size: MAX_TRANSACTION_SIZE,
            max_script_size: MAX_SCRIPT_SIZE,
            max_block_transactions: MAX_BLOCK_TRANSACTIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_follows_genesis() {
        assert_eq!(GENESIS_HEIGHT + 1, 1);
    }

    #[test]
    fn default_params_match_constants() {
        let params = ChainParams::default();
        assert_eq!(params.max_block_size, MAX_BLOCK_SIZE);
        assert_eq!(params.max_block_transactions, 600);
        assert!(params.max_script_size < params.max_transaction_size);
        assert!(params.max_transaction_size < params.max_block_size);
    }
}
