//! Trait interfaces for the Tally ledger.
//!
//! These traits define the contracts between crates:
//! - [`ChainView`]: read-only ledger state (tally-store implements)
//! - [`Consensus`]: proof acceptance for candidate blocks
//! - [`Incentive`]: block reward acceptance
//! - [`VirtualMachine`]: script execution

use crate::error::{ScriptError, TallyError};
use crate::script::Script;
use crate::types::{Address, Block, Hash256, OutPoint, OutputRecord, Transaction, TransactionRecord};
use crate::vm::Stack;

/// Read-only view of committed ledger state.
///
/// Heights are 1-based; `0` means "nothing committed yet". The required
/// methods are point lookups on the store's indexes; the provided methods
/// compose them into the full query surface.
pub trait ChainView {
    /// Height of the tail block, `0` for an empty chain.
    fn block_height(&self) -> Result<u64, TallyError>;

    /// Number of committed transactions (the latest transaction height).
    fn transaction_count(&self) -> Result<u64, TallyError>;

    /// Number of committed outputs (the latest output height).
    fn output_count(&self) -> Result<u64, TallyError>;

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, TallyError>;

    fn block_height_by_hash(&self, hash: &Hash256) -> Result<Option<u64>, TallyError>;

    fn transaction_by_height(&self, height: u64) -> Result<Option<TransactionRecord>, TallyError>;

    fn transaction_height_by_hash(&self, hash: &Hash256) -> Result<Option<u64>, TallyError>;

    fn output_by_height(&self, height: u64) -> Result<Option<OutputRecord>, TallyError>;

    fn output_height_by_id(&self, id: &OutPoint) -> Result<Option<u64>, TallyError>;

    /// Output height of `id` if it is currently unspent.
    fn unspent_output_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError>;

    /// Output height of `id` if it has been spent.
    fn spent_output_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError>;

    /// Height of the transaction that created `id`.
    fn source_transaction_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError>;

    /// Height of the transaction that spent `id`.
    fn destination_transaction_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError>;

    fn address_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError>;

    fn address_unspent_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError>;

    fn address_spent_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError>;

    /// Whether `hash` names a committed block or transaction.
    fn is_hash_used(&self, hash: &Hash256) -> Result<bool, TallyError>;

    /// Whether `address` has ever received an output.
    fn is_address_used(&self, address: &Address) -> Result<bool, TallyError>;

    // --- Provided compositions ---

    fn tail_block(&self) -> Result<Option<Block>, TallyError> {
        match self.block_height()? {
            0 => Ok(None),
            height => self.block_by_height(height),
        }
    }

    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, TallyError> {
        match self.block_height_by_hash(hash)? {
            Some(height) => self.block_by_height(height),
            None => Ok(None),
        }
    }

    fn transaction_by_hash(&self, hash: &Hash256) -> Result<Option<TransactionRecord>, TallyError> {
        match self.transaction_height_by_hash(hash)? {
            Some(height) => self.transaction_by_height(height),
            None => Ok(None),
        }
    }

    fn output_by_id(&self, id: &OutPoint) -> Result<Option<OutputRecord>, TallyError> {
        lookup_output(self, self.output_height_by_id(id)?)
    }

    fn unspent_output_by_id(&self, id: &OutPoint) -> Result<Option<OutputRecord>, TallyError> {
        lookup_output(self, self.unspent_output_height(id)?)
    }

    fn spent_output_by_id(&self, id: &OutPoint) -> Result<Option<OutputRecord>, TallyError> {
        lookup_output(self, self.spent_output_height(id)?)
    }

    fn output_by_address(&self, address: &Address) -> Result<Option<OutputRecord>, TallyError> {
        lookup_output(self, self.address_output_height(address)?)
    }

    fn unspent_output_by_address(&self, address: &Address) -> Result<Option<OutputRecord>, TallyError> {
        lookup_output(self, self.address_unspent_output_height(address)?)
    }

    fn spent_output_by_address(&self, address: &Address) -> Result<Option<OutputRecord>, TallyError> {
        lookup_output(self, self.address_spent_output_height(address)?)
    }

    fn source_transaction(&self, id: &OutPoint) -> Result<Option<TransactionRecord>, TallyError> {
        match self.source_transaction_height(id)? {
            Some(height) => self.transaction_by_height(height),
            None => Ok(None),
        }
    }

    fn destination_transaction(&self, id: &OutPoint) -> Result<Option<TransactionRecord>, TallyError> {
        match self.destination_transaction_height(id)? {
            Some(height) => self.transaction_by_height(height),
            None => Ok(None),
        }
    }
}

fn lookup_output<V: ChainView + ?Sized>(
    view: &V,
    height: Option<u64>,
) -> Result<Option<OutputRecord>, TallyError> {
    match height {
        Some(height) => view.output_by_height(height),
        None => Ok(None),
    }
}

/// Proof acceptance for candidate blocks.
pub trait Consensus: Send + Sync {
    /// Whether `block` carries acceptable proof on top of `chain`.
    fn check_consensus(&self, chain: &dyn ChainView, block: &Block) -> bool;

    /// Difficulty expected of `block`, as 64 hex characters.
    fn calculate_difficulty(&self, chain: &dyn ChainView, block: &Block) -> String;
}

/// Block reward acceptance.
pub trait Incentive: Send + Sync {
    /// Whether the reward transaction of `block` claims an acceptable amount.
    fn check_incentive(&self, chain: &dyn ChainView, block: &Block) -> bool;
}

/// Script execution engine.
pub trait VirtualMachine: Send + Sync {
    /// Run `script` in the context of `tx` and return the final stack.
    fn execute_script(&self, tx: &Transaction, script: &Script) -> Result<Stack, ScriptError>;
}
