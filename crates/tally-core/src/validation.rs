//! Block and transaction validation pipeline.
//!
//! Checks run in a fixed order and the first failure aborts:
//!
//! **Block:** version gate, structure, size, height continuity, previous
//! hash, timestamp, new hashes, new addresses, double spend, consensus,
//! incentive, then every transaction.
//!
//! **Transaction:** structure, size, P2PKH templates, new hash, new
//! addresses, values, double spend, scripts.
//!
//! Rejections surface as [`BlockError`] / [`TransactionError`] inside
//! [`TallyError`]; storage faults from the [`ChainView`] propagate unchanged.

use std::collections::HashSet;

use crate::constants::{ChainParams, NONCE_HEX_LENGTH};
use crate::error::{BlockError, TallyError, TransactionError};
use crate::tools::{self, first_duplicate};
use crate::traits::{ChainView, Consensus, Incentive, VirtualMachine};
use crate::types::{Block, Hash256, Transaction, TransactionType};
use crate::vm;

/// Collaborators and limits the pipeline needs.
pub struct Validator<'a> {
    pub params: &'a ChainParams,
    pub consensus: &'a dyn Consensus,
    pub incentive: &'a dyn Incentive,
    pub vm: &'a dyn VirtualMachine,
}

/// Attach the transaction position to a transaction-level rejection.
fn in_block(index: usize, err: TallyError) -> TallyError {
    match err {
        TallyError::Transaction(source) => BlockError::TransactionError { index, source }.into(),
        other => other,
    }
}

impl Validator<'_> {
    /// Validate `block` as the next block on top of `chain`. `now_ms` is the
    /// wall clock in milliseconds since the Unix epoch.
    pub fn check_block(&self, chain: &dyn ChainView, block: &Block, now_ms: u64) -> Result<(), TallyError> {
        self.check_version(block)?;
        self.check_block_structure(block)?;
        self.check_block_size(block)?;

        let tail = chain.tail_block()?;
        check_height(tail.as_ref(), block)?;
        check_previous_hash(tail.as_ref(), block)?;
        check_timestamp(tail.as_ref(), block, now_ms)?;

        check_block_new_hashes(chain, block)?;
        check_block_new_addresses(chain, block)?;
        check_block_double_spend(chain, block)?;

        if !self.consensus.check_consensus(chain, block) {
            return Err(BlockError::ConsensusRejected.into());
        }
        if !self.incentive.check_incentive(chain, block) {
            return Err(BlockError::IncentiveRejected.into());
        }

        for (index, tx) in block.transactions.iter().enumerate() {
            self.check_transaction(chain, tx).map_err(|e| in_block(index, e))?;
        }
        Ok(())
    }

    /// Validate `tx` against the current unspent set.
    pub fn check_transaction(&self, chain: &dyn ChainView, tx: &Transaction) -> Result<(), TallyError> {
        check_transaction_structure(tx)?;
        self.check_transaction_size(tx)?;
        check_pay_to_public_key_hash(tx)?;
        check_transaction_new_hash(chain, tx)?;
        check_transaction_new_addresses(chain, tx)?;
        check_transaction_values(chain, tx)?;
        check_transaction_double_spend(chain, tx)?;
        self.check_scripts(chain, tx)
    }

    fn check_version(&self, block: &Block) -> Result<(), BlockError> {
        if block.height > self.params.max_supported_height {
            return Err(BlockError::UnsupportedVersion {
                height: block.height,
                max: self.params.max_supported_height,
            });
        }
        Ok(())
    }

    fn check_block_structure(&self, block: &Block) -> Result<(), TallyError> {
        let Some(first) = block.transactions.first() else {
            return Err(BlockError::Structure("block has no transactions".into()).into());
        };
        if block.transactions.len() > self.params.max_block_transactions {
            return Err(BlockError::Structure(format!(
                "{} transactions exceeds maximum {}",
                block.transactions.len(),
                self.params.max_block_transactions
            ))
            .into());
        }
        if !first.is_genesis() {
            return Err(BlockError::Structure("first transaction is not the reward transaction".into()).into());
        }
        if block.transactions.iter().skip(1).any(Transaction::is_genesis) {
            return Err(BlockError::Structure("multiple reward transactions".into()).into());
        }
        if !block.nonce.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BlockError::Structure("nonce is not hex".into()).into());
        }
        for (index, tx) in block.transactions.iter().enumerate() {
            check_transaction_structure(tx).map_err(|e| in_block(index, e))?;
        }
        Ok(())
    }

    fn check_block_size(&self, block: &Block) -> Result<(), TallyError> {
        if block.nonce.len() != NONCE_HEX_LENGTH {
            return Err(BlockError::InvalidNonceLength(block.nonce.len()).into());
        }
        for (index, tx) in block.transactions.iter().enumerate() {
            self.check_transaction_size(tx).map_err(|e| in_block(index, e))?;
        }
        let size = block.encoded_size()?;
        if size > self.params.max_block_size {
            return Err(BlockError::OversizedBlock { size, max: self.params.max_block_size }.into());
        }
        Ok(())
    }

    fn check_transaction_size(&self, tx: &Transaction) -> Result<(), TallyError> {
        let max = self.params.max_script_size;
        for (index, input) in tx.inputs.iter().enumerate() {
            let size = input.unlock_script.len();
            if size > max {
                let location = format!("input {index}");
                return Err(TransactionError::OversizedScript { location, size, max }.into());
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            let size = output.lock_script.len();
            if size > max {
                let location = format!("output {index}");
                return Err(TransactionError::OversizedScript { location, size, max }.into());
            }
        }
        let size = tx.encoded_size();
        if size > self.params.max_transaction_size {
            return Err(TransactionError::OversizedTransaction {
                size,
                max: self.params.max_transaction_size,
            }
            .into());
        }
        Ok(())
    }

    fn check_scripts(&self, chain: &dyn ChainView, tx: &Transaction) -> Result<(), TallyError> {
        for (index, input) in tx.inputs.iter().enumerate() {
            let spent = chain
                .unspent_output_by_id(&input.previous_output)?
                .ok_or_else(|| TransactionError::UnknownUtxo(input.previous_output.to_string()))?;
            vm::verify_spend(self.vm, tx, &input.unlock_script, &spent.output.lock_script)
                .map_err(|source| TransactionError::Script { index, source })?;
        }
        Ok(())
    }
}

// --- Block-level checks ---

fn check_height(tail: Option<&Block>, block: &Block) -> Result<(), BlockError> {
    let expected = tail.map_or(1, |t| t.height + 1);
    if block.height != expected {
        return Err(BlockError::HeightMismatch { expected, got: block.height });
    }
    Ok(())
}

fn check_previous_hash(tail: Option<&Block>, block: &Block) -> Result<(), TallyError> {
    let expected = match tail {
        Some(t) => t.hash()?,
        None => Hash256::ZERO,
    };
    if block.previous_hash != expected {
        return Err(BlockError::InvalidPrevHash {
            expected: expected.to_string(),
            got: block.previous_hash.to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_timestamp(tail: Option<&Block>, block: &Block, now_ms: u64) -> Result<(), BlockError> {
    if block.timestamp > now_ms {
        return Err(BlockError::TimestampInFuture(block.timestamp));
    }
    if let Some(t) = tail {
        if block.timestamp <= t.timestamp {
            return Err(BlockError::TimestampNotAfterParent);
        }
    }
    Ok(())
}

fn check_block_new_hashes(chain: &dyn ChainView, block: &Block) -> Result<(), TallyError> {
    let hashes = tools::block_new_hashes(block)?;
    if let Some(dup) = first_duplicate(hashes.iter().copied()) {
        return Err(BlockError::DuplicateHash(dup.to_string()).into());
    }
    for hash in &hashes {
        if chain.is_hash_used(hash)? {
            return Err(BlockError::HashAlreadyUsed(hash.to_string()).into());
        }
    }
    Ok(())
}

fn check_block_new_addresses(chain: &dyn ChainView, block: &Block) -> Result<(), TallyError> {
    let addresses: Vec<_> = block.transactions.iter().flat_map(tools::output_addresses).collect();
    if let Some(dup) = first_duplicate(addresses.iter().copied()) {
        return Err(BlockError::DuplicateAddress(dup.to_string()).into());
    }
    for address in &addresses {
        if chain.is_address_used(address)? {
            return Err(BlockError::AddressAlreadyUsed(address.to_string()).into());
        }
    }
    Ok(())
}

fn check_block_double_spend(chain: &dyn ChainView, block: &Block) -> Result<(), TallyError> {
    if let Some(dup) = first_duplicate(tools::block_claims(block)) {
        return Err(BlockError::DoubleSpend(dup.to_string()).into());
    }
    for (index, tx) in block.transactions.iter().enumerate() {
        check_transaction_double_spend(chain, tx).map_err(|e| in_block(index, e))?;
    }
    Ok(())
}

// --- Transaction-level checks ---

fn check_transaction_structure(tx: &Transaction) -> Result<(), TallyError> {
    match tx.transaction_type() {
        TransactionType::Genesis if tx.outputs.len() != 1 => Err(TransactionError::Structure(format!(
            "reward transaction must have exactly one output, has {}",
            tx.outputs.len()
        ))
        .into()),
        TransactionType::Standard if tx.outputs.is_empty() => {
            Err(TransactionError::Structure("transaction has no outputs".into()).into())
        }
        _ => Ok(()),
    }
}

fn check_pay_to_public_key_hash(tx: &Transaction) -> Result<(), TransactionError> {
    if let Some(index) = tx.outputs.iter().position(|o| !o.lock_script.is_p2pkh_lock()) {
        return Err(TransactionError::NotPayToPublicKeyHashLock(index));
    }
    if let Some(index) = tx.inputs.iter().position(|i| !i.unlock_script.is_p2pkh_unlock()) {
        return Err(TransactionError::NotPayToPublicKeyHashUnlock(index));
    }
    Ok(())
}

fn check_transaction_new_hash(chain: &dyn ChainView, tx: &Transaction) -> Result<(), TallyError> {
    let hash = tx.hash();
    if chain.is_hash_used(&hash)? {
        return Err(TransactionError::HashAlreadyUsed(hash.to_string()).into());
    }
    Ok(())
}

fn check_transaction_new_addresses(chain: &dyn ChainView, tx: &Transaction) -> Result<(), TallyError> {
    let mut seen = HashSet::new();
    for address in tools::output_addresses(tx) {
        if !seen.insert(address) {
            return Err(TransactionError::DuplicateAddress(address.to_string()).into());
        }
        if chain.is_address_used(&address)? {
            return Err(TransactionError::AddressAlreadyUsed(address.to_string()).into());
        }
    }
    Ok(())
}

fn check_transaction_values(chain: &dyn ChainView, tx: &Transaction) -> Result<(), TallyError> {
    if let Some(index) = tx.outputs.iter().position(|o| o.value == 0) {
        return Err(TransactionError::ZeroValueOutput(index).into());
    }
    let need = tx.total_output().ok_or(TransactionError::ValueOverflow)?;
    if tx.is_genesis() {
        return Ok(());
    }
    let have = tools::total_input(chain, tx)?;
    if have < need {
        return Err(TransactionError::InsufficientFunds { have, need }.into());
    }
    Ok(())
}

fn check_transaction_double_spend(chain: &dyn ChainView, tx: &Transaction) -> Result<(), TallyError> {
    let claims = tx.inputs.iter().map(|input| input.previous_output);
    if let Some(dup) = first_duplicate(claims) {
        return Err(TransactionError::DuplicateInput(dup.to_string()).into());
    }
    for input in &tx.inputs {
        if chain.unspent_output_height(&input.previous_output)?.is_none() {
            return Err(TransactionError::UnknownUtxo(input.previous_output.to_string()).into());
        }
    }
    Ok(())
}
