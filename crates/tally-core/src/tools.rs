//! Helpers over blocks and transactions shared by validation, the reward
//! schedule and the store.

use std::collections::HashSet;
use std::hash::Hash;

use crate::codec::nonce_bytes;
use crate::constants::NONCE_HEX_LENGTH;
use crate::error::{CodecError, TallyError, TransactionError};
use crate::traits::ChainView;
use crate::types::{Address, Block, Hash256, OutPoint, Transaction};

/// First item that appears twice, in iteration order.
pub fn first_duplicate<T, I>(items: I) -> Option<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items.into_iter().find(|item| !seen.insert(item.clone()))
}

/// Left-pad a hex difficulty to 64 characters.
pub fn format_difficulty(difficulty: &str) -> String {
    format!("{difficulty:0>width$}", width = NONCE_HEX_LENGTH)
}

/// Whether the nonce is exactly 64 hex characters.
pub fn is_nonce_well_formed(nonce: &str) -> bool {
    nonce.len() == NONCE_HEX_LENGTH && nonce_bytes(nonce).is_ok()
}

/// The block hash followed by every transaction hash, in block order.
pub fn block_new_hashes(block: &Block) -> Result<Vec<Hash256>, CodecError> {
    let mut hashes = Vec::with_capacity(block.transactions.len() + 1);
    hashes.push(block.hash()?);
    hashes.extend(block.transactions.iter().map(Transaction::hash));
    Ok(hashes)
}

/// Destination addresses of a transaction's P2PKH outputs.
pub fn output_addresses(tx: &Transaction) -> impl Iterator<Item = Address> + '_ {
    tx.outputs.iter().filter_map(|output| output.address())
}

/// Every output id claimed by the block's inputs.
pub fn block_claims(block: &Block) -> impl Iterator<Item = OutPoint> + '_ {
    block
        .transactions
        .iter()
        .flat_map(|tx| tx.inputs.iter().map(|input| input.previous_output))
}

/// Sum of the values of the outputs `tx` spends. Outputs are resolved
/// whether or not they are still unspent, so this also works for committed
/// transactions.
pub fn total_input(chain: &dyn ChainView, tx: &Transaction) -> Result<u64, TallyError> {
    let mut total = 0u64;
    for input in &tx.inputs {
        let record = chain
            .output_by_id(&input.previous_output)?
            .ok_or_else(|| TransactionError::UnknownUtxo(input.previous_output.to_string()))?;
        total = total
            .checked_add(record.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }
    Ok(total)
}

/// Inputs minus outputs. Zero for the reward transaction.
pub fn transaction_fee(chain: &dyn ChainView, tx: &Transaction) -> Result<u64, TallyError> {
    if tx.is_genesis() {
        return Ok(0);
    }
    let have = total_input(chain, tx)?;
    let need = tx.total_output().ok_or(TransactionError::ValueOverflow)?;
    have.checked_sub(need)
        .ok_or_else(|| TransactionError::InsufficientFunds { have, need }.into())
}

/// Sum of fees over all non-reward transactions of the block.
pub fn block_fee(chain: &dyn ChainView, block: &Block) -> Result<u64, TallyError> {
    let mut total = 0u64;
    for tx in block.transactions.iter().filter(|tx| !tx.is_genesis()) {
        total = total
            .checked_add(transaction_fee(chain, tx)?)
            .ok_or(TransactionError::ValueOverflow)?;
    }
    Ok(total)
}

/// Height the next block must carry.
pub fn next_block_height(chain: &dyn ChainView) -> Result<u64, TallyError> {
    Ok(chain.block_height()? + 1)
}
