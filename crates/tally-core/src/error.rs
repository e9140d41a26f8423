//! Error types for the Tally ledger.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated input: need {need} bytes at offset {offset}, have {have}")] Truncated { offset: usize, need: usize, have: usize },
    #[error("{0} trailing bytes after decoded value")] TrailingBytes(usize),
    #[error("invalid field length: expected {expected}, got {got}")] InvalidLength { expected: usize, got: usize },
    #[error("invalid nonce: {0}")] InvalidNonce(String),
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("record: {0}")] Record(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("invalid address: {0}")] InvalidAddress(String),
}

/// Faults raised while executing a script. Returned as values, never panics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("malformed script: {0}")] Malformed(String),
    #[error("unknown opcode 0x{0:02x}")] UnknownOpcode(u8),
    #[error("opcode element must be one byte, got {0}")] InvalidOpcodeLength(usize),
    #[error("PUSHDATA without operand")] MissingPushData,
    #[error("stack underflow in {opcode}: need {need}, have {have}")] StackUnderflow { opcode: &'static str, need: usize, have: usize },
    #[error("EQUALVERIFY failed")] EqualVerifyFailed,
    #[error("CHECKSIG failed: {0}")] CheckSigFailed(CryptoError),
    #[error("script did not leave exactly TRUE on the stack (depth {depth})")] NotTrue { depth: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("invalid structure: {0}")] Structure(String),
    #[error("oversized transaction: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("oversized script at {location}: {size} > {max}")] OversizedScript { location: String, size: usize, max: usize },
    #[error("output {0} lock script is not pay-to-public-key-hash")] NotPayToPublicKeyHashLock(usize),
    #[error("input {0} unlock script is not pay-to-public-key-hash")] NotPayToPublicKeyHashUnlock(usize),
    #[error("transaction hash already used: {0}")] HashAlreadyUsed(String),
    #[error("duplicate output address: {0}")] DuplicateAddress(String),
    #[error("address already used: {0}")] AddressAlreadyUsed(String),
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("value overflow")] ValueOverflow,
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("unknown or spent output: {0}")] UnknownUtxo(String),
    #[error("script failed on input {index}: {source}")] Script { index: usize, source: ScriptError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("height {height} above supported maximum {max}")] UnsupportedVersion { height: u64, max: u64 },
    #[error("invalid structure: {0}")] Structure(String),
    #[error("invalid nonce length: {0}")] InvalidNonceLength(usize),
    #[error("oversized: {size} > {max}")] OversizedBlock { size: usize, max: usize },
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("invalid prev hash: expected {expected}, got {got}")] InvalidPrevHash { expected: String, got: String },
    #[error("timestamp {0} is in the future")] TimestampInFuture(u64),
    #[error("timestamp not after parent")] TimestampNotAfterParent,
    #[error("duplicate hash in block: {0}")] DuplicateHash(String),
    #[error("hash already used: {0}")] HashAlreadyUsed(String),
    #[error("duplicate output address in block: {0}")] DuplicateAddress(String),
    #[error("address already used: {0}")] AddressAlreadyUsed(String),
    #[error("double spend across transactions: {0}")] DoubleSpend(String),
    #[error("rejected by consensus")] ConsensusRejected,
    #[error("rejected by incentive")] IncentiveRejected,
    #[error("tx error in {index}: {source}")] TransactionError { index: usize, source: TransactionError },
}

#[derive(Error, Debug)]
pub enum TallyError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error("storage: {0}")] Storage(String),
}

impl TallyError {
    /// True for validation rejections, false for storage and codec faults.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Block(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_classification() {
        let rejected: TallyError = BlockError::ConsensusRejected.into();
        assert!(rejected.is_rejection());
        let rejected: TallyError = TransactionError::ValueOverflow.into();
        assert!(rejected.is_rejection());
        assert!(!TallyError::Storage("io".into()).is_rejection());
        let codec: TallyError = CodecError::TrailingBytes(3).into();
        assert!(!codec.is_rejection());
    }

    #[test]
    fn nested_script_error_message() {
        let err = BlockError::TransactionError {
            index: 2,
            source: TransactionError::Script { index: 0, source: ScriptError::EqualVerifyFailed },
        };
        assert_eq!(err.to_string(), "tx error in 2: script failed on input 0: EQUALVERIFY failed");
    }
}
