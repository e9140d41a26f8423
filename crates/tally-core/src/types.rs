//! Core ledger types: hashes, addresses, transactions, blocks and the
//! records the store hands back once they are committed.
//!
//! All monetary values are in base units (1 TALLY = 10^8 units).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::codec::{self, TxEncoding};
use crate::constants::{ADDRESS_VERSION, PUBKEY_HASH_LENGTH};
use crate::crypto::double_sha256;
use crate::error::{CodecError, CryptoError};
use crate::merkle;
use crate::script::Script;

/// A 32-byte double SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bincode::Encode, bincode::Decode)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// 32 zero bytes. The previous hash of the first block.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(s).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
        let got = bytes.len();
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidLength { expected: 32, got })?;
        Ok(Self(array))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({self})")
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A 20-byte public-key hash identifying the owner of an output.
///
/// Rendered as Base58Check: version byte, hash, then the first four bytes of
/// the double SHA-256 of both.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
pub struct Address(pub [u8; PUBKEY_HASH_LENGTH]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; PUBKEY_HASH_LENGTH] {
        &self.0
    }

    fn checksum(payload: &[u8]) -> [u8; 4] {
        let digest = double_sha256(payload);
        [digest.0[0], digest.0[1], digest.0[2], digest.0[3]]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(1 + PUBKEY_HASH_LENGTH + 4);
        payload.push(ADDRESS_VERSION);
        payload.extend_from_slice(&self.0);
        let checksum = Self::checksum(&payload);
        payload.extend_from_slice(&checksum);
        f.write_str(&bs58::encode(payload).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
        if bytes.len() != 1 + PUBKEY_HASH_LENGTH + 4 {
            return Err(CryptoError::InvalidAddress(format!("length {}", bytes.len())));
        }
        let (payload, checksum) = bytes.split_at(1 + PUBKEY_HASH_LENGTH);
        if Self::checksum(payload)[..] != *checksum {
            return Err(CryptoError::InvalidAddress("checksum mismatch".into()));
        }
        if payload[0] != ADDRESS_VERSION {
            return Err(CryptoError::InvalidAddress(format!("version {}", payload[0])));
        }
        let mut hash = [0u8; PUBKEY_HASH_LENGTH];
        hash.copy_from_slice(&payload[1..]);
        Ok(Self(hash))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifies one output: the hash of the transaction that created it and
/// its position in that transaction's outputs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode)]
pub struct OutPoint {
    pub transaction_hash: Hash256,
    pub index: u64,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_hash, self.index)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TransactionInput {
    pub previous_output: OutPoint,
    pub unlock_script: Script,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TransactionOutput {
    pub value: u64,
    pub lock_script: Script,
}

impl TransactionOutput {
    /// Pay `value` to `address` with a P2PKH lock script.
    pub fn to_address(value: u64, address: &Address) -> Self {
        Self { value, lock_script: Script::p2pkh_lock(address) }
    }

    /// Destination address, if the lock script is P2PKH.
    pub fn address(&self) -> Option<Address> {
        self.lock_script.p2pkh_address()
    }
}

/// Derived from the shape of a transaction, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// No inputs. Mints the block reward plus fees.
    Genesis,
    /// Spends one or more existing outputs.
    Standard,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

impl Transaction {
    /// Transaction identifier: double SHA-256 of the full encoding.
    pub fn hash(&self) -> Hash256 {
        double_sha256(&codec::encode_transaction(self, TxEncoding::Full))
    }

    /// Message every input signs: double SHA-256 of the encoding without
    /// unlock scripts.
    pub fn signing_hash(&self) -> Hash256 {
        double_sha256(&codec::encode_transaction(self, TxEncoding::Signing))
    }

    pub fn transaction_type(&self) -> TransactionType {
        if self.inputs.is_empty() {
            TransactionType::Genesis
        } else {
            TransactionType::Standard
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.transaction_type() == TransactionType::Genesis
    }

    /// Size of the full encoding in bytes.
    pub fn encoded_size(&self) -> usize {
        codec::encode_transaction(self, TxEncoding::Full).len()
    }

    /// Sum of output values. `None` on overflow.
    pub fn total_output(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    /// Output ids this transaction creates, in order.
    pub fn output_ids(&self) -> Vec<OutPoint> {
        let transaction_hash = self.hash();
        (0..self.outputs.len() as u64)
            .map(|index| OutPoint { transaction_hash, index })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Block {
    pub height: u64,
    pub previous_hash: Hash256,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// 32 bytes as 64 hex characters.
    pub nonce: String,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn merkle_root(&self) -> Hash256 {
        let hashes: Vec<Hash256> = self.transactions.iter().map(Transaction::hash).collect();
        merkle::merkle_root(&hashes)
    }

    /// `dsha256(timestamp ‖ previous hash ‖ merkle root ‖ nonce)`.
    ///
    /// Fails only if the nonce is not 32 bytes of hex.
    pub fn hash(&self) -> Result<Hash256, CodecError> {
        let nonce = codec::nonce_bytes(&self.nonce)?;
        let mut data = Vec::with_capacity(8 + 32 + 32 + 32);
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(self.previous_hash.as_bytes());
        data.extend_from_slice(self.merkle_root().as_bytes());
        data.extend_from_slice(&nonce);
        Ok(double_sha256(&data))
    }

    pub fn encoded_size(&self) -> Result<usize, CodecError> {
        Ok(codec::encode_block(self)?.len())
    }

    pub fn output_count(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.outputs.len() as u64).sum()
    }

    pub fn transaction_count(&self) -> u64 {
        self.transactions.len() as u64
    }
}

/// A committed transaction with its chain position.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub hash: Hash256,
    /// 1-based chain-wide sequence number.
    pub transaction_height: u64,
    pub block_height: u64,
    pub index_in_block: u64,
}

/// A committed output with its chain position.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct OutputRecord {
    pub id: OutPoint,
    pub output: TransactionOutput,
    pub address: Address,
    /// 1-based chain-wide sequence number.
    pub output_height: u64,
    pub transaction_height: u64,
    pub block_height: u64,
}
