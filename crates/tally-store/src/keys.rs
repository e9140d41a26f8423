//! Key layout of the ledger indexes.
//!
//! Every key starts with a one-byte index prefix. Heights and output
//! indexes are 8-byte big-endian so keys sort by height within an index.

use tally_core::error::TallyError;
use tally_core::types::{Address, Hash256, OutPoint};

pub const USED_HASH: u8 = 0x01;
pub const USED_ADDRESS: u8 = 0x02;
pub const CHAIN_HEIGHT: u8 = 0x10;
pub const CHAIN_TRANSACTION_COUNT: u8 = 0x11;
pub const CHAIN_OUTPUT_COUNT: u8 = 0x12;
pub const BLOCK_BY_HEIGHT: u8 = 0x20;
pub const BLOCK_HEIGHT_BY_HASH: u8 = 0x21;
pub const TRANSACTION_BY_HEIGHT: u8 = 0x30;
pub const TRANSACTION_HEIGHT_BY_HASH: u8 = 0x31;
pub const OUTPUT_BY_HEIGHT: u8 = 0x40;
pub const OUTPUT_HEIGHT_BY_ID: u8 = 0x41;
pub const UNSPENT_OUTPUT_BY_ID: u8 = 0x42;
pub const SPENT_OUTPUT_BY_ID: u8 = 0x43;
pub const SOURCE_TRANSACTION_BY_ID: u8 = 0x44;
pub const DESTINATION_TRANSACTION_BY_ID: u8 = 0x45;
pub const OUTPUT_BY_ADDRESS: u8 = 0x50;
pub const UNSPENT_OUTPUT_BY_ADDRESS: u8 = 0x51;
pub const SPENT_OUTPUT_BY_ADDRESS: u8 = 0x52;

/// All index prefixes with a display name, in key order.
pub const INDEXES: &[(u8, &str)] = &[
    (USED_HASH, "used_hash"),
    (USED_ADDRESS, "used_address"),
    (CHAIN_HEIGHT, "chain_height"),
    (CHAIN_TRANSACTION_COUNT, "chain_transaction_count"),
    (CHAIN_OUTPUT_COUNT, "chain_output_count"),
    (BLOCK_BY_HEIGHT, "block_by_height"),
    (BLOCK_HEIGHT_BY_HASH, "block_height_by_hash"),
    (TRANSACTION_BY_HEIGHT, "transaction_by_height"),
    (TRANSACTION_HEIGHT_BY_HASH, "transaction_height_by_hash"),
    (OUTPUT_BY_HEIGHT, "output_by_height"),
    (OUTPUT_HEIGHT_BY_ID, "output_height_by_id"),
    (UNSPENT_OUTPUT_BY_ID, "unspent_output_by_id"),
    (SPENT_OUTPUT_BY_ID, "spent_output_by_id"),
    (SOURCE_TRANSACTION_BY_ID, "source_transaction_by_id"),
    (DESTINATION_TRANSACTION_BY_ID, "destination_transaction_by_id"),
    (OUTPUT_BY_ADDRESS, "output_by_address"),
    (UNSPENT_OUTPUT_BY_ADDRESS, "unspent_output_by_address"),
    (SPENT_OUTPUT_BY_ADDRESS, "spent_output_by_address"),
];

pub fn index_name(prefix: u8) -> Option<&'static str> {
    INDEXES.iter().find(|(p, _)| *p == prefix).map(|(_, name)| *name)
}

fn prefixed(prefix: u8, parts: &[&[u8]]) -> Vec<u8> {
    let len = 1 + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.push(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub fn singleton(prefix: u8) -> Vec<u8> {
    vec![prefix]
}

pub fn by_height(prefix: u8, height: u64) -> Vec<u8> {
    prefixed(prefix, &[&height.to_be_bytes()])
}

pub fn by_hash(prefix: u8, hash: &Hash256) -> Vec<u8> {
    prefixed(prefix, &[hash.as_bytes()])
}

pub fn by_address(prefix: u8, address: &Address) -> Vec<u8> {
    prefixed(prefix, &[address.as_bytes()])
}

pub fn by_output_id(prefix: u8, id: &OutPoint) -> Vec<u8> {
    prefixed(prefix, &[id.transaction_hash.as_bytes(), &id.index.to_be_bytes()])
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64, TallyError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TallyError::Storage(format!("invalid u64 length: {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_keys_sort_numerically() {
        assert!(by_height(BLOCK_BY_HEIGHT, 2) < by_height(BLOCK_BY_HEIGHT, 256));
        assert!(by_height(BLOCK_BY_HEIGHT, u64::MAX) < by_height(BLOCK_HEIGHT_BY_HASH, 0));
    }

    #[test]
    fn output_id_key_layout() {
        let id = OutPoint { transaction_hash: Hash256([7; 32]), index: 1 };
        let key = by_output_id(UNSPENT_OUTPUT_BY_ID, &id);
        assert_eq!(key.len(), 1 + 32 + 8);
        assert_eq!(key[0], UNSPENT_OUTPUT_BY_ID);
        assert_eq!(&key[33..], &1u64.to_be_bytes());
    }

    #[test]
    fn u64_roundtrip_and_length_check() {
        assert_eq!(decode_u64(&encode_u64(42)).unwrap(), 42);
        assert!(decode_u64(&[1, 2, 3]).is_err());
    }

    #[test]
    fn every_prefix_is_named_once() {
        assert_eq!(INDEXES.len(), 18);
        for (prefix, name) in INDEXES {
            assert_eq!(index_name(*prefix), Some(*name));
        }
        assert_eq!(index_name(0xee), None);
    }
}
