//! Double SHA-256 Merkle root over transaction hashes.
//!
//! Each level hashes adjacent pairs as `dsha256(left ‖ right)`. An unpaired
//! last node is carried to the next level unchanged. An empty list yields
//! [`Hash256::ZERO`].

use crate::crypto::double_sha256;
use crate::types::Hash256;

pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    double_sha256(&data)
}

pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    let Some(first) = leaves.first() else {
        return Hash256::ZERO;
    };
    if leaves.len() == 1 {
        return *first;
    }

    let mut current = leaves.to_vec();
    while current.len() > 1 {
        current = next_layer(&current);
    }
    current[0]
}

fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    layer
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => node_hash(left, right),
            _ => pair[0],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> Hash256 {
        Hash256([b; 32])
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn single_leaf_is_root() {
        assert_eq!(merkle_root(&[h(1)]), h(1));
    }

    #[test]
    fn two_leaves() {
        assert_eq!(merkle_root(&[h(1), h(2)]), node_hash(&h(1), &h(2)));
    }

    #[test]
    fn odd_leaf_carried_forward() {
        let expected = node_hash(&node_hash(&h(1), &h(2)), &h(3));
        assert_eq!(merkle_root(&[h(1), h(2), h(3)]), expected);
    }

    #[test]
    fn order_matters() {
        assert_ne!(merkle_root(&[h(1), h(2)]), merkle_root(&[h(2), h(1)]));
    }

    #[test]
    fn five_leaves() {
        let l1 = [node_hash(&h(1), &h(2)), node_hash(&h(3), &h(4)), h(5)];
        let l2 = [node_hash(&l1[0], &l1[1]), l1[2]];
        let expected = node_hash(&l2[0], &l2[1]);
        assert_eq!(merkle_root(&[h(1), h(2), h(3), h(4), h(5)]), expected);
    }
}
