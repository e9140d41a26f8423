//! Fixed-target proof check.
//!
//! The block hash, read as a 256-bit big-endian integer, must not exceed the
//! configured target. Retargeting is out of scope; the target never moves.

use crate::constants::DEFAULT_TARGET;
use crate::tools::format_difficulty;
use crate::traits::{ChainView, Consensus};
use crate::types::{Block, Hash256};

#[derive(Debug, Clone)]
pub struct FixedTargetConsensus {
    target: Hash256,
}

impl FixedTargetConsensus {
    pub fn new(target: Hash256) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Hash256 {
        self.target
    }

    /// `hash <= target`, comparing bytes most significant first.
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        hash.as_bytes() <= self.target.as_bytes()
    }
}

impl Default for FixedTargetConsensus {
    fn default() -> Self {
        Self::new(Hash256(DEFAULT_TARGET))
    }
}

impl Consensus for FixedTargetConsensus {
    fn check_consensus(&self, _chain: &dyn ChainView, block: &Block) -> bool {
        match block.hash() {
            Ok(hash) => self.meets_target(&hash),
            Err(_) => false,
        }
    }

    fn calculate_difficulty(&self, _chain: &dyn ChainView, _block: &Block) -> String {
        format_difficulty(&self.target.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_accepts_everything() {
        let consensus = FixedTargetConsensus::default();
        assert!(consensus.meets_target(&Hash256([0xff; 32])));
        assert!(consensus.meets_target(&Hash256::ZERO));
    }

    #[test]
    fn target_comparison_is_big_endian() {
        let mut target = [0u8; 32];
        target[0] = 0x01;
        let consensus = FixedTargetConsensus::new(Hash256(target));

        let mut below = [0xffu8; 32];
        below[0] = 0x00;
        assert!(consensus.meets_target(&Hash256(below)));

        let mut above = [0u8; 32];
        above[0] = 0x01;
        above[31] = 0x01;
        assert!(!consensus.meets_target(&Hash256(above)));
    }

    #[test]
    fn impossible_target_rejects() {
        let consensus = FixedTargetConsensus::new(Hash256::ZERO);
        let mut hash = [0u8; 32];
        hash[3] = 1;
        assert!(!consensus.meets_target(&Hash256(hash)));
        assert!(consensus.meets_target(&Hash256::ZERO));
    }
}
