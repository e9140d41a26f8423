//! Reward schedule and the halving [`Incentive`].
//!
//! The block reward starts at [`INITIAL_REWARD`] and halves every
//! [`HALVING_INTERVAL`] blocks:
//!
//! - Epoch 0 (heights 1–209,999): 50 TALLY per block
//! - Epoch 1 (heights 210,000–419,999): 25 TALLY per block
//! - Epoch 33+: 0 (reward exhausted)

use tracing::debug;

use crate::constants::{HALVING_INTERVAL, INITIAL_REWARD};
use crate::tools;
use crate::traits::{ChainView, Incentive};
use crate::types::Block;

/// Reward for a block at `height` under the given schedule.
///
/// Returns 0 once the shift reaches 64 or truncation yields zero.
pub fn block_reward(height: u64, initial_reward: u64, halving_interval: u64) -> u64 {
    let epoch = height / halving_interval.max(1);
    if epoch >= 64 {
        return 0;
    }
    initial_reward >> epoch
}

/// Accepts a block when its reward transaction mints no more than the
/// scheduled reward plus the fees of the block's other transactions.
#[derive(Debug, Clone)]
pub struct HalvingIncentive {
    pub initial_reward: u64,
    pub halving_interval: u64,
}

impl Default for HalvingIncentive {
    fn default() -> Self {
        Self { initial_reward: INITIAL_REWARD, halving_interval: HALVING_INTERVAL }
    }
}

impl HalvingIncentive {
    pub fn reward(&self, height: u64) -> u64 {
        block_reward(height, self.initial_reward, self.halving_interval)
    }
}

impl Incentive for HalvingIncentive {
    fn check_incentive(&self, chain: &dyn ChainView, block: &Block) -> bool {
        let Some(reward_tx) = block.transactions.first() else {
            return false;
        };
        let Some(minted) = reward_tx.total_output() else {
            return false;
        };
        let fees = match tools::block_fee(chain, block) {
            Ok(fees) => fees,
            Err(e) => {
                debug!(height = block.height, error = %e, "cannot compute block fee");
                return false;
            }
        };
        let allowed = self.reward(block.height).saturating_add(fees);
        if minted > allowed {
            debug!(height = block.height, minted, allowed, "reward transaction mints too much");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    #[test]
    fn reward_halves_on_schedule() {
        assert_eq!(block_reward(1, INITIAL_REWARD, HALVING_INTERVAL), 50 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL - 1, INITIAL_REWARD, HALVING_INTERVAL), 50 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL, INITIAL_REWARD, HALVING_INTERVAL), 25 * COIN);
        assert_eq!(block_reward(2 * HALVING_INTERVAL, INITIAL_REWARD, HALVING_INTERVAL), 25 * COIN / 2);
    }

    #[test]
    fn reward_exhausts() {
        assert_eq!(block_reward(64 * HALVING_INTERVAL, INITIAL_REWARD, HALVING_INTERVAL), 0);
        assert_eq!(block_reward(u64::MAX, INITIAL_REWARD, HALVING_INTERVAL), 0);
    }

    #[test]
    fn zero_interval_does_not_divide_by_zero() {
        assert_eq!(block_reward(0, 8, 0), 8);
        assert_eq!(block_reward(1, 8, 0), 4);
    }

    #[test]
    fn default_schedule() {
        let incentive = HalvingIncentive::default();
        assert_eq!(incentive.reward(1), INITIAL_REWARD);
    }
}
