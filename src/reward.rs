//! User/node/platform split of a reward amount.

use ethers::types::U256;

/// 32 ETH in wei, the effective balance a validator stakes against.
pub fn standard_effective_balance() -> U256 {
    U256::from(32) * U256::exp10(18)
}

/// Withdrawals above 8 ETH carry exited principal, not just skimmed rewards.
pub fn max_partial_withdrawal_amount() -> U256 {
    U256::from(8) * U256::exp10(18)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewardSplit {
    pub user: U256,
    pub node: U256,
    pub platform: U256,
}

/// Splits `reward` between the users, the operating node and the platform,
/// given the node's own deposit:
///
/// ```text
/// platform = 5% * reward
/// node     = platform + 90% * reward * nodeDeposit / 32e18
/// user     = reward - platform - node   (floored at zero)
/// ```
///
/// Amounts are 18-decimal wei. Out-of-domain inputs (zero reward or a node
/// deposit above 32 ETH) yield all zeros.
pub fn split_reward(node_deposit: U256, reward: U256) -> RewardSplit {
    split_weighted(node_deposit, standard_effective_balance(), reward)
}

/// The same split with an arbitrary deposit-to-stake ratio, used when one
/// amount covers many validators at once.
pub fn split_weighted(node_deposit: U256, effective_balance: U256, reward: U256) -> RewardSplit {
    if reward.is_zero() || effective_balance.is_zero() || node_deposit > effective_balance {
        return RewardSplit::default();
    }
    let platform = reward * U256::from(5) / U256::from(100);
    let node = platform + reward * U256::from(90) / U256::from(100) * node_deposit / effective_balance;
    let user = reward.saturating_sub(platform).saturating_sub(node);
    RewardSplit {
        user,
        node,
        platform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    fn pct(amount: U256, numerator: u64) -> U256 {
        amount * U256::from(numerator) / U256::from(100u64)
    }

    #[test]
    fn zero_deposit_split() {
        let split = split_reward(U256::zero(), eth(1));
        assert_eq!(split.platform, pct(eth(1), 5));
        assert_eq!(split.node, pct(eth(1), 5));
        assert_eq!(split.user, pct(eth(1), 90));
    }

    #[test]
    fn full_deposit_split() {
        let split = split_reward(eth(32), eth(1));
        assert_eq!(split.user, U256::zero());
        assert_eq!(split.node, pct(eth(1), 95));
        assert_eq!(split.platform, pct(eth(1), 5));
    }

    #[test]
    fn half_deposit_split() {
        let split = split_reward(eth(16), eth(1));
        assert_eq!(split.user, pct(eth(1), 40));
        assert_eq!(split.node, pct(eth(1), 50));
        assert_eq!(split.platform, pct(eth(1), 5));
        assert_eq!(split.user + split.node + split.platform, eth(1));
    }

    #[test]
    fn out_of_domain_inputs_yield_zeros() {
        assert_eq!(split_reward(eth(33), eth(1)), RewardSplit::default());
        assert_eq!(split_reward(eth(16), U256::zero()), RewardSplit::default());
    }

    #[test]
    fn components_never_exceed_reward() {
        for deposit_eth in 0..=32u64 {
            for reward_wei in [1u64, 17, 1_000_000_007, 999_999_999_999_999_999] {
                let reward = U256::from(reward_wei);
                let split = split_reward(eth(deposit_eth), reward);
                let sum = split.user + split.node + split.platform;
                assert!(sum <= reward);
                // rounding loss is at most a unit per division.
                assert!(reward - sum <= U256::from(2));
            }
        }
    }
}
