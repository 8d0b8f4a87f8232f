//! Reward distribution votes, for beacon withdrawals and priority fees.

use std::ops::Bound;
use std::sync::Arc;

use ethers::providers::Middleware;
use ethers::types::{BlockId, BlockNumber, U256};

use crate::error::{Error, Result};
use crate::proposal::Proposal;
use crate::reward::{split_weighted, standard_effective_balance};
use crate::types::{DistributeType, ValidatorStatus};

use super::{split_withdrawal, Service, ServiceState, MAX_DISTRIBUTE_WAIT_EPOCHS, MAX_DISTRIBUTE_WAIT_SECONDS};

pub(crate) async fn distribute_withdrawals(srv: Arc<Service>) -> Result<()> {
    distribute(srv, DistributeType::Withdrawals).await
}

pub(crate) async fn distribute_priority_fee(srv: Arc<Service>) -> Result<()> {
    distribute(srv, DistributeType::PriorityFee).await
}

#[derive(Debug, Default)]
struct Amounts {
    user: U256,
    node: U256,
    platform: U256,
}

async fn distribute(srv: Arc<Service>, kind: DistributeType) -> Result<()> {
    let head = srv.connection.beacon_head().await?;
    let target_epoch = head.finalized_epoch;
    let target_block = srv.connection.epoch_start_block(target_epoch).await?;

    let latest_dealed_height = match kind {
        DistributeType::Withdrawals => {
            srv.network_withdraw
                .latest_distribute_withdrawals_dealed_height()
                .call()
                .await?
        }
        DistributeType::PriorityFee => {
            srv.network_withdraw
                .latest_distribute_priority_fee_dealed_height()
                .call()
                .await?
        }
        DistributeType::None => return Err(Error::Generic("distribute kind none")),
    }
    .as_u64();
    if target_block <= latest_dealed_height {
        return Ok(());
    }
    {
        let state = srv.state.lock().await;
        if target_block > state.latest_block_of_sync_block {
            tracing::debug!(
                target_block,
                synced = state.latest_block_of_sync_block,
                "distribute waiting for sync"
            );
            return Ok(());
        }
    }
    if !srv.distribute_due(latest_dealed_height, target_block).await? {
        return Ok(());
    }

    let block_id: BlockId = BlockNumber::Number(target_block.into()).into();
    let amounts = match kind {
        DistributeType::Withdrawals => {
            let state = srv.state.lock().await;
            withdrawal_amounts(&state, latest_dealed_height, target_block)
        }
        DistributeType::PriorityFee => {
            let fee_balance = srv
                .connection
                .provider()
                .get_balance(srv.fee_pool, Some(block_id))
                .await?;
            let state = srv.state.lock().await;
            priority_fee_amounts(&state, fee_balance)
        }
        DistributeType::None => unreachable!("rejected above"),
    };
    let total = amounts.user + amounts.node + amounts.platform;
    if total.is_zero() {
        tracing::debug!(target_block, kind = kind.as_u8(), "nothing to distribute");
        return Ok(());
    }

    let onchain_max_claimable = srv
        .network_withdraw
        .max_claimable_withdraw_index()
        .block(block_id)
        .call()
        .await?
        .as_u64();
    let max_claimable = {
        let state = srv.state.lock().await;
        max_claimable_withdraw_index(&state, onchain_max_claimable, amounts.user)
    };

    let proposal = Proposal::Distribute {
        distribute_type: kind,
        dealed_height: target_block.into(),
        user_amount: amounts.user,
        node_amount: amounts.node,
        platform_amount: amounts.platform,
        max_claimable_withdraw_index: max_claimable.into(),
    };
    let voter = srv.connection.signer_address();
    if srv
        .network_proposal
        .has_voted(proposal.id(), voter)
        .call()
        .await?
    {
        tracing::debug!(target_block, kind = kind.as_u8(), "distribute already voted");
        return Ok(());
    }

    tracing::info!(
        token = ?srv.lsd_token,
        kind = kind.as_u8(),
        dealed_height = target_block,
        user = %amounts.user,
        node = %amounts.node,
        platform = %amounts.platform,
        max_claimable,
        "distributing rewards"
    );
    let opts = srv.connection.lock_and_update_tx_opts().await?;
    let mut call = srv
        .network_withdraw
        .distribute(
            kind.as_u8(),
            U256::from(target_block),
            amounts.user,
            amounts.node,
            amounts.platform,
            U256::from(max_claimable),
        )
        .gas(opts.gas_limit)
        .gas_price(opts.gas_price);
    call.tx.set_nonce(opts.nonce);
    let pending = call.send().await?;
    let tx_hash = *pending;
    drop(pending);
    tracing::info!(tx = ?tx_hash, "sent distribute tx");
    srv.connection.wait_tx_ok(tx_hash).await?;
    drop(opts);

    let mut state = srv.state.lock().await;
    match kind {
        DistributeType::Withdrawals => {
            state.latest_distribute_withdrawals_height = target_block;
        }
        DistributeType::PriorityFee => {
            state.latest_distribute_priority_fee_height = target_block;
        }
        DistributeType::None => {}
    }
    Ok(())
}

impl Service {
    /// The cadence gate: enough epochs or enough wall time since the last
    /// dealt height, measured on chain data only.
    async fn distribute_due(&self, latest_dealed_height: u64, target_block: u64) -> Result<bool> {
        if latest_dealed_height == 0 {
            return Ok(true);
        }
        let last = self
            .connection
            .provider()
            .get_block(BlockNumber::Number(latest_dealed_height.into()))
            .await?
            .ok_or(Error::Generic("dealt block not returned by node"))?;
        let target = self
            .connection
            .provider()
            .get_block(BlockNumber::Number(target_block.into()))
            .await?
            .ok_or(Error::Generic("target block not returned by node"))?;
        let last_ts = last.timestamp.as_u64();
        let target_ts = target.timestamp.as_u64();
        let cfg = self.connection.eth2_config();
        let epochs_elapsed =
            cfg.epoch_at_timestamp(target_ts) - cfg.epoch_at_timestamp(last_ts);
        Ok(epochs_elapsed >= MAX_DISTRIBUTE_WAIT_EPOCHS
            || target_ts.saturating_sub(last_ts) >= MAX_DISTRIBUTE_WAIT_SECONDS)
    }
}

/// Sums the splits of every indexed withdrawal in `(from, to]`.
fn withdrawal_amounts(state: &ServiceState, from: u64, to: u64) -> Amounts {
    let mut amounts = Amounts::default();
    for (_, records) in state
        .withdrawals
        .range((Bound::Excluded(from), Bound::Included(to)))
    {
        for record in records {
            let node_deposit = state
                .validator_index_to_pubkey
                .get(&record.validator_index)
                .and_then(|pubkey| state.validators.get(pubkey))
                .map(|v| v.node_deposit_amount)
                .unwrap_or_default();
            let split = split_withdrawal(node_deposit, record.amount);
            amounts.user += split.user;
            amounts.node += split.node + split.node_exit_deposit;
            amounts.platform += split.platform;
        }
    }
    amounts
}

/// Splits the fee-pool balance with the node share weighted by the deposits
/// of the currently active validator set.
fn priority_fee_amounts(state: &ServiceState, fee_balance: U256) -> Amounts {
    let mut total_node_deposit = U256::zero();
    let mut active = 0u64;
    for validator in state.validators.values() {
        if validator.status.beacon_rank() == ValidatorStatus::Active.beacon_rank() {
            total_node_deposit += validator.node_deposit_amount;
            active += 1;
        }
    }
    let effective = if active == 0 {
        standard_effective_balance()
    } else {
        U256::from(active) * standard_effective_balance()
    };
    let deposit = if active == 0 {
        U256::zero()
    } else {
        total_node_deposit
    };
    let split = split_weighted(deposit, effective, fee_balance);
    Amounts {
        user: split.user,
        node: split.node,
        platform: split.platform,
    }
}

/// Walks the unstake queue in index order and returns the highest index the
/// newly distributed user amount can cover, starting from the max already
/// claimable on chain.
fn max_claimable_withdraw_index(
    state: &ServiceState,
    onchain_max: u64,
    user_amount: U256,
) -> u64 {
    let mut available = user_amount;
    let mut max_claimable = onchain_max;
    for (index, record) in state
        .unstakes
        .range((Bound::Excluded(onchain_max), Bound::Unbounded))
    {
        if record.claimed {
            max_claimable = *index;
            continue;
        }
        if available >= record.eth_amount {
            available -= record.eth_amount;
            max_claimable = *index;
        } else {
            break;
        }
    }
    max_claimable
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::service::UnstakeRecord;

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    fn state_with_unstakes(entries: &[(u64, u64, bool)]) -> ServiceState {
        let mut unstakes = BTreeMap::new();
        for (index, amount, claimed) in entries {
            unstakes.insert(
                *index,
                UnstakeRecord {
                    eth_amount: eth(*amount),
                    claimed: *claimed,
                },
            );
        }
        ServiceState {
            unstakes,
            ..Default::default()
        }
    }

    #[test]
    fn max_claimable_covers_in_index_order() {
        let state = state_with_unstakes(&[(1, 1, false), (2, 2, false), (3, 1, false)]);
        assert_eq!(max_claimable_withdraw_index(&state, 0, eth(3)), 2);
        assert_eq!(max_claimable_withdraw_index(&state, 0, eth(4)), 3);
        assert_eq!(max_claimable_withdraw_index(&state, 0, U256::zero()), 0);
    }

    #[test]
    fn max_claimable_skips_already_claimed() {
        let state = state_with_unstakes(&[(5, 10, true), (6, 1, false)]);
        // index 5 was served instantly, one more ETH covers index 6.
        assert_eq!(max_claimable_withdraw_index(&state, 4, eth(1)), 6);
        assert_eq!(max_claimable_withdraw_index(&state, 4, U256::zero()), 5);
    }

    #[test]
    fn max_claimable_never_regresses() {
        let state = state_with_unstakes(&[(9, 4, false)]);
        assert_eq!(max_claimable_withdraw_index(&state, 8, eth(1)), 8);
    }

    #[test]
    fn priority_fee_split_with_no_active_validators() {
        let state = ServiceState::default();
        let amounts = priority_fee_amounts(&state, eth(1));
        // zero node deposits: plain 90/5/5.
        assert_eq!(amounts.user, eth(1) * U256::from(90u64) / U256::from(100u64));
        assert_eq!(amounts.node, eth(1) * U256::from(5u64) / U256::from(100u64));
        assert_eq!(amounts.platform, eth(1) * U256::from(5u64) / U256::from(100u64));
    }
}
