//! Periodic total-ETH / token-supply attestation.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::providers::Middleware;
use ethers::types::{BlockId, BlockNumber, U256};

use crate::error::Result;
use crate::proposal::Proposal;
use crate::reward::{split_reward, standard_effective_balance};

use super::{Service, PUBKEY_QUERY_CHUNK};

/// Computes the user-owned ETH backing the token at a cycle boundary block
/// and votes the balances proposal. All reads are pinned to that historical
/// block so every voter arrives at the same numbers.
pub(crate) async fn submit_balances(srv: Arc<Service>) -> Result<()> {
    let head = srv.connection.beacon_head().await?;
    let du = srv.update_balances_du_epochs;
    let target_epoch = head.finalized_epoch / du * du;
    let target_block = srv.connection.epoch_start_block(target_epoch).await?;

    let latest_balances_block = srv
        .network_balances
        .latest_balances_block()
        .call()
        .await?
        .as_u64();
    if target_block <= latest_balances_block {
        tracing::debug!(target_block, latest_balances_block, "balances already submitted");
        return Ok(());
    }
    {
        let state = srv.state.lock().await;
        if target_block > state.latest_block_of_sync_block {
            tracing::debug!(
                target_block,
                synced = state.latest_block_of_sync_block,
                "submit balances waiting for sync"
            );
            return Ok(());
        }
    }

    let block_id: BlockId = BlockNumber::Number(target_block.into()).into();
    let lsd_token_supply: U256 = srv
        .lsd_token_contract
        .total_supply()
        .block(block_id)
        .call()
        .await?;
    let pool_balance = srv
        .connection
        .provider()
        .get_balance(srv.network_balances.address(), Some(block_id))
        .await?;

    // user share of every on-beacon validator balance at the boundary slot.
    let slot = srv
        .connection
        .eth2_config()
        .start_slot_of_epoch(target_epoch);
    let deposits: HashMap<String, U256> = {
        let state = srv.state.lock().await;
        state
            .validators
            .iter()
            .filter(|(_, v)| v.status.beacon_rank().is_some())
            .map(|(pubkey, v)| {
                (format!("0x{}", hex::encode(pubkey)), v.node_deposit_amount)
            })
            .collect()
    };
    let pubkeys: Vec<String> = deposits.keys().cloned().collect();

    let mut total_user_eth = pool_balance;
    for chunk in pubkeys.chunks(PUBKEY_QUERY_CHUNK) {
        let entries = srv
            .connection
            .beacon()
            .validators_at_slot(slot, chunk)
            .await?;
        for entry in entries {
            let node_deposit = deposits
                .get(&entry.validator.pubkey)
                .copied()
                .unwrap_or_default();
            let balance = U256::from(entry.balance) * U256::exp10(9);
            let user_deposit =
                standard_effective_balance().saturating_sub(node_deposit);
            let reward = balance.saturating_sub(standard_effective_balance());
            let user_principal = user_deposit.min(balance);
            total_user_eth += user_principal + split_reward(node_deposit, reward).user;
        }
    }

    let proposal = Proposal::SubmitBalances {
        block: target_block.into(),
        total_eth: total_user_eth,
        lsd_token_supply,
    };
    let voter = srv.connection.signer_address();
    if srv
        .network_proposal
        .has_voted(proposal.id(), voter)
        .call()
        .await?
    {
        tracing::debug!(target_block, "balances proposal already voted");
        return Ok(());
    }

    tracing::info!(
        token = ?srv.lsd_token,
        target_block,
        total_eth = %total_user_eth,
        supply = %lsd_token_supply,
        "submitting balances"
    );
    let opts = srv.connection.lock_and_update_tx_opts().await?;
    let mut call = srv
        .network_balances
        .submit_balances(
            U256::from(target_block),
            total_user_eth,
            lsd_token_supply,
        )
        .gas(opts.gas_limit)
        .gas_price(opts.gas_price);
    call.tx.set_nonce(opts.nonce);
    let pending = call.send().await?;
    let tx_hash = *pending;
    drop(pending);
    tracing::info!(tx = ?tx_hash, "sent submitBalances tx");
    srv.connection.wait_tx_ok(tx_hash).await?;
    drop(opts);
    Ok(())
}
