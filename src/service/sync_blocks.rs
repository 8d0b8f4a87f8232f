//! Event and withdrawal indexing up to the finalized block.

use std::sync::Arc;

use ethers::providers::Middleware;
use ethers::types::{BlockNumber, U256};

use crate::error::{Error, Result};
use crate::types::{NodeType, ValidatorStatus};

use super::{beacon_status_of, Service, ServiceState, Validator, WithdrawalRecord, UnstakeRecord, PUBKEY_QUERY_CHUNK};

pub(crate) async fn sync_blocks(srv: Arc<Service>) -> Result<()> {
    let latest_finalized = srv.connection.latest_finalized_block().await?;
    let mut state = srv.state.lock().await;
    let advanced = state.latest_block_of_sync_block < latest_finalized;
    if advanced {
        let mut from = state.latest_block_of_sync_block + 1;
        while from <= latest_finalized {
            let to = (from + srv.batch_request_blocks - 1).min(latest_finalized);
            srv.index_contract_events(&mut state, from, to).await?;
            srv.index_el_withdrawals(&mut state, from, to).await?;
            state.latest_block_of_sync_block = to;
            from = to + 1;
        }
        tracing::debug!(
            token = ?srv.lsd_token,
            synced_to = state.latest_block_of_sync_block,
            "blocks synced"
        );
    }
    srv.refresh_validators(&mut state).await?;

    if advanced {
        let head = srv.connection.beacon_head().await?;
        srv.persist_cursor(head.finalized_epoch, state.latest_block_of_sync_block)?;
    }
    Ok(())
}

impl Service {
    async fn index_contract_events(
        &self,
        state: &mut ServiceState,
        from: u64,
        to: u64,
    ) -> Result<()> {
        let deposited = self
            .node_deposit
            .deposited_filter()
            .from_block(from)
            .to_block(to)
            .query()
            .await?;
        for event in deposited {
            let pubkey = event.pubkey.to_vec();
            let node_type = NodeType::try_from(event.node_type)?;
            state
                .validators
                .entry(pubkey)
                .or_insert_with(|| Validator {
                    node_address: event.node,
                    node_type,
                    node_deposit_amount: event.amount,
                    status: ValidatorStatus::Deposited,
                    withdrawal_credentials: event.withdraw_credentials.to_vec(),
                });
        }

        let staked = self
            .node_deposit
            .staked_filter()
            .from_block(from)
            .to_block(to)
            .query()
            .await?;
        for event in staked {
            if let Some(validator) = state.validators.get_mut(&event.pubkey.to_vec()) {
                if validator.status.beacon_rank().is_none() {
                    validator.status = ValidatorStatus::Staked;
                }
            }
        }

        let unstakes = self
            .network_withdraw
            .unstake_filter()
            .from_block(from)
            .to_block(to)
            .query()
            .await?;
        for event in unstakes {
            state.unstakes.insert(
                event.withdraw_index.as_u64(),
                UnstakeRecord {
                    eth_amount: event.eth_amount,
                    claimed: event.instantly,
                },
            );
        }

        let withdraws = self
            .network_withdraw
            .withdraw_filter()
            .from_block(from)
            .to_block(to)
            .query()
            .await?;
        for event in withdraws {
            for index in event.withdraw_index_list {
                if let Some(record) = state.unstakes.get_mut(&index.as_u64()) {
                    record.claimed = true;
                }
            }
        }

        let distributions = self
            .network_withdraw
            .distribute_rewards_filter()
            .from_block(from)
            .to_block(to)
            .query()
            .await?;
        for event in distributions {
            let height = event.dealed_height.as_u64();
            match event.distribute_type {
                1 => {
                    state.latest_distribute_withdrawals_height =
                        state.latest_distribute_withdrawals_height.max(height);
                }
                2 => {
                    state.latest_distribute_priority_fee_height =
                        state.latest_distribute_priority_fee_height.max(height);
                    state
                        .priority_fee_distributions
                        .insert(height, event.node_amount);
                }
                _ => {}
            }
        }

        let roots = self
            .network_withdraw
            .set_merkle_root_filter()
            .from_block(from)
            .to_block(to)
            .query()
            .await?;
        for event in roots {
            state.latest_merkle_root_epoch =
                state.latest_merkle_root_epoch.max(event.dealed_epoch.as_u64());
        }

        Ok(())
    }

    /// Collects execution-layer withdrawals of our validators block by block.
    async fn index_el_withdrawals(
        &self,
        state: &mut ServiceState,
        from: u64,
        to: u64,
    ) -> Result<()> {
        for number in from..=to {
            let block = self
                .connection
                .provider()
                .get_block(BlockNumber::Number(number.into()))
                .await?
                .ok_or(Error::Generic("finalized block not returned by node"))?;
            let Some(withdrawals) = block.withdrawals else {
                continue;
            };
            for withdrawal in withdrawals {
                let index = withdrawal.validator_index.as_u64();
                if !state.validator_index_to_pubkey.contains_key(&index) {
                    continue;
                }
                // amounts on the payload are gwei.
                let amount = withdrawal.amount * U256::exp10(9);
                state
                    .withdrawals
                    .entry(number)
                    .or_default()
                    .push(WithdrawalRecord {
                        validator_index: index,
                        amount,
                    });
            }
        }
        Ok(())
    }

    /// Re-reads beacon state for every validator that may have moved and
    /// advances statuses along the beacon axis. The slash bit is sticky.
    async fn refresh_validators(&self, state: &mut ServiceState) -> Result<()> {
        let head = self.connection.beacon_head().await?;
        let slot = self
            .connection
            .eth2_config()
            .start_slot_of_epoch(head.finalized_epoch);

        let pubkeys: Vec<String> = state
            .validators
            .iter()
            .filter(|(_, v)| {
                v.status == ValidatorStatus::Staked
                    || v.status.beacon_rank().map_or(false, |rank| rank < 5)
            })
            .map(|(pubkey, _)| format!("0x{}", hex::encode(pubkey)))
            .collect();

        for chunk in pubkeys.chunks(PUBKEY_QUERY_CHUNK) {
            let entries = self
                .connection
                .beacon()
                .validators_at_slot(slot, chunk)
                .await?;
            for entry in entries {
                let pubkey = hex::decode(entry.validator.pubkey.trim_start_matches("0x"))?;
                let Some(validator) = state.validators.get_mut(&pubkey) else {
                    continue;
                };
                state
                    .validator_index_to_pubkey
                    .insert(entry.index, pubkey.clone());

                let Some(observed) = beacon_status_of(&entry.status) else {
                    continue;
                };
                let advance = match validator.status.beacon_rank() {
                    None => validator.status == ValidatorStatus::Staked,
                    Some(current) => observed
                        .beacon_rank()
                        .map_or(false, |rank| rank >= current),
                };
                if advance {
                    let slashed = entry.validator.slashed || validator.status.slashed();
                    validator.status = if slashed {
                        observed.with_slash()
                    } else {
                        observed
                    };
                }
            }
        }
        Ok(())
    }
}
