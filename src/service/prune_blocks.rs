//! Event-index watermark maintenance.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{BlockId, BlockNumber};

use crate::error::Result;

use super::Service;

/// Everything below the minimum of the last dealt heights and the current
/// cycle snapshot is settled on chain; buffered event indexes up to that
/// watermark can be dropped.
pub(crate) async fn prune_blocks(srv: Arc<Service>) -> Result<()> {
    let cfg = srv.connection.eth2_config();
    let head = srv.connection.beacon_head().await?;

    let (latest_merkle_root_epoch, latest_withdrawals, latest_priority_fee) = {
        let state = srv.state.lock().await;
        (
            state.latest_merkle_root_epoch,
            state.latest_distribute_withdrawals_height,
            state.latest_distribute_priority_fee_height,
        )
    };

    let merkle_root_epoch_start_block = if latest_merkle_root_epoch != 0 {
        srv.connection
            .epoch_start_block(latest_merkle_root_epoch)
            .await?
    } else {
        0
    };

    // the first epoch of the current accounting cycle, clamped to finality.
    let seconds_per_cycle = srv.merkle_root_du_epochs * cfg.seconds_per_epoch();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| crate::error::Error::Generic("system clock before unix epoch"))?
        .as_secs();
    if now < cfg.genesis_time {
        return Ok(());
    }
    let cycle_start_ts = now / seconds_per_cycle * seconds_per_cycle;
    let cycle_epoch = cfg
        .epoch_at_timestamp(cycle_start_ts.max(cfg.genesis_time))
        .min(head.finalized_epoch);
    let cycle_start_block = srv.connection.epoch_start_block(cycle_epoch).await?;
    let block_id: BlockId = BlockNumber::Number(cycle_start_block.into()).into();
    let withdrawals_height_on_snapshot = srv
        .network_withdraw
        .latest_distribute_withdrawals_dealed_height()
        .block(block_id)
        .call()
        .await?
        .as_u64();

    let min_height = latest_priority_fee
        .min(latest_withdrawals)
        .min(merkle_root_epoch_start_block)
        .min(withdrawals_height_on_snapshot);
    if min_height == 0 {
        return Ok(());
    }

    let mut state = srv.state.lock().await;
    state.min_execution_block_height = min_height;
    state.withdrawals.retain(|block, _| *block >= min_height);
    state
        .priority_fee_distributions
        .retain(|height, _| *height >= min_height);
    tracing::debug!(
        token = ?srv.lsd_token,
        watermark = state.min_execution_block_height,
        "pruned event index"
    );
    Ok(())
}
