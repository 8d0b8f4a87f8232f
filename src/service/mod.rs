//! The per-LSD-token service.
//!
//! One `Service` owns everything the relay knows about a single token's
//! network: the contract handles, the synced event index and the cursor of
//! how far it has processed the chain. A fixed set of long-lived tasks runs
//! per service; each task serializes its own iterations, retries transient
//! failures on a fixed interval and escalates exhaustion to the process-wide
//! shutdown bus.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, U256};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::connection::CachedConnection;
use crate::contracts::{
    EthClient, LsdNetworkFactory, LsdToken, NetworkBalances, NetworkContracts, NetworkProposal,
    NetworkWithdraw, NodeDeposit,
};
use crate::error::{Error, Result};
use crate::reward::{max_partial_withdrawal_amount, split_reward, standard_effective_balance};
use crate::shutdown::ShutdownBus;
use crate::store::{Cursor, LocalStore};
use crate::types::{NodeType, ValidatorStatus};
use crate::utils::retry_policy;
use crate::web3storage::Web3StorageClient;

mod distribute;
mod prune_blocks;
mod set_merkle_root;
mod submit_balances;
mod sync_blocks;
mod vote_withdraw_credentials;

/// How often the block syncer looks for new finalized blocks.
const SYNC_INTERVAL: Duration = Duration::from_secs(12);
/// How often the voting tasks re-evaluate their triggers.
const VOTE_INTERVAL: Duration = Duration::from_secs(60);

/// Distribution fires every 75 epochs or every 8 hours, whichever is first.
pub(crate) const MAX_DISTRIBUTE_WAIT_EPOCHS: u64 = 75;
pub(crate) const MAX_DISTRIBUTE_WAIT_SECONDS: u64 = 8 * 60 * 60;

/// Validator pubkeys per beacon state query.
pub(crate) const PUBKEY_QUERY_CHUNK: usize = 64;

pub struct Service {
    lsd_token: Address,
    connection: Arc<CachedConnection>,
    store: Arc<LocalStore>,
    web3_storage: Arc<Web3StorageClient>,
    /// Process-wide bus, fired when this service fails fatally.
    shutdown: ShutdownBus,
    /// This service's own stop signal.
    stop: ShutdownBus,
    network_proposal: NetworkProposal<EthClient>,
    network_balances: NetworkBalances<EthClient>,
    network_withdraw: NetworkWithdraw<EthClient>,
    node_deposit: NodeDeposit<EthClient>,
    lsd_token_contract: LsdToken<EthClient>,
    fee_pool: Address,
    network_create_block: u64,
    merkle_root_du_epochs: u64,
    update_balances_du_epochs: u64,
    batch_request_blocks: u64,
    node_rewards_dir: PathBuf,
    cursor_name: String,
    pub(crate) state: Mutex<ServiceState>,
}

/// Mutable service state, touched only by this service's own tasks.
#[derive(Debug, Default)]
pub(crate) struct ServiceState {
    pub latest_block_of_sync_block: u64,
    pub latest_distribute_withdrawals_height: u64,
    pub latest_distribute_priority_fee_height: u64,
    pub latest_merkle_root_epoch: u64,
    pub min_execution_block_height: u64,
    /// Every validator deposited into this network, keyed by pubkey.
    pub validators: HashMap<Vec<u8>, Validator>,
    pub validator_index_to_pubkey: HashMap<u64, Vec<u8>>,
    /// Execution-layer withdrawals of our validators, keyed by block.
    pub withdrawals: BTreeMap<u64, Vec<WithdrawalRecord>>,
    /// Unstake queue entries, keyed by withdraw index.
    pub unstakes: BTreeMap<u64, UnstakeRecord>,
    /// Node share of executed priority-fee distributions, keyed by the
    /// dealt height of the on-chain event.
    pub priority_fee_distributions: BTreeMap<u64, U256>,
}

#[derive(Debug, Clone)]
pub(crate) struct Validator {
    pub node_address: Address,
    #[allow(dead_code)]
    pub node_type: NodeType,
    pub node_deposit_amount: U256,
    pub status: ValidatorStatus,
    pub withdrawal_credentials: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WithdrawalRecord {
    pub validator_index: u64,
    /// Amount in wei.
    pub amount: U256,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct UnstakeRecord {
    pub eth_amount: U256,
    pub claimed: bool,
}

impl Service {
    pub async fn new(
        cfg: &Config,
        lsd_token: Address,
        connection: Arc<CachedConnection>,
        store: Arc<LocalStore>,
        web3_storage: Arc<Web3StorageClient>,
        shutdown: ShutdownBus,
    ) -> Result<Self> {
        let client = connection.eth1_client();
        let factory = LsdNetworkFactory::new(cfg.contracts.lsd_factory_address, client.clone());
        let contracts: NetworkContracts = factory
            .network_contracts_of_lsd_token(lsd_token)
            .call()
            .await?
            .into();

        let network_withdraw = NetworkWithdraw::new(contracts.network_withdraw, client.clone());
        let network_balances = NetworkBalances::new(contracts.network_balances, client.clone());
        let merkle_root_du_epochs =
            network_withdraw.merkle_root_du_epochs().call().await?.as_u64();
        let update_balances_du_epochs =
            network_balances.update_balances_epochs().call().await?.as_u64();
        if merkle_root_du_epochs == 0 || update_balances_du_epochs == 0 {
            return Err(Error::Generic("network cycle length is zero on chain"));
        }

        Ok(Self {
            lsd_token,
            network_proposal: NetworkProposal::new(contracts.network_proposal, client.clone()),
            network_balances,
            network_withdraw,
            node_deposit: NodeDeposit::new(contracts.node_deposit, client.clone()),
            lsd_token_contract: LsdToken::new(lsd_token, client),
            fee_pool: contracts.fee_pool,
            network_create_block: contracts.create_block,
            merkle_root_du_epochs,
            update_balances_du_epochs,
            batch_request_blocks: cfg.batch_request_blocks_count.max(1),
            node_rewards_dir: cfg.node_rewards_path.clone(),
            cursor_name: format!("{:?}", lsd_token),
            connection,
            store,
            web3_storage,
            shutdown,
            stop: ShutdownBus::new(),
            state: Mutex::new(ServiceState::default()),
        })
    }

    pub fn lsd_token(&self) -> Address {
        self.lsd_token
    }

    /// Loads the cursor, seeds the on-chain positions and spawns the tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.init_state().await?;
        self.spawn_task("sync_blocks", SYNC_INTERVAL, sync_blocks::sync_blocks);
        self.spawn_task(
            "vote_withdraw_credentials",
            VOTE_INTERVAL,
            vote_withdraw_credentials::vote_withdraw_credentials,
        );
        self.spawn_task("submit_balances", VOTE_INTERVAL, submit_balances::submit_balances);
        self.spawn_task(
            "distribute_withdrawals",
            VOTE_INTERVAL,
            distribute::distribute_withdrawals,
        );
        self.spawn_task(
            "distribute_priority_fee",
            VOTE_INTERVAL,
            distribute::distribute_priority_fee,
        );
        self.spawn_task("set_merkle_root", VOTE_INTERVAL, set_merkle_root::set_merkle_root);
        self.spawn_task("prune_blocks", VOTE_INTERVAL, prune_blocks::prune_blocks);
        tracing::info!(token = ?self.lsd_token, "service started");
        Ok(())
    }

    /// Signals all tasks of this service to return.
    pub fn stop(&self) {
        self.stop.fire();
    }

    async fn init_state(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let cursor = self.store.read_cursor(&self.cursor_name)?;
        state.latest_block_of_sync_block = cursor
            .map(|c| c.block)
            .unwrap_or(self.network_create_block)
            .max(self.network_create_block);
        state.latest_merkle_root_epoch = self
            .network_withdraw
            .latest_merkle_root_epoch()
            .call()
            .await?
            .as_u64();
        state.latest_distribute_withdrawals_height = self
            .network_withdraw
            .latest_distribute_withdrawals_dealed_height()
            .call()
            .await?
            .as_u64();
        state.latest_distribute_priority_fee_height = self
            .network_withdraw
            .latest_distribute_priority_fee_dealed_height()
            .call()
            .await?
            .as_u64();
        tracing::info!(
            token = ?self.lsd_token,
            sync_from = state.latest_block_of_sync_block,
            merkle_root_epoch = state.latest_merkle_root_epoch,
            "service state initialized"
        );
        Ok(())
    }

    pub(crate) fn persist_cursor(&self, epoch: u64, block: u64) -> Result<()> {
        self.store.write_cursor(&self.cursor_name, Cursor { epoch, block })
    }

    /// Runs `task` forever on `interval`, each iteration wrapped in the
    /// bounded retry policy. The task returns within one retry interval of
    /// the stop signal; an exhausted retry budget is fatal for the process.
    fn spawn_task<F, Fut>(self: &Arc<Self>, name: &'static str, interval: Duration, task: F)
    where
        F: Fn(Arc<Service>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let srv = Arc::clone(self);
        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.recv() => {
                        tracing::info!(task = name, token = ?srv.lsd_token, "task stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                let attempt = || async {
                    task(srv.clone()).await.map_err(|err| {
                        tracing::warn!(task = name, error = %err, "task attempt failed");
                        backoff::Error::transient(err)
                    })
                };
                let result = tokio::select! {
                    _ = stop.recv() => {
                        tracing::info!(task = name, token = ?srv.lsd_token, "task stopped");
                        return;
                    }
                    result = backoff::future::retry(retry_policy(), attempt) => result,
                };
                if let Err(err) = result {
                    tracing::error!(
                        task = name,
                        token = ?srv.lsd_token,
                        error = %err,
                        "task retries exhausted, requesting shutdown"
                    );
                    srv.shutdown.fire();
                    return;
                }
            }
        });
    }
}

/// How one execution-layer withdrawal divides between the parties.
///
/// Amounts at or below the partial-withdrawal bound are pure rewards. Larger
/// amounts carry exited principal: the node recovers up to its own deposit,
/// users the rest, and only what exceeds 32 ETH is treated as reward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct WithdrawalSplit {
    pub user: U256,
    pub node: U256,
    pub platform: U256,
    pub node_exit_deposit: U256,
}

pub(crate) fn split_withdrawal(node_deposit: U256, amount: U256) -> WithdrawalSplit {
    let (principal, reward_part) = if amount <= max_partial_withdrawal_amount() {
        (U256::zero(), amount)
    } else {
        let principal = amount.min(standard_effective_balance());
        (principal, amount - principal)
    };
    let split = split_reward(node_deposit, reward_part);
    let node_exit_deposit = principal.min(node_deposit);
    WithdrawalSplit {
        user: split.user + (principal - node_exit_deposit),
        node: split.node,
        platform: split.platform,
        node_exit_deposit,
    }
}

/// Maps a beacon validator status string onto the on-chain axis.
pub(crate) fn beacon_status_of(status: &str) -> Option<ValidatorStatus> {
    let mapped = match status {
        "pending_initialized" | "pending_queued" => ValidatorStatus::Waiting,
        "active_ongoing" | "active_exiting" | "active_slashed" => ValidatorStatus::Active,
        "exited_unslashed" | "exited_slashed" => ValidatorStatus::Exited,
        "withdrawal_possible" => ValidatorStatus::Withdrawable,
        "withdrawal_done" => ValidatorStatus::WithdrawDone,
        _ => return None,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn partial_withdrawal_is_pure_reward() {
        let split = split_withdrawal(eth(4), eth(1));
        assert_eq!(split.node_exit_deposit, U256::zero());
        let reward = split_reward(eth(4), eth(1));
        assert_eq!(split.user, reward.user);
        assert_eq!(split.node, reward.node);
        assert_eq!(split.platform, reward.platform);
    }

    #[test]
    fn full_withdrawal_returns_principal() {
        // 33 ETH out: 32 principal, 1 reward.
        let split = split_withdrawal(eth(4), eth(33));
        assert_eq!(split.node_exit_deposit, eth(4));
        let reward = split_reward(eth(4), eth(1));
        assert_eq!(split.node, reward.node);
        assert_eq!(split.platform, reward.platform);
        // users get their 28 ETH principal plus their reward share.
        assert_eq!(split.user, eth(28) + reward.user);
        // nothing is lost.
        assert_eq!(
            split.user + split.node + split.platform + split.node_exit_deposit,
            eth(33)
        );
    }

    #[test]
    fn slashed_exit_below_principal() {
        // a slashed validator surfaces less than its 32 ETH principal.
        let split = split_withdrawal(eth(8), eth(31));
        assert_eq!(split.node_exit_deposit, eth(8));
        assert_eq!(split.user, eth(23));
        assert_eq!(split.node, U256::zero());
        assert_eq!(split.platform, U256::zero());
    }

    #[test]
    fn beacon_status_mapping() {
        assert_eq!(
            beacon_status_of("active_ongoing"),
            Some(ValidatorStatus::Active)
        );
        assert_eq!(
            beacon_status_of("withdrawal_done"),
            Some(ValidatorStatus::WithdrawDone)
        );
        assert_eq!(
            beacon_status_of("pending_queued"),
            Some(ValidatorStatus::Waiting)
        );
        assert_eq!(beacon_status_of("unknown_thing"), None);
    }
}
