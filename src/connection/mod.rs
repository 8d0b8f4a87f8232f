//! The shared chain connection.
//!
//! One instance serves every service in the process: it owns the execution
//! client, the beacon client and the signing wallet, memoizes read calls and
//! funnels all outgoing transactions through a single critical section so the
//! funding account's nonce never collides.

use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, BlockNumber, H256, U256};
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

use crate::contracts::EthClient;
use crate::error::{Error, Result};
use crate::eth2::Eth2Config;
use crate::shutdown::ShutdownBus;
use crate::utils::{RETRY_INTERVAL, RETRY_LIMIT};

pub mod beacon;
pub mod cache;
pub mod gas;

use beacon::{BeaconClient, BeaconHead};
use cache::{CallCache, CallKey};

/// TTL for reads against the mutable chain head.
const LATEST_CALL_TTL: Duration = Duration::from_secs(12);

pub struct CachedConnection {
    provider: Provider<Http>,
    eth1: Arc<EthClient>,
    beacon: BeaconClient,
    eth2_config: Eth2Config,
    signer_address: Address,
    gas_limit: U256,
    max_gas_price: U256,
    tx_lock: Mutex<()>,
    cache: CallCache,
    http: reqwest::Client,
    shutdown: ShutdownBus,
}

/// Transaction options handed out under the connection's signing lock.
///
/// Exactly one of these exists at a time across the whole process; dropping
/// it releases the lock and the next caller reads a fresh nonce.
pub struct TxOpts<'a> {
    _guard: MutexGuard<'a, ()>,
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
}

impl CachedConnection {
    pub async fn new(
        eth1_endpoint: &Url,
        eth2_endpoint: &Url,
        wallet: LocalWallet,
        gas_limit: U256,
        max_gas_price: U256,
        shutdown: ShutdownBus,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(eth1_endpoint.as_str())?
            .interval(Duration::from_millis(500));
        let chain_id = provider.get_chainid().await?;
        let wallet = wallet.with_chain_id(chain_id.as_u64());
        let signer_address = wallet.address();
        let eth1 = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        let beacon = BeaconClient::new(eth2_endpoint.as_str());
        let eth2_config = beacon.eth2_config().await?;
        tracing::info!(
            chain_id = chain_id.as_u64(),
            signer = ?signer_address,
            "connection established"
        );
        Ok(Self {
            provider,
            eth1,
            beacon,
            eth2_config,
            signer_address,
            gas_limit,
            max_gas_price,
            tx_lock: Mutex::new(()),
            cache: CallCache::new(LATEST_CALL_TTL),
            http: reqwest::Client::new(),
            shutdown,
        })
    }

    /// The signing client used to instantiate contract handles.
    pub fn eth1_client(&self) -> Arc<EthClient> {
        self.eth1.clone()
    }

    /// The raw execution provider for read-only queries.
    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }

    pub fn beacon(&self) -> &BeaconClient {
        &self.beacon
    }

    pub fn eth2_config(&self) -> Eth2Config {
        self.eth2_config
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    pub async fn beacon_head(&self) -> Result<BeaconHead> {
        let key = CallKey::latest("beacon_head");
        if let Some(head) = self.cache.get::<BeaconHead>(&key) {
            return Ok(head);
        }
        let head = self.beacon.beacon_head().await?;
        self.cache.insert(key, head);
        Ok(head)
    }

    /// The execution block carried by the latest finalized beacon block.
    pub async fn latest_finalized_block(&self) -> Result<u64> {
        let key = CallKey::latest("finalized_block");
        if let Some(number) = self.cache.get::<u64>(&key) {
            return Ok(number);
        }
        let block = self.beacon.finalized_block().await?;
        self.cache.insert(key, block.execution_block_number);
        Ok(block.execution_block_number)
    }

    /// The execution block at the first proposed slot of `epoch`. Missed
    /// slots are skipped forward within the epoch; an epoch with no proposed
    /// block at all is an error. Only call this for finalized epochs, the
    /// answer is cached forever.
    pub async fn epoch_start_block(&self, epoch: u64) -> Result<u64> {
        let key = CallKey::historical("epoch_start_block", epoch.to_be_bytes().to_vec(), epoch);
        if let Some(number) = self.cache.get::<u64>(&key) {
            return Ok(number);
        }
        let start = self.eth2_config.start_slot_of_epoch(epoch);
        let end = self.eth2_config.end_slot_of_epoch(epoch);
        for slot in start..=end {
            if let Some(block) = self.beacon.block_at_slot(slot).await? {
                self.cache.insert(key, block.execution_block_number);
                return Ok(block.execution_block_number);
            }
        }
        Err(Error::EpochBlockMissing(epoch))
    }

    /// Acquires the signing lock and returns fresh transaction options.
    /// The caller may submit exactly one transaction while holding them.
    pub async fn lock_and_update_tx_opts(&self) -> Result<TxOpts<'_>> {
        let guard = self.tx_lock.lock().await;
        let nonce = self
            .provider
            .get_transaction_count(self.signer_address, Some(BlockNumber::Pending.into()))
            .await?;
        let gas_price = self.suggested_gas_price().await?;
        Ok(TxOpts {
            _guard: guard,
            nonce,
            gas_price,
            gas_limit: self.gas_limit,
        })
    }

    /// Gas price from ethgasstation, the beaconcha.in gasnow api as a
    /// fallback, and the node itself as the last resort; always clamped by
    /// the configured maximum.
    async fn suggested_gas_price(&self) -> Result<U256> {
        let gwei = U256::exp10(9);
        let price = match gas::from_ethgasstation(&self.http).await {
            Ok((base, priority)) => U256::from(base + priority) * gwei,
            Err(err) => {
                tracing::warn!(error = %err, "ethgasstation unavailable");
                match gas::from_beaconchain(&self.http).await {
                    Ok(standard) => U256::from(standard) * gwei,
                    Err(err) => {
                        tracing::warn!(error = %err, "gasnow unavailable, using node gas price");
                        self.provider.get_gas_price().await?
                    }
                }
            }
        };
        Ok(price.min(self.max_gas_price))
    }

    /// Polls `tx_hash` until it is mined and its receipt reports success,
    /// then returns the block number it landed in. Any terminal failure
    /// fires the shutdown bus before returning the error.
    pub async fn wait_tx_ok(&self, tx_hash: H256) -> Result<u64> {
        match self.wait_tx_inner(tx_hash).await {
            Ok(block) => {
                tracing::info!(tx = ?tx_hash, block, "tx ok");
                Ok(block)
            }
            Err(err) => {
                tracing::error!(tx = ?tx_hash, error = %err, "tx failed, requesting shutdown");
                self.shutdown.fire();
                Err(err)
            }
        }
    }

    async fn wait_tx_inner(&self, tx_hash: H256) -> Result<u64> {
        let mut retry = 0usize;
        loop {
            if retry > RETRY_LIMIT {
                return Err(Error::TxRetryLimit(tx_hash));
            }
            let pending = match self.provider.get_transaction(tx_hash).await {
                Ok(Some(tx)) => tx.block_number.is_none(),
                Ok(None) => true,
                Err(err) => {
                    tracing::warn!(tx = ?tx_hash, error = %err, "get_transaction");
                    true
                }
            };
            if pending {
                tokio::time::sleep(RETRY_INTERVAL).await;
                retry += 1;
                continue;
            }

            let mut receipt_retry = 0usize;
            let receipt = loop {
                if receipt_retry > RETRY_LIMIT {
                    return Err(Error::TxRetryLimit(tx_hash));
                }
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => break receipt,
                    Ok(None) => {
                        tracing::warn!(tx = ?tx_hash, "receipt not yet available");
                    }
                    Err(err) => {
                        tracing::warn!(tx = ?tx_hash, error = %err, "get_transaction_receipt");
                    }
                }
                tokio::time::sleep(RETRY_INTERVAL).await;
                receipt_retry += 1;
            };

            return match receipt.status {
                Some(status) if status.as_u64() == 1 => Ok(receipt
                    .block_number
                    .map(|n| n.as_u64())
                    .unwrap_or_default()),
                _ => Err(Error::TxFailed(tx_hash)),
            };
        }
    }
}
