//! Supervision of the per-token services.
//!
//! The manager owns the shared connection and the cursor store, reconciles
//! the live service set against the factory's entrusted token list and fans
//! out stop signals. It never restarts a failed service: a service that
//! exhausts its retry budget shuts the whole process down so the operator
//! looks at it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::connection::CachedConnection;
use crate::contracts::{EthClient, LsdNetworkFactory};
use crate::error::{Error, Result};
use crate::service::Service;
use crate::shutdown::ShutdownBus;
use crate::store::LocalStore;
use crate::utils::retry_policy;
use crate::web3storage::Web3StorageClient;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(12);

pub struct ServiceManager {
    cfg: Config,
    connection: Arc<CachedConnection>,
    store: Arc<LocalStore>,
    web3_storage: Arc<Web3StorageClient>,
    factory: LsdNetworkFactory<EthClient>,
    shutdown: ShutdownBus,
    stop: ShutdownBus,
    services: Mutex<HashMap<Address, Arc<Service>>>,
}

impl ServiceManager {
    /// Validates the configuration and brings up the shared connection.
    /// Configuration errors surface here, before any task is spawned.
    pub async fn new(cfg: Config, shutdown: ShutdownBus) -> Result<Self> {
        let gas_limit = cfg.gas_limit_wei()?;
        let max_gas_price = cfg.max_gas_price_wei()?;
        let wallet = cfg.wallet()?;
        let connection = Arc::new(
            CachedConnection::new(
                &cfg.eth1_endpoint,
                &cfg.eth2_endpoint,
                wallet,
                gas_limit,
                max_gas_price,
                shutdown.clone(),
            )
            .await?,
        );
        let store = Arc::new(LocalStore::new(&cfg.store_path)?);
        let web3_storage = Arc::new(Web3StorageClient::new(
            cfg.web3_storage.endpoint.clone(),
            cfg.web3_storage.gateway.clone(),
            cfg.web3_storage.token.clone(),
        ));
        let factory =
            LsdNetworkFactory::new(cfg.contracts.lsd_factory_address, connection.eth1_client());
        Ok(Self {
            cfg,
            connection,
            store,
            web3_storage,
            factory,
            shutdown,
            stop: ShutdownBus::new(),
            services: Mutex::new(HashMap::new()),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.cfg.run_for_entrusted_lsd_network {
            let token = self.cfg.contracts.lsd_token_address.ok_or(Error::InvalidConfig(
                "contracts.lsd-token-address is required unless running for the entrusted network"
                    .into(),
            ))?;
            self.start_service_for(token).await?;
            return Ok(());
        }

        // first reconcile is part of startup and shares the retry budget.
        let attempt = || async {
            self.reconcile()
                .await
                .map_err(backoff::Error::transient)
        };
        backoff::future::retry(retry_policy(), attempt).await?;

        let manager = Arc::clone(self);
        let mut stop = self.stop.subscribe();
        tokio::spawn(async move {
            tracing::info!("listening for entrusted lsd token changes");
            loop {
                tokio::select! {
                    _ = stop.recv() => {
                        tracing::info!("token reconciler stopped");
                        return;
                    }
                    _ = tokio::time::sleep(RECONCILE_INTERVAL) => {}
                }
                let attempt = || async {
                    manager
                        .reconcile()
                        .await
                        .map_err(backoff::Error::transient)
                };
                let result = tokio::select! {
                    _ = stop.recv() => return,
                    result = backoff::future::retry(retry_policy(), attempt) => result,
                };
                if let Err(err) = result {
                    tracing::error!(error = %err, "token reconciler exhausted retries, requesting shutdown");
                    manager.shutdown.fire();
                    return;
                }
            }
        });
        Ok(())
    }

    /// Stops the reconciler, every service and finally the connection users.
    pub async fn stop(&self) {
        self.stop.fire();
        let services = self.services.lock().await;
        for service in services.values() {
            service.stop();
        }
        tracing::info!(count = services.len(), "services stopped");
    }

    async fn reconcile(&self) -> Result<()> {
        let desired = self.factory.get_entrusted_lsd_tokens().call().await?;
        let current: HashSet<Address> = {
            let services = self.services.lock().await;
            services.keys().copied().collect()
        };
        let (to_start, to_stop) = diff_tokens(&current, &desired);

        for token in to_start {
            self.start_service_for(token).await?;
        }
        if !to_stop.is_empty() {
            let mut services = self.services.lock().await;
            for token in to_stop {
                if let Some(service) = services.remove(&token) {
                    service.stop();
                    tracing::info!(token = ?token, "service removed");
                }
            }
        }
        Ok(())
    }

    async fn start_service_for(&self, token: Address) -> Result<()> {
        let service = Arc::new(
            Service::new(
                &self.cfg,
                token,
                self.connection.clone(),
                self.store.clone(),
                self.web3_storage.clone(),
                self.shutdown.clone(),
            )
            .await?,
        );
        service.start().await?;
        self.services.lock().await.insert(token, service);
        Ok(())
    }
}

/// Which tokens to start and which to stop to make `current` match
/// `desired`.
fn diff_tokens(
    current: &HashSet<Address>,
    desired: &[Address],
) -> (Vec<Address>, Vec<Address>) {
    let desired_set: HashSet<Address> = desired.iter().copied().collect();
    let to_start = desired
        .iter()
        .filter(|token| !current.contains(token))
        .copied()
        .collect();
    let to_stop = current
        .iter()
        .filter(|token| !desired_set.contains(token))
        .copied()
        .collect();
    (to_start, to_stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u64) -> Address {
        Address::from_low_u64_be(seed)
    }

    #[test]
    fn diff_starts_new_and_stops_removed() {
        let current: HashSet<Address> = [addr(1), addr(2)].into_iter().collect();
        let desired = vec![addr(1)];
        let (to_start, to_stop) = diff_tokens(&current, &desired);
        assert!(to_start.is_empty());
        assert_eq!(to_stop, vec![addr(2)]);

        let desired = vec![addr(1), addr(2), addr(3)];
        let (to_start, to_stop) = diff_tokens(&current, &desired);
        assert_eq!(to_start, vec![addr(3)]);
        assert!(to_stop.is_empty());
    }

    #[test]
    fn diff_of_equal_sets_is_empty() {
        let current: HashSet<Address> = [addr(7)].into_iter().collect();
        let (to_start, to_stop) = diff_tokens(&current, &[addr(7)]);
        assert!(to_start.is_empty());
        assert!(to_stop.is_empty());
    }

    #[test]
    fn diff_from_empty_starts_everything() {
        let current = HashSet::new();
        let desired = vec![addr(1), addr(2)];
        let (to_start, to_stop) = diff_tokens(&current, &desired);
        assert_eq!(to_start, desired);
        assert!(to_stop.is_empty());
    }
}
