//! Typed HTTP client for the beacon node.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::eth2::Eth2Config;

#[derive(Debug, Clone)]
pub struct BeaconClient {
    http: Client,
    endpoint: String,
}

/// Finality summary of the chain as the beacon node sees it.
#[derive(Debug, Clone, Copy)]
pub struct BeaconHead {
    pub finalized_epoch: u64,
}

/// A beacon block reduced to what the relay needs: its slot and the number
/// of the execution-layer block it carries.
#[derive(Debug, Clone, Copy)]
pub struct BeaconBlock {
    pub slot: u64,
    pub execution_block_number: u64,
}

/// One row of a state validators query.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorEntry {
    #[serde(deserialize_with = "string_u64")]
    pub index: u64,
    /// Current balance in gwei.
    #[serde(deserialize_with = "string_u64")]
    pub balance: u64,
    pub status: String,
    pub validator: ValidatorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorDetail {
    pub pubkey: String,
    pub withdrawal_credentials: String,
    pub slashed: bool,
}

impl BeaconClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Chain parameters assembled from the genesis and spec endpoints.
    pub async fn eth2_config(&self) -> Result<Eth2Config> {
        let genesis: Wrapped<GenesisData> =
            self.get(&format!("{}/eth/v1/beacon/genesis", self.endpoint)).await?;
        let spec: Wrapped<SpecData> =
            self.get(&format!("{}/eth/v1/config/spec", self.endpoint)).await?;
        Ok(Eth2Config {
            genesis_time: genesis.data.genesis_time,
            genesis_epoch: 0,
            seconds_per_slot: spec.data.seconds_per_slot,
            slots_per_epoch: spec.data.slots_per_epoch,
        })
    }

    pub async fn beacon_head(&self) -> Result<BeaconHead> {
        let response: Wrapped<FinalityCheckpoints> = self
            .get(&format!(
                "{}/eth/v1/beacon/states/head/finality_checkpoints",
                self.endpoint
            ))
            .await?;
        Ok(BeaconHead {
            finalized_epoch: response.data.finalized.epoch,
        })
    }

    /// The latest finalized beacon block.
    pub async fn finalized_block(&self) -> Result<BeaconBlock> {
        self.block_at("finalized")
            .await?
            .ok_or_else(|| Error::BeaconApi("finalized block not found".into()))
    }

    /// The block at `slot`, or `None` when the slot was missed.
    pub async fn block_at_slot(&self, slot: u64) -> Result<Option<BeaconBlock>> {
        self.block_at(&slot.to_string()).await
    }

    async fn block_at(&self, block_id: &str) -> Result<Option<BeaconBlock>> {
        let url = format!("{}/eth/v2/beacon/blocks/{}", self.endpoint, block_id);
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::BeaconApi(format!(
                "GET {} status {}",
                url,
                response.status()
            )));
        }
        let block: Wrapped<BlockData> = response.json().await?;
        Ok(Some(BeaconBlock {
            slot: block.data.message.slot,
            execution_block_number: block.data.message.body.execution_payload.block_number,
        }))
    }

    /// Validator entries at `slot` for the given pubkeys (hex with 0x).
    /// Pubkeys unknown to the state are simply absent from the result.
    pub async fn validators_at_slot(
        &self,
        slot: u64,
        pubkeys: &[String],
    ) -> Result<Vec<ValidatorEntry>> {
        if pubkeys.is_empty() {
            return Ok(vec![]);
        }
        let url = format!(
            "{}/eth/v1/beacon/states/{}/validators",
            self.endpoint, slot
        );
        let response = self
            .http
            .get(&url)
            .query(&[("id", pubkeys.join(","))])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::BeaconApi(format!(
                "GET {} status {}",
                url,
                response.status()
            )));
        }
        let body: Wrapped<Vec<ValidatorEntry>> = response.json().await?;
        Ok(body.data)
    }

    async fn get<R: DeserializeOwned>(&self, url: &str) -> Result<R> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::BeaconApi(format!(
                "GET {} status {}",
                url,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct GenesisData {
    #[serde(deserialize_with = "string_u64")]
    genesis_time: u64,
}

#[derive(Debug, Deserialize)]
struct SpecData {
    #[serde(rename = "SECONDS_PER_SLOT", deserialize_with = "string_u64")]
    seconds_per_slot: u64,
    #[serde(rename = "SLOTS_PER_EPOCH", deserialize_with = "string_u64")]
    slots_per_epoch: u64,
}

#[derive(Debug, Deserialize)]
struct FinalityCheckpoints {
    finalized: Checkpoint,
}

#[derive(Debug, Deserialize)]
struct Checkpoint {
    #[serde(deserialize_with = "string_u64")]
    epoch: u64,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    message: BlockMessage,
}

#[derive(Debug, Deserialize)]
struct BlockMessage {
    #[serde(deserialize_with = "string_u64")]
    slot: u64,
    body: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    execution_payload: ExecutionPayload,
}

#[derive(Debug, Deserialize)]
struct ExecutionPayload {
    #[serde(deserialize_with = "string_u64")]
    block_number: u64,
}

/// The beacon API encodes every integer as a decimal string.
fn string_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}
