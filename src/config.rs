use std::path::{Path, PathBuf};
use std::str::FromStr;

use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

fn default_store_path() -> PathBuf {
    PathBuf::from("./lsd-relay-data")
}

fn default_node_rewards_path() -> PathBuf {
    PathBuf::from("./lsd-relay-data/node-rewards")
}

const fn default_batch_request_blocks() -> u64 {
    32
}

/// Top level configuration of the relay, loaded from a TOML or JSON file
/// with an environment overlay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Execution layer JSON-RPC endpoint.
    pub eth1_endpoint: Url,
    /// Beacon node HTTP endpoint.
    pub eth2_endpoint: Url,
    /// Gas limit for every vote transaction, decimal.
    pub gas_limit: String,
    /// Upper bound on the gas price the relay will ever pay, decimal wei.
    pub max_gas_price: String,
    /// When set, the factory is polled for entrusted LSD tokens and one
    /// service is run per token; otherwise only the statically configured
    /// token is served.
    #[serde(default)]
    pub run_for_entrusted_lsd_network: bool,
    /// The voter account key. Either raw `0x…` hex or `$ENV_VAR` holding it.
    #[serde(skip_serializing)]
    pub private_key: PrivateKey,
    /// Directory for the per-service cursor files.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Directory where node-rewards files are written before upload.
    #[serde(default = "default_node_rewards_path")]
    pub node_rewards_path: PathBuf,
    /// How many blocks a single event query spans.
    #[serde(default = "default_batch_request_blocks")]
    pub batch_request_blocks_count: u64,
    pub web3_storage: Web3StorageConfig,
    pub contracts: ContractsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContractsConfig {
    /// The LSD network factory.
    pub lsd_factory_address: Address,
    /// The token to serve when not running for the entrusted network.
    #[serde(default)]
    pub lsd_token_address: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Web3StorageConfig {
    /// Upload endpoint of the content-addressed store.
    pub endpoint: Url,
    /// Gateway used to fetch previously published files by CID.
    pub gateway: Url,
    /// Optional bearer token for uploads.
    #[serde(default)]
    pub token: Option<String>,
}

impl Config {
    /// Parsed gas limit; zero or unparsable values are a startup error.
    pub fn gas_limit_wei(&self) -> Result<U256> {
        parse_positive(&self.gas_limit, "gas-limit")
    }

    /// Parsed gas price bound; zero or unparsable values are a startup error.
    pub fn max_gas_price_wei(&self) -> Result<U256> {
        parse_positive(&self.max_gas_price, "max-gas-price")
    }

    pub fn wallet(&self) -> Result<LocalWallet> {
        let key = SigningKey::from_slice(self.private_key.as_bytes())
            .map_err(|err| Error::InvalidConfig(format!("invalid private key: {}", err)))?;
        Ok(LocalWallet::from(key))
    }
}

fn parse_positive(raw: &str, name: &str) -> Result<U256> {
    let value = U256::from_dec_str(raw.trim())
        .map_err(|err| Error::InvalidConfig(format!("{} {:?}: {}", name, raw, err)))?;
    if value.is_zero() {
        return Err(Error::InvalidConfig(format!("{} is zero", name)));
    }
    Ok(value)
}

/// Loads the configuration from `path`, merging in the environment with an
/// `LSD` prefix.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let format = match path.as_ref().extension().and_then(|e| e.to_str()) {
        Some("json") => config::FileFormat::Json,
        _ => config::FileFormat::Toml,
    };
    let raw = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).format(format))
        .add_source(config::Environment::with_prefix("LSD").separator("_"))
        .build()?;
    let config: Config = serde_path_to_error::deserialize(raw)?;
    Ok(config)
}

/// A 32-byte secp256k1 secret.
///
/// Accepted forms:
/// 1. raw hex with the `0x` prefix, 66 chars total;
/// 2. `$ENV_VAR` naming an environment variable that holds form 1.
#[derive(Clone)]
pub struct PrivateKey(H256);

impl PrivateKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVisitor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVisitor {
            type Value = H256;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("hex string or an env var containing a hex string in it")
            }

            fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {}: {}",
                            var, e,
                        ))
                    })?;
                    H256::from_str(&val).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{}: expected a 66 chars hex string including the 0x prefix",
                            e
                        ))
                    })
                } else if value.starts_with("0x") {
                    H256::from_str(value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{}: expected a 66 chars hex string including the 0x prefix",
                            e
                        ))
                    })
                } else {
                    Err(serde::de::Error::custom(
                        "expected a 0x-prefixed hex key or a $ENV_VAR reference",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVisitor)?;
        Ok(Self(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_amounts_parse() {
        assert_eq!(parse_positive("3000000", "gas-limit").unwrap(), U256::from(3_000_000u64));
        assert!(parse_positive("0", "gas-limit").is_err());
        assert!(parse_positive("not-a-number", "gas-limit").is_err());
    }

    #[test]
    fn loads_a_minimal_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
eth1-endpoint = "http://127.0.0.1:8545"
eth2-endpoint = "http://127.0.0.1:5052"
gas-limit = "3000000"
max-gas-price = "600000000000"
run-for-entrusted-lsd-network = true
private-key = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d"

[web3-storage]
endpoint = "https://api.web3.storage"
gateway = "https://w3s.link"

[contracts]
lsd-factory-address = "0x1234567890123456789012345678901234567890"
"#,
        )
        .unwrap();
        let config = load(&path).unwrap();
        assert!(config.run_for_entrusted_lsd_network);
        assert_eq!(config.batch_request_blocks_count, 32);
        assert_eq!(config.gas_limit_wei().unwrap(), U256::from(3_000_000u64));
        assert!(config.contracts.lsd_token_address.is_none());
        config.wallet().unwrap();
    }

    #[test]
    fn private_key_from_env() {
        std::env::set_var(
            "LSD_TEST_PRIVATE_KEY",
            "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
        );
        let json = r#""$LSD_TEST_PRIVATE_KEY""#;
        let key: PrivateKey = serde_json::from_str(json).unwrap();
        assert_eq!(key.as_bytes().len(), 32);
    }

    #[test]
    fn private_key_rejects_bare_strings() {
        let json = r#""deadbeef""#;
        assert!(serde_json::from_str::<PrivateKey>(json).is_err());
    }
}
