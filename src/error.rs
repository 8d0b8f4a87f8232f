use ethers::types::{Address, H256};

use crate::contracts::EthClient;

/// An enum of all possible errors that could be encountered during the
/// execution of the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Smart contract error.
    #[error(transparent)]
    EthersContractCall(#[from] ethers::contract::ContractError<EthClient>),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWallet(#[from] ethers::signers::WalletError),
    /// HTTP Error.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Hex decoding error.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// Date parsing error in day strings.
    #[error(transparent)]
    DayParse(#[from] chrono::ParseError),
    /// Beacon node returned an unexpected response.
    #[error("beacon api error: {}", _0)]
    BeaconApi(String),
    /// A gas price oracle returned an unexpected response.
    #[error("gas oracle error: {}", _0)]
    GasOracle(String),
    /// No beacon block with an execution payload inside the given epoch.
    #[error("no execution block found in epoch {}", _0)]
    EpochBlockMissing(u64),
    /// Invalid configuration value, fatal at startup.
    #[error("invalid config: {}", _0)]
    InvalidConfig(String),
    /// A loaded node-rewards file contains the same address twice.
    #[error("duplicate node address: {:?}", _0)]
    DuplicateNodeAddress(Address),
    /// The SetMerkleRoot log for an epoch claimed on-chain is missing.
    #[error("SetMerkleRoot event not found for epoch {}", _0)]
    MerkleRootEventMissing(u64),
    /// Merkle tree built from an empty leaf list.
    #[error("merkle tree leaves empty")]
    EmptyMerkleLeaves,
    /// A leaf was not found in the merkle tree.
    #[error("leaf not found in merkle tree")]
    LeafNotFound,
    /// A present leaf produced an empty proof path.
    #[error("empty merkle proof for leaf at index {}", _0)]
    EmptyProof(u32),
    /// Transaction reverted on chain.
    #[error("tx {:?} failed on chain", _0)]
    TxFailed(H256),
    /// Transaction polling exhausted the retry budget.
    #[error("tx {:?} reached retry limit", _0)]
    TxRetryLimit(H256),
    /// An on-chain validator status byte outside the known set.
    #[error("unknown validator status: {}", _0)]
    UnknownValidatorStatus(u8),
    /// An on-chain node type byte outside the known set.
    #[error("unknown node type: {}", _0)]
    UnknownNodeType(u8),
    /// Web3 storage upload/download failure.
    #[error("web3 storage error: {}", _0)]
    Web3Storage(String),
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

/// A type alias for the result for the relay, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
