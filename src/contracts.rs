//! Typed bindings for the LSD network contracts.
//!
//! Only the surface the relay actually drives is bound here; everything else
//! the contracts expose stays opaque.

use ethers::prelude::abigen;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;

/// The signing execution-layer client every contract handle is built over.
pub type EthClient = ethers::middleware::SignerMiddleware<Provider<Http>, LocalWallet>;

abigen!(
    LsdNetworkFactory,
    r#"[
        function getEntrustedLsdTokens() external view returns (address[])
        function networkContractsOfLsdToken(address lsdToken) external view returns (address, address, address, address, address, uint256)
    ]"#
);

abigen!(
    NetworkProposal,
    r#"[
        function hasVoted(bytes32 proposalId, address voter) external view returns (bool)
    ]"#
);

abigen!(
    NetworkBalances,
    r#"[
        function latestBalancesBlock() external view returns (uint256)
        function updateBalancesEpochs() external view returns (uint256)
        function submitBalances(uint256 blockNumber, uint256 totalEth, uint256 lsdTokenSupply) external
    ]"#
);

abigen!(
    NetworkWithdraw,
    r#"[
        function latestMerkleRootEpoch() external view returns (uint256)
        function merkleRootDuEpochs() external view returns (uint256)
        function latestDistributeWithdrawalsDealedHeight() external view returns (uint256)
        function latestDistributePriorityFeeDealedHeight() external view returns (uint256)
        function maxClaimableWithdrawIndex() external view returns (uint256)
        function setMerkleRoot(uint256 dealedEpoch, bytes32 merkleRoot, string nodeRewardsFileCid) external
        function distribute(uint8 distributeType, uint256 dealedHeight, uint256 userAmount, uint256 nodeAmount, uint256 platformAmount, uint256 maxClaimableWithdrawIndex) external
        event SetMerkleRoot(uint256 indexed dealedEpoch, bytes32 merkleRoot, string nodeRewardsFileCid)
        event DistributeRewards(uint8 distributeType, uint256 dealedHeight, uint256 userAmount, uint256 nodeAmount, uint256 platformAmount, uint256 maxClaimableWithdrawIndex)
        event Unstake(address indexed from, uint256 lsdTokenAmount, uint256 ethAmount, uint256 withdrawIndex, bool instantly)
        event Withdraw(address indexed from, uint256[] withdrawIndexList)
    ]"#
);

abigen!(
    NodeDeposit,
    r#"[
        function withdrawCredentials() external view returns (bytes)
        function voteWithdrawCredentials(bytes[] pubkeys, bool[] matchs) external
        event Deposited(address node, uint8 nodeType, bytes pubkey, bytes withdrawCredentials, uint256 amount)
        event Staked(address node, bytes pubkey)
    ]"#
);

abigen!(
    LsdToken,
    r#"[
        function totalSupply() external view returns (uint256)
    ]"#
);

/// Addresses of one LSD token's network contracts, as registered on the
/// factory, plus the block the network was created at.
#[derive(Debug, Clone, Copy)]
pub struct NetworkContracts {
    pub network_proposal: ethers::types::Address,
    pub network_balances: ethers::types::Address,
    pub network_withdraw: ethers::types::Address,
    pub node_deposit: ethers::types::Address,
    pub fee_pool: ethers::types::Address,
    pub create_block: u64,
}

impl
    From<(
        ethers::types::Address,
        ethers::types::Address,
        ethers::types::Address,
        ethers::types::Address,
        ethers::types::Address,
        ethers::types::U256,
    )> for NetworkContracts
{
    fn from(
        value: (
            ethers::types::Address,
            ethers::types::Address,
            ethers::types::Address,
            ethers::types::Address,
            ethers::types::Address,
            ethers::types::U256,
        ),
    ) -> Self {
        Self {
            network_proposal: value.0,
            network_balances: value.1,
            network_withdraw: value.2,
            node_deposit: value.3,
            fee_pool: value.4,
            create_block: value.5.as_u64(),
        }
    }
}
