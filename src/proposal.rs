//! Deterministic proposal identifiers.
//!
//! Every voter derives the identical 32-byte id from the same semantic
//! arguments; the on-chain proposal contract counts matching ids toward the
//! quorum. The packing follows the contract's `abi.encodePacked` layout:
//! an ASCII tag, then each integer argument left-padded to 32 bytes.

use ethers::types::U256;
use ethers::utils::keccak256;

use crate::types::DistributeType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    SubmitBalances {
        block: U256,
        total_eth: U256,
        lsd_token_supply: U256,
    },
    VoteWithdrawCredentials {
        pubkey: Vec<u8>,
    },
    SetMerkleRoot {
        dealed_epoch: U256,
        merkle_root: [u8; 32],
        node_rewards_file_cid: String,
    },
    Distribute {
        distribute_type: DistributeType,
        dealed_height: U256,
        user_amount: U256,
        node_amount: U256,
        platform_amount: U256,
        max_claimable_withdraw_index: U256,
    },
}

impl Proposal {
    pub fn id(&self) -> [u8; 32] {
        keccak256(self.packed())
    }

    fn packed(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::SubmitBalances {
                block,
                total_eth,
                lsd_token_supply,
            } => {
                out.extend_from_slice(b"submitBalances");
                pack_u256(&mut out, *block);
                pack_u256(&mut out, *total_eth);
                pack_u256(&mut out, *lsd_token_supply);
            }
            Self::VoteWithdrawCredentials { pubkey } => {
                out.extend_from_slice(b"voteWithdrawCredentials");
                out.extend_from_slice(pubkey);
            }
            Self::SetMerkleRoot {
                dealed_epoch,
                merkle_root,
                node_rewards_file_cid,
            } => {
                out.extend_from_slice(b"setMerkleRoot");
                pack_u256(&mut out, *dealed_epoch);
                out.extend_from_slice(merkle_root);
                out.extend_from_slice(node_rewards_file_cid.as_bytes());
            }
            Self::Distribute {
                distribute_type,
                dealed_height,
                user_amount,
                node_amount,
                platform_amount,
                max_claimable_withdraw_index,
            } => {
                out.extend_from_slice(b"distribute");
                pack_u256(&mut out, U256::from(distribute_type.as_u8()));
                pack_u256(&mut out, *dealed_height);
                pack_u256(&mut out, *user_amount);
                pack_u256(&mut out, *node_amount);
                pack_u256(&mut out, *platform_amount);
                pack_u256(&mut out, *max_claimable_withdraw_index);
            }
        }
        out
    }
}

fn pack_u256(out: &mut Vec<u8>, value: U256) {
    let mut padded = [0u8; 32];
    value.to_big_endian(&mut padded);
    out.extend_from_slice(&padded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_balances_packing() {
        let proposal = Proposal::SubmitBalances {
            block: U256::from(123456u64),
            total_eth: U256::exp10(21),
            lsd_token_supply: U256::exp10(20),
        };
        let mut preimage = b"submitBalances".to_vec();
        for v in [U256::from(123456u64), U256::exp10(21), U256::exp10(20)] {
            let mut buf = [0u8; 32];
            v.to_big_endian(&mut buf);
            preimage.extend_from_slice(&buf);
        }
        assert_eq!(proposal.id(), keccak256(preimage));
    }

    #[test]
    fn vote_withdraw_credentials_packing() {
        let pubkey = vec![0xaa; 48];
        let proposal = Proposal::VoteWithdrawCredentials {
            pubkey: pubkey.clone(),
        };
        let mut preimage = b"voteWithdrawCredentials".to_vec();
        preimage.extend_from_slice(&pubkey);
        assert_eq!(proposal.id(), keccak256(preimage));
    }

    #[test]
    fn deterministic_and_byte_sensitive() {
        let base = Proposal::SetMerkleRoot {
            dealed_epoch: U256::from(75u64),
            merkle_root: [7u8; 32],
            node_rewards_file_cid: "bafybeigdyrztest".into(),
        };
        let same = Proposal::SetMerkleRoot {
            dealed_epoch: U256::from(75u64),
            merkle_root: [7u8; 32],
            node_rewards_file_cid: "bafybeigdyrztest".into(),
        };
        assert_eq!(base.id(), same.id());

        let other_epoch = Proposal::SetMerkleRoot {
            dealed_epoch: U256::from(150u64),
            merkle_root: [7u8; 32],
            node_rewards_file_cid: "bafybeigdyrztest".into(),
        };
        assert_ne!(base.id(), other_epoch.id());

        let other_cid = Proposal::SetMerkleRoot {
            dealed_epoch: U256::from(75u64),
            merkle_root: [7u8; 32],
            node_rewards_file_cid: "bafybeigdyrzother".into(),
        };
        assert_ne!(base.id(), other_cid.id());
    }

    #[test]
    fn distribute_type_is_part_of_the_id() {
        let make = |distribute_type| Proposal::Distribute {
            distribute_type,
            dealed_height: U256::from(1000u64),
            user_amount: U256::exp10(18),
            node_amount: U256::exp10(17),
            platform_amount: U256::exp10(16),
            max_claimable_withdraw_index: U256::from(42u64),
        };
        assert_ne!(
            make(DistributeType::Withdrawals).id(),
            make(DistributeType::PriorityFee).id()
        );
    }
}
