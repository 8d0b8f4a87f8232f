//! Cycle accounting and merkle-root publication.
//!
//! Once per cycle the relay folds every node's new rewards into the running
//! totals carried by the previous cycle's published file, rebuilds the tree,
//! uploads the file to content-addressed storage and votes the root. All
//! inputs are historical chain state, so a crashed relay reconstructs the
//! identical proposal on restart and the on-chain vote check short-circuits.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::merkle::{node_reward_leaf, MerkleTree};
use crate::proposal::Proposal;
use crate::types::ValidatorStatus;
use crate::web3storage::node_rewards_file_name;

use super::{split_withdrawal, Service};

/// One leaf of the published accounting: a node operator's cumulative reward
/// and exited-deposit totals up to the cycle's target epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeReward {
    pub address: Address,
    #[serde(default)]
    pub index: u32,
    #[serde(with = "u256_decimal")]
    pub total_reward_amount: U256,
    #[serde(with = "u256_decimal")]
    pub total_exit_deposit_amount: U256,
    #[serde(default)]
    pub proof: String,
}

mod u256_decimal {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_dec_str(&raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) async fn set_merkle_root(srv: Arc<Service>) -> Result<()> {
    let Some((dealed_epoch_onchain, target_epoch, target_block)) =
        check_state(&srv).await?
    else {
        return Ok(());
    };

    // carry forward the totals published for the previous cycle.
    let (dealed_block, pre_list) = if dealed_epoch_onchain > 0 {
        let cid = find_rewards_file_cid(&srv, dealed_epoch_onchain).await?;
        let bytes = srv
            .web3_storage
            .get(&cid, &node_rewards_file_name(dealed_epoch_onchain))
            .await?;
        let list: Vec<NodeReward> = serde_json::from_slice(&bytes)?;
        ensure_unique_addresses(&list)?;
        let block = srv.connection.epoch_start_block(dealed_epoch_onchain).await?;
        (block, list)
    } else {
        (srv.network_create_block, Vec::new())
    };

    let new_rewards = srv.node_new_rewards_between(dealed_block, target_block).await;
    let merged = merge_node_rewards(&pre_list, &new_rewards);
    let (root, final_list) = build_proofs(merged)?;

    let file_bytes = serde_json::to_vec(&final_list)?;
    let file_name = node_rewards_file_name(target_epoch);
    std::fs::create_dir_all(&srv.node_rewards_dir)?;
    std::fs::write(srv.node_rewards_dir.join(&file_name), &file_bytes)?;
    let cid = srv.web3_storage.put(&file_name, file_bytes).await?;

    let proposal = Proposal::SetMerkleRoot {
        dealed_epoch: target_epoch.into(),
        merkle_root: root,
        node_rewards_file_cid: cid.clone(),
    };
    let voter = srv.connection.signer_address();
    if srv
        .network_proposal
        .has_voted(proposal.id(), voter)
        .call()
        .await?
    {
        tracing::debug!(target_epoch, "merkle root already voted");
        return Ok(());
    }

    tracing::info!(
        token = ?srv.lsd_token,
        target_epoch,
        cid = %cid,
        root = ?H256::from(root),
        nodes = final_list.len(),
        "setting merkle root"
    );
    let opts = srv.connection.lock_and_update_tx_opts().await?;
    let mut call = srv
        .network_withdraw
        .set_merkle_root(U256::from(target_epoch), root, cid)
        .gas(opts.gas_limit)
        .gas_price(opts.gas_price);
    call.tx.set_nonce(opts.nonce);
    let pending = call.send().await?;
    let tx_hash = *pending;
    drop(pending);
    tracing::info!(tx = ?tx_hash, "sent setMerkleRoot tx");
    srv.connection.wait_tx_ok(tx_hash).await?;
    drop(opts);

    srv.state.lock().await.latest_merkle_root_epoch = target_epoch;
    Ok(())
}

/// Returns `(dealedEpochOnchain, targetEpoch, targetBlock)` when a new cycle
/// is both due and fully synced, `None` otherwise.
async fn check_state(srv: &Service) -> Result<Option<(u64, u64, u64)>> {
    let head = srv.connection.beacon_head().await?;
    let du = srv.merkle_root_du_epochs;
    let target_epoch = head.finalized_epoch / du * du;

    let dealed_epoch_onchain = srv
        .network_withdraw
        .latest_merkle_root_epoch()
        .call()
        .await?
        .as_u64();
    if target_epoch <= dealed_epoch_onchain {
        tracing::debug!(target_epoch, dealed_epoch_onchain, "merkle root not yet due");
        return Ok(None);
    }
    let target_block = srv.connection.epoch_start_block(target_epoch).await?;
    let state = srv.state.lock().await;
    if target_block > state.latest_block_of_sync_block {
        tracing::debug!(
            target_block,
            synced = state.latest_block_of_sync_block,
            "merkle root waiting for sync"
        );
        return Ok(None);
    }
    Ok(Some((dealed_epoch_onchain, target_epoch, target_block)))
}

/// The CID published with the SetMerkleRoot vote of `epoch`.
async fn find_rewards_file_cid(srv: &Service, epoch: u64) -> Result<String> {
    let mut topic = [0u8; 32];
    U256::from(epoch).to_big_endian(&mut topic);
    let events = srv
        .network_withdraw
        .set_merkle_root_filter()
        .topic1(H256::from(topic))
        .from_block(srv.network_create_block)
        .query()
        .await?;
    events
        .into_iter()
        .next()
        .map(|event| event.node_rewards_file_cid)
        .ok_or(Error::MerkleRootEventMissing(epoch))
}

fn ensure_unique_addresses(list: &[NodeReward]) -> Result<()> {
    let mut seen = HashSet::with_capacity(list.len());
    for reward in list {
        if !seen.insert(reward.address) {
            return Err(Error::DuplicateNodeAddress(reward.address));
        }
    }
    Ok(())
}

impl Service {
    /// Per-node reward deltas over the block window `(from, to]`: node shares
    /// of indexed beacon withdrawals plus the node side of every executed
    /// priority-fee distribution, spread over nodes by active validator
    /// count.
    pub(crate) async fn node_new_rewards_between(&self, from: u64, to: u64) -> Vec<NodeReward> {
        let state = self.state.lock().await;
        let mut totals: BTreeMap<Address, (U256, U256)> = BTreeMap::new();

        for (_, records) in state
            .withdrawals
            .range((Bound::Excluded(from), Bound::Included(to)))
        {
            for record in records {
                let Some(validator) = state
                    .validator_index_to_pubkey
                    .get(&record.validator_index)
                    .and_then(|pubkey| state.validators.get(pubkey))
                else {
                    continue;
                };
                let split = split_withdrawal(validator.node_deposit_amount, record.amount);
                let entry = totals.entry(validator.node_address).or_default();
                entry.0 += split.node;
                entry.1 += split.node_exit_deposit;
            }
        }

        let mut counts: BTreeMap<Address, u64> = BTreeMap::new();
        let mut total_active = 0u64;
        for validator in state.validators.values() {
            if validator.status.beacon_rank() == ValidatorStatus::Active.beacon_rank() {
                *counts.entry(validator.node_address).or_default() += 1;
                total_active += 1;
            }
        }
        if total_active > 0 {
            for (_, node_amount) in state
                .priority_fee_distributions
                .range((Bound::Excluded(from), Bound::Included(to)))
            {
                for (address, count) in &counts {
                    let share = *node_amount * U256::from(*count) / U256::from(total_active);
                    totals.entry(*address).or_default().0 += share;
                }
            }
        }

        totals
            .into_iter()
            .filter(|(_, (reward, exit))| !reward.is_zero() || !exit.is_zero())
            .map(|(address, (reward, exit))| NodeReward {
                address,
                index: 0,
                total_reward_amount: reward,
                total_exit_deposit_amount: exit,
                proof: String::new(),
            })
            .collect()
    }
}

/// Sums both lists by address and re-indexes the result, sorted by address
/// ascending.
pub(crate) fn merge_node_rewards(pre: &[NodeReward], new: &[NodeReward]) -> Vec<NodeReward> {
    let mut merged: BTreeMap<Address, NodeReward> = BTreeMap::new();
    for reward in pre.iter().chain(new.iter()) {
        merged
            .entry(reward.address)
            .and_modify(|existing| {
                existing.total_reward_amount += reward.total_reward_amount;
                existing.total_exit_deposit_amount += reward.total_exit_deposit_amount;
            })
            .or_insert_with(|| NodeReward {
                address: reward.address,
                index: 0,
                total_reward_amount: reward.total_reward_amount,
                total_exit_deposit_amount: reward.total_exit_deposit_amount,
                proof: String::new(),
            });
    }
    merged
        .into_values()
        .enumerate()
        .map(|(position, mut reward)| {
            reward.index = position as u32;
            reward
        })
        .collect()
}

/// Builds the tree and fills in every leaf's proof, `":"`-joined hex. An
/// empty list publishes the zero root.
pub(crate) fn build_proofs(mut list: Vec<NodeReward>) -> Result<([u8; 32], Vec<NodeReward>)> {
    if list.is_empty() {
        return Ok(([0u8; 32], list));
    }
    let leaves: Vec<_> = list
        .iter()
        .map(|reward| {
            node_reward_leaf(
                reward.index,
                reward.address,
                reward.total_reward_amount,
                reward.total_exit_deposit_amount,
            )
        })
        .collect();
    let tree = MerkleTree::build(leaves.clone())?;
    let root = tree.root();
    for (leaf, reward) in leaves.iter().zip(list.iter_mut()) {
        let proof = tree.proof(leaf)?;
        if proof.is_empty() {
            return Err(Error::EmptyProof(reward.index));
        }
        let segments: Vec<String> = proof.iter().map(hex::encode).collect();
        reward.proof = segments.join(":");
    }
    Ok((root, list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::verify_proof;

    fn reward(address_seed: u64, reward_wei: u64, exit_wei: u64) -> NodeReward {
        NodeReward {
            address: Address::from_low_u64_be(address_seed),
            index: 0,
            total_reward_amount: U256::from(reward_wei),
            total_exit_deposit_amount: U256::from(exit_wei),
            proof: String::new(),
        }
    }

    #[test]
    fn merge_sums_by_address_and_indexes_sorted() {
        let pre = vec![reward(3, 100, 0), reward(1, 50, 10)];
        let new = vec![reward(3, 7, 1), reward(2, 5, 0)];
        let merged = merge_node_rewards(&pre, &new);
        assert_eq!(merged.len(), 3);
        // sorted by address ascending, index equals position.
        assert_eq!(merged[0].address, Address::from_low_u64_be(1));
        assert_eq!(merged[1].address, Address::from_low_u64_be(2));
        assert_eq!(merged[2].address, Address::from_low_u64_be(3));
        for (position, entry) in merged.iter().enumerate() {
            assert_eq!(entry.index, position as u32);
        }
        assert_eq!(merged[2].total_reward_amount, U256::from(107u64));
        assert_eq!(merged[2].total_exit_deposit_amount, U256::from(1u64));
    }

    #[test]
    fn merge_is_deterministic() {
        let pre = vec![reward(9, 1, 0), reward(4, 2, 0)];
        let new = vec![reward(7, 3, 0)];
        assert_eq!(
            merge_node_rewards(&pre, &new),
            merge_node_rewards(&pre, &new)
        );
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let list = vec![reward(1, 1, 0), reward(2, 1, 0), reward(1, 2, 0)];
        assert!(matches!(
            ensure_unique_addresses(&list),
            Err(Error::DuplicateNodeAddress(_))
        ));
        assert!(ensure_unique_addresses(&list[..2]).is_ok());
    }

    #[test]
    fn proofs_verify_against_root() {
        let list = merge_node_rewards(
            &[reward(1, 100, 0), reward(2, 200, 5), reward(3, 300, 0)],
            &[reward(4, 400, 0)],
        );
        let (root, with_proofs) = build_proofs(list).unwrap();
        for entry in &with_proofs {
            let leaf = node_reward_leaf(
                entry.index,
                entry.address,
                entry.total_reward_amount,
                entry.total_exit_deposit_amount,
            );
            let proof: Vec<[u8; 32]> = entry
                .proof
                .split(':')
                .map(|segment| {
                    let bytes = hex::decode(segment).unwrap();
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&bytes);
                    hash
                })
                .collect();
            assert!(verify_proof(&leaf, &proof, &root));
        }
    }

    #[test]
    fn empty_list_publishes_zero_root() {
        let (root, list) = build_proofs(vec![]).unwrap();
        assert_eq!(root, [0u8; 32]);
        assert!(list.is_empty());
    }

    #[test]
    fn file_round_trips_with_decimal_amounts() {
        let list = merge_node_rewards(&[reward(1, 123, 7)], &[reward(2, 456, 0)]);
        let (_, with_proofs) = build_proofs(list).unwrap();
        let json = serde_json::to_string(&with_proofs).unwrap();
        assert!(json.contains("\"totalRewardAmount\":\"123\""));
        assert!(json.contains("\"totalExitDepositAmount\":\"7\""));
        assert!(json.contains("\"proof\":"));
        let parsed: Vec<NodeReward> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, with_proofs);
    }
}
