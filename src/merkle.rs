//! Binary merkle tree over node-reward leaves.
//!
//! Matches the on-chain verifier: leaves are keccak hashes, every pair is
//! hashed in numeric order so proofs need no direction bits, and an odd node
//! at any level is promoted to the next level unchanged.

use ethers::types::{Address, U256};
use ethers::utils::keccak256;

use crate::error::{Error, Result};

pub type NodeHash = [u8; 32];

/// Hash of a single node-reward leaf:
/// `keccak(pad32(index) || address || pad32(totalReward) || pad32(totalExitDeposit))`.
pub fn node_reward_leaf(
    index: u32,
    address: Address,
    total_reward_amount: U256,
    total_exit_deposit_amount: U256,
) -> NodeHash {
    let mut preimage = Vec::with_capacity(32 + 20 + 32 + 32);
    preimage.extend_from_slice(&pad32(U256::from(index)));
    preimage.extend_from_slice(address.as_bytes());
    preimage.extend_from_slice(&pad32(total_reward_amount));
    preimage.extend_from_slice(&pad32(total_exit_deposit_amount));
    keccak256(preimage)
}

fn pad32(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

fn pair_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let (lo, hi) = if left <= right {
        (left, right)
    } else {
        (right, left)
    };
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(lo);
    preimage[32..].copy_from_slice(hi);
    keccak256(preimage)
}

#[derive(Debug)]
pub struct MerkleTree {
    // layers[0] is the leaf level, last layer holds the single root.
    layers: Vec<Vec<NodeHash>>,
}

impl MerkleTree {
    pub fn build(leaves: Vec<NodeHash>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(Error::EmptyMerkleLeaves);
        }
        let mut layers = vec![leaves];
        while layers.last().map(Vec::len) > Some(1) {
            let prev = layers.last().expect("at least one layer");
            let mut next = Vec::with_capacity((prev.len() + 1) / 2);
            for pair in prev.chunks(2) {
                match pair {
                    [left, right] => next.push(pair_hash(left, right)),
                    [odd] => next.push(*odd),
                    _ => unreachable!("chunks(2) yields 1 or 2 nodes"),
                }
            }
            layers.push(next);
        }
        Ok(Self { layers })
    }

    pub fn root(&self) -> NodeHash {
        self.layers.last().and_then(|l| l.first()).copied().expect("tree is never empty")
    }

    /// Sibling hashes from the leaf level up to (excluding) the root.
    pub fn proof(&self, leaf: &NodeHash) -> Result<Vec<NodeHash>> {
        let mut index = self.layers[0]
            .iter()
            .position(|l| l == leaf)
            .ok_or(Error::LeafNotFound)?;
        let mut path = Vec::with_capacity(self.layers.len());
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = if index % 2 == 0 { index + 1 } else { index - 1 };
            if let Some(hash) = layer.get(sibling) {
                path.push(*hash);
            }
            // odd node promoted unchanged, no sibling at this level.
            index /= 2;
        }
        Ok(path)
    }
}

/// Recomputes the root from a leaf and its proof path.
pub fn verify_proof(leaf: &NodeHash, proof: &[NodeHash], root: &NodeHash) -> bool {
    let computed = proof.iter().fold(*leaf, |acc, sibling| pair_hash(&acc, sibling));
    computed == *root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u32) -> Vec<NodeHash> {
        (0..n)
            .map(|i| {
                node_reward_leaf(
                    i,
                    Address::from_low_u64_be(u64::from(i) + 1),
                    U256::from(i) * U256::exp10(17),
                    U256::zero(),
                )
            })
            .collect()
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            MerkleTree::build(vec![]),
            Err(Error::EmptyMerkleLeaves)
        ));
    }

    #[test]
    fn three_leaf_root_shape() {
        let ls = leaves(3);
        let tree = MerkleTree::build(ls.clone()).unwrap();
        // [A, B, C]: the odd leaf C is promoted one level.
        let expected = pair_hash(&pair_hash(&ls[0], &ls[1]), &ls[2]);
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn every_leaf_proof_verifies() {
        for n in [2u32, 3, 4, 5, 8, 13] {
            let ls = leaves(n);
            let tree = MerkleTree::build(ls.clone()).unwrap();
            let root = tree.root();
            for leaf in &ls {
                let proof = tree.proof(leaf).unwrap();
                assert!(verify_proof(leaf, &proof, &root), "n={}", n);
            }
        }
    }

    #[test]
    fn foreign_leaf_does_not_verify() {
        let ls = leaves(5);
        let tree = MerkleTree::build(ls.clone()).unwrap();
        let root = tree.root();
        let proof = tree.proof(&ls[2]).unwrap();
        let outsider =
            node_reward_leaf(9, Address::from_low_u64_be(99), U256::exp10(18), U256::zero());
        assert!(!verify_proof(&outsider, &proof, &root));
    }

    #[test]
    fn missing_leaf_is_an_error() {
        let tree = MerkleTree::build(leaves(4)).unwrap();
        let outsider = node_reward_leaf(7, Address::from_low_u64_be(70), U256::zero(), U256::zero());
        assert!(matches!(tree.proof(&outsider), Err(Error::LeafNotFound)));
    }

    #[test]
    fn pair_order_is_commutative() {
        let ls = leaves(2);
        assert_eq!(pair_hash(&ls[0], &ls[1]), pair_hash(&ls[1], &ls[0]));
    }
}
