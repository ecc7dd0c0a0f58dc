//! tree - summation Merkle tree of delegated voting power.
//!
//! The tree is a complete binary tree kept as a flat array (it never changes after
//! construction). Local indices are 1-based: the root is 1, children of `i` are
//! `2i` and `2i+1`, and `nodes[i - 1]` holds node `i`.
//!
//! Hashing (SHA-256):
//!   leaf   = H(be256(sum))
//!   parent = H(left.hash ‖ be256(left.sum) ‖ right.hash ‖ be256(right.sum)), sum = left.sum + right.sum
//!
//! A tree may be a subtree of a larger virtual tree: `virtual_root_index` is the index
//! of this tree's root in the virtual tree. The network tree has root 1 and one leaf
//! per node; node `i`'s tree hangs below network leaf `leaf_count + i` (see `node.rs`).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ops::Deref;

use crate::index::ChecksumEntry;
use crate::store::{artifact_filename, block_entry_matches, CachedArtifact};
use crate::types::{Address, VotingPowerSnapshot, VotingTreeNode};
use crate::version::GENERATOR_VERSION;

mod node;
mod pollard;

pub use node::{node_index_for_tree_index, tree_index_for_node, NodeTreeKey, NodeVotingTree};
pub use pollard::{build_pollard_row_for_proposal, PollardBuilder, TreeHashPollardBuilder};

/// sum as a 32-byte big-endian integer (uint256 layout).
#[inline]
fn be256(sum: u128) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[16..].copy_from_slice(&sum.to_be_bytes());
    buf
}

/// Leaf node for a balance.
pub fn leaf_for_balance(balance: u128) -> VotingTreeNode {
    let hash: [u8; 32] = Sha256::digest(be256(balance)).into();
    VotingTreeNode { sum: balance, hash }
}

/// Parent of two nodes. Sums saturate instead of wrapping.
pub fn parent_of(left: &VotingTreeNode, right: &VotingTreeNode) -> VotingTreeNode {
    let mut h = Sha256::new();
    h.update(left.hash);
    h.update(be256(left.sum));
    h.update(right.hash);
    h.update(be256(right.sum));
    VotingTreeNode {
        sum: left.sum.saturating_add(right.sum),
        hash: h.finalize().into(),
    }
}

/// floor(log2(i)) for i >= 1: the level of local index `i` (root = level 0).
#[inline]
fn level_of(i: u64) -> u64 {
    63 - i.leading_zeros() as u64
}

/// Leaves of a tree over `count` entries (padded to a power of two, at least 1).
pub fn leaf_count_for(count: usize) -> u64 {
    count.max(1).next_power_of_two() as u64
}

/// Recompute a root from a node, its local index and its Merkle proof.
pub fn root_from_proof(node: &VotingTreeNode, local_index: u64, proof: &[VotingTreeNode]) -> VotingTreeNode {
    let mut cur = *node;
    let mut index = local_index;
    for sibling in proof {
        cur = if index % 2 == 0 {
            parent_of(&cur, sibling)
        } else {
            parent_of(sibling, &cur)
        };
        index /= 2;
    }
    cur
}

/// Artifacts for challenging one node of a proposed pollard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChallengeArtifacts {
    /// Virtual index of the first mismatching node.
    pub index: u64,
    /// The node as reconstructed from the proposed pollard.
    pub node: VotingTreeNode,
    /// Merkle proof for `node` within the proposed subtree.
    pub proof: Vec<VotingTreeNode>,
}

/// Summation tree shared by the network tree and the node trees.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingTree {
    pub generator_version: String,
    pub network: String,
    pub block_number: u32,
    pub depth: u64,
    pub virtual_root_index: u64,
    pub depth_per_round: u64,
    pub nodes: Vec<VotingTreeNode>,
}

impl VotingTree {
    /// Build a tree from leaves, padding with zero leaves up to a power of two.
    /// An empty leaf set becomes a single zero leaf.
    pub fn from_leaves(
        block_number: u32,
        network: &str,
        leaves: &[VotingTreeNode],
        virtual_root_index: u64,
        depth_per_round: u64,
    ) -> Self {
        let total_leaves = leaf_count_for(leaves.len()) as usize;
        let depth = total_leaves.trailing_zeros() as u64;

        let zero = leaf_for_balance(0);
        let mut nodes = vec![zero; total_leaves * 2 - 1];
        let leaf_start = total_leaves - 1;
        nodes[leaf_start..leaf_start + leaves.len()].copy_from_slice(leaves);

        // Снизу вверх: родитель j строится из 2j+1 и 2j+2 (0-based)
        for j in (0..leaf_start).rev() {
            nodes[j] = parent_of(&nodes[2 * j + 1], &nodes[2 * j + 2]);
        }

        Self {
            generator_version: GENERATOR_VERSION.to_string(),
            network: network.to_string(),
            block_number,
            depth,
            virtual_root_index,
            depth_per_round,
            nodes,
        }
    }

    pub fn root(&self) -> &VotingTreeNode {
        &self.nodes[0]
    }

    fn node_at(&self, local_index: u64) -> Result<&VotingTreeNode> {
        if local_index == 0 || local_index > self.nodes.len() as u64 {
            return Err(anyhow!(
                "tree index {} out of range (tree has {} nodes)",
                local_index,
                self.nodes.len()
            ));
        }
        Ok(&self.nodes[(local_index - 1) as usize])
    }

    /// Pollard rooted at the tree root, used for new proposals.
    pub fn pollard_for_proposal(&self) -> Result<(VotingTreeNode, Vec<VotingTreeNode>)> {
        self.pollard(self.virtual_root_index)
    }

    /// Pollard rooted at a challenged node (virtual index), used as a challenge response.
    pub fn artifacts_for_challenge_response(
        &self,
        challenged_index: u64,
    ) -> Result<(VotingTreeNode, Vec<VotingTreeNode>)> {
        self.pollard(challenged_index)
    }

    /// Compare a proposed pollard with ours; on the first mismatch return the
    /// challenge artifacts built from the proposed pollard. Ok(None) if they agree.
    pub fn check_for_challengeable_artifacts(
        &self,
        virtual_root_index: u64,
        proposed: &[VotingTreeNode],
    ) -> Result<Option<ChallengeArtifacts>> {
        let (_, local) = self.pollard(virtual_root_index)?;
        if local.len() != proposed.len() {
            return Err(anyhow!(
                "pollard size mismatch: local pollard = {} nodes, proposed pollard = {} nodes",
                local.len(),
                proposed.len()
            ));
        }

        let mismatch = local
            .iter()
            .zip(proposed)
            .position(|(l, p)| l.hash != p.hash || l.sum != p.sum);
        let i = match mismatch {
            Some(i) => i,
            None => return Ok(None),
        };

        // Первый индекс строки pollard-а равен её длине (индексы с 1)
        let local_index = local.len() as u64 + i as u64;
        let virtual_index = virtual_from_local(local_index, virtual_root_index);

        let subtree = Self::from_leaves(
            self.block_number,
            &self.network,
            proposed,
            virtual_root_index,
            self.depth_per_round,
        );
        let (node, proof) = subtree.artifacts_for_challenge(virtual_index)?;
        Ok(Some(ChallengeArtifacts {
            index: virtual_index,
            node,
            proof,
        }))
    }

    /// Node at a virtual index plus its Merkle proof.
    pub fn artifacts_for_challenge(&self, virtual_index: u64) -> Result<(VotingTreeNode, Vec<VotingTreeNode>)> {
        let local = self.local_from_virtual(virtual_index)?;
        let node = *self.node_at(local)?;
        Ok((node, self.merkle_proof(local)?))
    }

    /// Sibling path from `local_index` up to (excluding) the root.
    pub fn merkle_proof(&self, local_index: u64) -> Result<Vec<VotingTreeNode>> {
        self.node_at(local_index)?;
        let mut proof = Vec::with_capacity(self.depth as usize);
        let mut index = local_index;
        while index > 1 {
            let partner = if index % 2 == 0 { index + 1 } else { index - 1 };
            proof.push(*self.node_at(partner)?);
            index /= 2;
        }
        Ok(proof)
    }

    /// Pollard row `depth_per_round` levels below the node at `virtual_root_index`
    /// (clamped to the leaf level), together with that root node.
    fn pollard(&self, virtual_root_index: u64) -> Result<(VotingTreeNode, Vec<VotingTreeNode>)> {
        let index = self.local_from_virtual(virtual_root_index)?;
        let root = *self.node_at(index)?;

        let root_level = level_of(index);
        let absolute_depth = root_level.saturating_add(self.depth_per_round).min(self.depth);
        let relative_depth = absolute_depth.saturating_sub(root_level);

        let size = 1u64 << relative_depth;
        let first = index * size - 1;
        let last = first + size;
        if last > self.nodes.len() as u64 {
            return Err(anyhow!("pollard [{}..{}) out of tree bounds", first, last));
        }
        Ok((root, self.nodes[first as usize..last as usize].to_vec()))
    }

    /// Local index of a virtual one. Errors if `virtual_index` is not in this subtree.
    fn local_from_virtual(&self, virtual_index: u64) -> Result<u64> {
        let root = self.virtual_root_index;
        if root <= 1 {
            return Ok(virtual_index);
        }
        let out_of_subtree = || {
            anyhow!(
                "index {} is not below the subtree root {}",
                virtual_index,
                root
            )
        };
        if virtual_index < root {
            return Err(out_of_subtree());
        }
        let shift = level_of(virtual_index) - level_of(root);
        if virtual_index >> shift != root {
            return Err(out_of_subtree());
        }
        let first_level_index = 1u64 << shift;
        Ok(first_level_index + (virtual_index - (root << shift)))
    }
}

/// Virtual index of a local index, given the virtual index of the local root.
fn virtual_from_local(local_index: u64, virtual_root_index: u64) -> u64 {
    if virtual_root_index <= 1 {
        return local_index;
    }
    let first_level_index = 1u64 << level_of(local_index);
    let offset = local_index - first_level_index;
    first_level_index * virtual_root_index + offset
}

/// Network-wide voting tree for one block; persisted by the tree cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkVotingTree {
    #[serde(flatten)]
    pub tree: VotingTree,
}

impl Deref for NetworkVotingTree {
    type Target = VotingTree;

    fn deref(&self) -> &VotingTree {
        &self.tree
    }
}

impl CachedArtifact for NetworkVotingTree {
    const KIND: &'static str = "network voting tree";
    type Key = u32;

    fn key(&self) -> u32 {
        self.tree.block_number
    }
    fn network(&self) -> &str {
        &self.tree.network
    }
    fn block_number(&self) -> u32 {
        self.tree.block_number
    }
    fn generator_version(&self) -> &str {
        &self.tree.generator_version
    }
    fn entry_matches(entry: &ChecksumEntry, key: u32) -> bool {
        block_entry_matches(entry, key)
    }
    fn own_filename(network: &str, key: u32) -> Option<String> {
        Some(artifact_filename(network, key))
    }
}

impl NetworkVotingTree {
    pub fn from_leaves(
        block_number: u32,
        network: &str,
        leaves: &[VotingTreeNode],
        virtual_root_index: u64,
        depth_per_round: u64,
    ) -> Self {
        Self {
            tree: VotingTree::from_leaves(block_number, network, leaves, virtual_root_index, depth_per_round),
        }
    }

    /// Network tree for a snapshot: one leaf per node in snapshot order, holding the
    /// total power delegated to that node.
    pub fn from_snapshot(snapshot: &VotingPowerSnapshot, depth_per_round: u64) -> Self {
        let mut delegated: HashMap<Address, u128> = HashMap::new();
        for info in &snapshot.voting_info {
            let vp = delegated.entry(info.delegate).or_insert(0);
            *vp = vp.saturating_add(info.voting_power);
        }

        let leaves: Vec<VotingTreeNode> = snapshot
            .voting_info
            .iter()
            .map(|info| leaf_for_balance(delegated.get(&info.node_address).copied().unwrap_or(0)))
            .collect();

        Self::from_leaves(
            snapshot.block_number,
            &snapshot.network,
            &leaves,
            1,
            depth_per_round,
        )
    }
}
