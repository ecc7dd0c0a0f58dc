//! Node voting trees: one tree per node, one leaf per network node holding the power
//! that node delegates to the tree's owner.
//!
//! Node `i`'s tree is the subtree of the virtual tree rooted at network leaf
//! `leaf_count + i`, so its virtual indices continue the network tree's numbering.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

use crate::index::{ChecksumEntry, FilenameScheme, ARTIFACT_SUFFIX};
use crate::store::CachedArtifact;
use crate::types::{Address, VotingPowerSnapshot};

use super::{leaf_count_for, leaf_for_balance, level_of, VotingTree};

/// Lookup key of a node tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeTreeKey {
    pub block_number: u32,
    pub node_index: u64,
}

impl fmt::Display for NodeTreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block={} node_index={}", self.block_number, self.node_index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVotingTree {
    /// Owner of the tree.
    pub address: Address,
    /// Owner's position in the snapshot's voting info.
    pub node_index: u64,
    #[serde(flatten)]
    pub tree: VotingTree,
}

impl Deref for NodeVotingTree {
    type Target = VotingTree;

    fn deref(&self) -> &VotingTree {
        &self.tree
    }
}

impl NodeVotingTree {
    /// Tree of the node at `node_index` in `snapshot.voting_info`.
    pub fn from_snapshot(
        snapshot: &VotingPowerSnapshot,
        node_index: u64,
        depth_per_round: u64,
    ) -> Result<Self> {
        let owner = snapshot
            .voting_info
            .get(node_index as usize)
            .ok_or_else(|| {
                anyhow!(
                    "node index {} out of range (block {} has {} nodes)",
                    node_index,
                    snapshot.block_number,
                    snapshot.voting_info.len()
                )
            })?
            .node_address;

        let leaves: Vec<_> = snapshot
            .voting_info
            .iter()
            .map(|info| {
                if info.delegate == owner {
                    leaf_for_balance(info.voting_power)
                } else {
                    leaf_for_balance(0)
                }
            })
            .collect();

        let virtual_root = tree_index_for_node(snapshot.voting_info.len(), node_index);
        Ok(Self {
            address: owner,
            node_index,
            tree: VotingTree::from_leaves(
                snapshot.block_number,
                &snapshot.network,
                &leaves,
                virtual_root,
                depth_per_round,
            ),
        })
    }

    /// Total power delegated to the owner.
    pub fn delegated_power(&self) -> u128 {
        self.root().sum
    }
}

impl CachedArtifact for NodeVotingTree {
    const KIND: &'static str = "node voting tree";
    const SCHEME: FilenameScheme = FilenameScheme::NodeTree;
    type Key = NodeTreeKey;

    fn key(&self) -> NodeTreeKey {
        NodeTreeKey {
            block_number: self.tree.block_number,
            node_index: self.node_index,
        }
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

    /// `node-tree-<block>-<address>-<node index>.json.zst`
    fn filename(&self) -> String {
        format!(
            "node-tree-{}-{}-{}{}",
            self.tree.block_number, self.address, self.node_index, ARTIFACT_SUFFIX
        )
    }

    fn entry_matches(entry: &ChecksumEntry, key: NodeTreeKey) -> bool {
        entry.block_number == key.block_number as u64 && entry.node_index == Some(key.node_index)
    }

    // Имя содержит адрес владельца, по ключу его не восстановить
    fn own_filename(_network: &str, _key: NodeTreeKey) -> Option<String> {
        None
    }
}

/// Network tree index of the leaf for node `node_index` (also the node tree's virtual root).
pub fn tree_index_for_node(node_count: usize, node_index: u64) -> u64 {
    leaf_count_for(node_count) + node_index
}

/// Which tree holds a virtual index: Ok(None) for the network tree (root down to and
/// including its leaves), Ok(Some(i)) for node `i`'s tree.
pub fn node_index_for_tree_index(node_count: usize, tree_index: u64) -> Result<Option<u64>> {
    if tree_index == 0 {
        return Err(anyhow!("tree index 0 is not a valid node"));
    }
    let leaf_count = leaf_count_for(node_count);
    let network_depth = leaf_count.trailing_zeros() as u64;
    let level = level_of(tree_index);
    if level <= network_depth {
        return Ok(None);
    }
    if level > 2 * network_depth {
        return Err(anyhow!(
            "tree index {} is below the node tree leaves (depth {})",
            tree_index,
            2 * network_depth
        ));
    }
    let node = (tree_index >> (level - network_depth)) - leaf_count;
    if node >= node_count as u64 {
        return Err(anyhow!(
            "tree index {} is under padding leaf {} (only {} nodes)",
            tree_index,
            leaf_count + node,
            node_count
        ));
    }
    Ok(Some(node))
}
