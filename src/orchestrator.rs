//! orchestrator - cache-aside получение дерева голосов для блока.
//!
//! For block B:
//!   1. tree cache     - derived NetworkVotingTree for B; hit -> return
//!   2. snapshot cache - VotingPowerSnapshot for B; hit -> derive tree (no chain I/O), persist, return
//!   3. cold generation - query the chain for B, save the snapshot, derive + persist tree, return
//!
//! Anything failing in steps 1-2 (including a damaged index) is logged and escalates to
//! the next step. Only a failed chain query in step 3 reaches the caller. Persisting
//! freshly generated data is best-effort: the result is still returned.
//!
//! Node trees follow the same flow (node tree cache, then snapshot). Voting and
//! challenge helpers pick the network tree or a node tree by the virtual tree index.
//!
//! No timeouts here: step 3 blocks for as long as the chain source does.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::store::{
    open_node_tree_store, open_snapshot_store, open_tree_store, NodeTreeStore, SnapshotStore,
    TreeStore,
};
use crate::tree::{
    node_index_for_tree_index, tree_index_for_node, ChallengeArtifacts, NetworkVotingTree,
    NodeTreeKey, NodeVotingTree, PollardBuilder, VotingTree,
};
use crate::types::{Address, NodeVotingInfo, VotingPowerSnapshot, VotingTreeNode};
use crate::util::dec_u128;

/// Chain side of the tree generator: voting records of every node at a block.
pub trait VotingInfoSource {
    fn voting_info(&self, block_number: u32) -> Result<Vec<NodeVotingInfo>>;
}

/// Source of the block to use when the caller does not name one.
pub trait FinalizedBlockProvider {
    fn latest_finalized_block(&self) -> Result<u32>;
}

/// Everything the proposal transaction needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalArtifacts {
    pub block_number: u32,
    pub pollard: Vec<VotingTreeNode>,
    /// base64(zstd(JSON(pollard)))
    pub encoded_pollard: String,
}

/// What a node needs to vote on a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingArtifacts {
    pub block_number: u32,
    /// Position of the voter in the snapshot's voting info.
    pub node_index: u64,
    #[serde(with = "dec_u128")]
    pub total_delegated_power: u128,
    /// Merkle proof of the voter's leaf in the network tree.
    pub proof: Vec<VotingTreeNode>,
}

pub struct ProposalTreeManager<S, P, F> {
    cfg: CacheConfig,
    source: S,
    builder: P,
    finalized: F,
    snapshots: SnapshotStore,
    trees: TreeStore,
    node_trees: NodeTreeStore,
    metrics: Arc<CacheMetrics>,
}

impl<S, P, F> ProposalTreeManager<S, P, F>
where
    S: VotingInfoSource,
    P: PollardBuilder,
    F: FinalizedBlockProvider,
{
    /// Open both stores under `cfg.voting_dir` and wire in the collaborators.
    pub fn new(cfg: CacheConfig, source: S, builder: P, finalized: F) -> Result<Self> {
        let metrics = Arc::new(CacheMetrics::new());
        let snapshots = open_snapshot_store(&cfg, metrics.clone())
            .context("open voting info snapshot store")?;
        let trees = open_tree_store(&cfg, metrics.clone()).context("open network tree store")?;
        let node_trees =
            open_node_tree_store(&cfg, metrics.clone()).context("open node tree store")?;
        info!("proposal tree manager ready: {}", cfg);
        Ok(Self {
            cfg,
            source,
            builder,
            finalized,
            snapshots,
            trees,
            node_trees,
            metrics,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Requested block, or the latest finalized one.
    pub fn resolve_block(&self, block_number: Option<u32>) -> Result<u32> {
        match block_number {
            Some(b) => Ok(b),
            None => self
                .finalized
                .latest_finalized_block()
                .context("get latest finalized block"),
        }
    }

    /// Network voting tree for the block (cache-aside over tree and snapshot caches).
    pub fn get_network_tree(&mut self, block_number: Option<u32>) -> Result<NetworkVotingTree> {
        let block = self.resolve_block(block_number)?;
        self.network_tree_for(block, None)
    }

    /// Voting tree of the node at `node_index` in the block's voting info.
    pub fn get_node_tree(&mut self, block_number: Option<u32>, node_index: u64) -> Result<NodeVotingTree> {
        let block = self.resolve_block(block_number)?;
        self.node_tree_for(block, node_index, None)
    }

    /// Network tree for `block`; `snapshot` (if given) spares a second snapshot lookup.
    fn network_tree_for(
        &mut self,
        block: u32,
        snapshot: Option<&VotingPowerSnapshot>,
    ) -> Result<NetworkVotingTree> {
        // 1) готовое дерево
        match self.trees.load(block) {
            Ok(Some(tree)) => {
                self.metrics.record_tree_cache_hit();
                return Ok(tree);
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_degraded_step();
                warn!("loading network tree for block {} failed, it must be rebuilt: {:#}", block, e);
            }
        }

        // 2-3) снапшот (из кэша или из цепи), затем дерево
        let loaded;
        let snapshot = match snapshot {
            Some(s) => s,
            None => {
                loaded = self.get_snapshot(Some(block))?;
                &loaded
            }
        };
        let tree = NetworkVotingTree::from_snapshot(snapshot, self.cfg.depth_per_round);
        if let Err(e) = self.trees.save(&tree) {
            self.metrics.record_degraded_step();
            warn!("saving network tree for block {} failed: {:#}", block, e);
        }
        Ok(tree)
    }

    fn node_tree_for(
        &mut self,
        block: u32,
        node_index: u64,
        snapshot: Option<&VotingPowerSnapshot>,
    ) -> Result<NodeVotingTree> {
        let key = NodeTreeKey {
            block_number: block,
            node_index,
        };
        match self.node_trees.load(key) {
            Ok(Some(tree)) => {
                self.metrics.record_tree_cache_hit();
                return Ok(tree);
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_degraded_step();
                warn!("loading node tree ({}) failed, it must be rebuilt: {:#}", key, e);
            }
        }

        let loaded;
        let snapshot = match snapshot {
            Some(s) => s,
            None => {
                loaded = self.get_snapshot(Some(block))?;
                &loaded
            }
        };
        let tree = NodeVotingTree::from_snapshot(snapshot, node_index, self.cfg.depth_per_round)?;
        if let Err(e) = self.node_trees.save(&tree) {
            self.metrics.record_degraded_step();
            warn!("saving node tree ({}) failed: {:#}", key, e);
        }
        Ok(tree)
    }

    /// Tree that holds virtual index `tree_index`: the network tree down to its
    /// leaves, below them the owning node's tree.
    fn tree_for_index(&mut self, block: u32, tree_index: u64) -> Result<VotingTree> {
        let snapshot = self.get_snapshot(Some(block))?;
        match node_index_for_tree_index(snapshot.voting_info.len(), tree_index)? {
            None => Ok(self.network_tree_for(block, Some(&snapshot))?.tree),
            Some(node_index) => Ok(self.node_tree_for(block, node_index, Some(&snapshot))?.tree),
        }
    }

    /// Delegated power, node index and network Merkle proof for `node_address`.
    pub fn artifacts_for_voting(&mut self, block_number: u32, node_address: Address) -> Result<VotingArtifacts> {
        let snapshot = self.get_snapshot(Some(block_number))?;
        let node_index = snapshot
            .voting_info
            .iter()
            .position(|i| i.node_address == node_address)
            .ok_or_else(|| {
                anyhow!(
                    "node {} is not in the voting info for block {}",
                    node_address,
                    block_number
                )
            })? as u64;

        let network = self.network_tree_for(block_number, Some(&snapshot))?;
        let node_tree = self.node_tree_for(block_number, node_index, Some(&snapshot))?;
        let tree_index = tree_index_for_node(snapshot.voting_info.len(), node_index);
        let proof = network
            .merkle_proof(tree_index)
            .with_context(|| format!("merkle proof for node index {}", node_index))?;

        Ok(VotingArtifacts {
            block_number,
            node_index,
            total_delegated_power: node_tree.delegated_power(),
            proof,
        })
    }

    /// Root and pollard answering a challenge against `challenged_index`.
    pub fn artifacts_for_challenge_response(
        &mut self,
        block_number: u32,
        challenged_index: u64,
    ) -> Result<(VotingTreeNode, Vec<VotingTreeNode>)> {
        self.tree_for_index(block_number, challenged_index)?
            .artifacts_for_challenge_response(challenged_index)
    }

    /// Compare a submitted pollard rooted at `index` with the local trees.
    /// Ok(None) when there is nothing to challenge.
    pub fn check_for_challengeable_artifacts(
        &mut self,
        block_number: u32,
        index: u64,
        proposed: &[VotingTreeNode],
    ) -> Result<Option<ChallengeArtifacts>> {
        self.tree_for_index(block_number, index)?
            .check_for_challengeable_artifacts(index, proposed)
            .context("check for challengeable artifacts")
    }

    /// Voting power snapshot for the block: cache first, then the chain.
    pub fn get_snapshot(&mut self, block_number: Option<u32>) -> Result<VotingPowerSnapshot> {
        let block = self.resolve_block(block_number)?;

        match self.snapshots.load(block) {
            Ok(Some(snapshot)) => {
                self.metrics.record_snapshot_cache_hit();
                return Ok(snapshot);
            }
            Ok(None) => {
                info!("voting info for block {} must be generated", block);
            }
            Err(e) => {
                self.metrics.record_degraded_step();
                warn!("loading voting info for block {} failed, it must be regenerated: {:#}", block, e);
            }
        }

        let snapshot = self.create_snapshot(block)?;
        if let Err(e) = self.snapshots.save(&snapshot) {
            self.metrics.record_degraded_step();
            warn!("saving voting info for block {} failed: {:#}", block, e);
        }
        Ok(snapshot)
    }

    /// Cold generation: the only step that touches the chain.
    pub fn create_snapshot(&mut self, block_number: u32) -> Result<VotingPowerSnapshot> {
        self.metrics.record_cold_generation();
        let records = self
            .source
            .voting_info(block_number)
            .map_err(|e| CacheError::ChainQuery {
                block: block_number,
                source: e,
            })?;
        info!(
            "generated voting info for block {} ({} nodes)",
            block_number,
            records.len()
        );
        Ok(VotingPowerSnapshot::new(
            self.cfg.network.clone(),
            block_number,
            records,
        ))
    }

    /// Pollard for a new proposal plus its transport encoding. No side effects on disk.
    pub fn create_artifacts_for_proposal(
        &mut self,
        snapshot: &VotingPowerSnapshot,
    ) -> Result<ProposalArtifacts> {
        let pollard = self.builder.build_pollard(&snapshot.voting_info);
        let encoded_pollard = encode_pollard(self.snapshots.codec_mut(), &pollard)?;
        Ok(ProposalArtifacts {
            block_number: snapshot.block_number,
            pollard,
            encoded_pollard,
        })
    }
}

/// base64(zstd(JSON(pollard))) using the given codec.
pub fn encode_pollard(
    codec: &mut crate::codec::Compressor,
    pollard: &[VotingTreeNode],
) -> Result<String> {
    let json = serde_json::to_vec(pollard).map_err(|e| CacheError::Serialization {
        what: "pollard",
        source: e,
    })?;
    let compressed = codec.encode(&json).context("compress pollard")?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

/// Inverse of `encode_pollard`.
pub fn decode_pollard(
    codec: &mut crate::codec::Compressor,
    encoded: &str,
) -> Result<Vec<VotingTreeNode>> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("base64 decode pollard")?;
    let json = codec.decode(&compressed).context("decompress pollard")?;
    serde_json::from_slice(&json).context("deserialize pollard")
}
