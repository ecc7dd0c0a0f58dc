use anyhow::{anyhow, Result};
use std::sync::Arc;

use votecache::metrics::CacheMetrics;
use votecache::store::{open_node_tree_store, open_tree_store};
use votecache::{CacheConfig, NodeTreeKey, VotingTree};

use super::util::short_hash;

fn load_tree(cfg: &CacheConfig, block: u32, node: Option<u64>) -> Result<VotingTree> {
    let metrics = Arc::new(CacheMetrics::new());
    match node {
        None => {
            let mut store = open_tree_store(cfg, metrics)?;
            let tree = store.load(block)?.ok_or_else(|| {
                anyhow!("no usable network tree for block {} in {}", block, store.dir().display())
            })?;
            Ok(tree.tree)
        }
        Some(node_index) => {
            let mut store = open_node_tree_store(cfg, metrics)?;
            let key = NodeTreeKey { block_number: block, node_index };
            let tree = store.load(key)?.ok_or_else(|| {
                anyhow!("no usable node tree ({}) in {}", key, store.dir().display())
            })?;
            Ok(tree.tree)
        }
    }
}

pub fn exec(cfg: &CacheConfig, block: u32, node: Option<u64>, challenge: Option<u64>, json: bool) -> Result<()> {
    let tree = load_tree(cfg, block, node)?;

    let (root, pollard) = match challenge {
        Some(index) => tree.artifacts_for_challenge_response(index)?,
        None => tree.pollard_for_proposal()?,
    };

    if json {
        let v = serde_json::json!({
            "block_number": tree.block_number,
            "virtual_root_index": tree.virtual_root_index,
            "depth": tree.depth,
            "depth_per_round": tree.depth_per_round,
            "root": root,
            "pollard": pollard,
        });
        println!("{}", v);
        return Ok(());
    }

    println!("block_number    = {}", tree.block_number);
    println!("virtual root    = {}", tree.virtual_root_index);
    println!("depth           = {}", tree.depth);
    println!("depth_per_round = {}", tree.depth_per_round);
    println!("root            = sum {} hash {}", root.sum, short_hash(&root));
    println!("pollard ({} nodes):", pollard.len());
    for (i, n) in pollard.iter().enumerate() {
        println!("  [{:>3}] sum {} hash {}", i, n.sum, short_hash(n));
    }
    Ok(())
}
