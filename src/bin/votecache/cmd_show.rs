use anyhow::{anyhow, Result};
use std::sync::Arc;

use votecache::metrics::CacheMetrics;
use votecache::store::{open_snapshot_store, Lookup};
use votecache::CacheConfig;

pub fn exec(cfg: &CacheConfig, block: u32, json: bool) -> Result<()> {
    let mut store = open_snapshot_store(cfg, Arc::new(CacheMetrics::new()))?;
    let (snap, filename) = match store.lookup(block)? {
        Lookup::Hit { artifact, filename } => (artifact, filename),
        Lookup::Miss(reason) => {
            return Err(anyhow!("no usable snapshot for block {}: {}", block, reason));
        }
    };

    let delegating = snap
        .voting_info
        .iter()
        .filter(|i| i.delegate != i.node_address)
        .count();

    if json {
        let v = serde_json::json!({
            "file": filename,
            "network": snap.network,
            "block_number": snap.block_number,
            "generator_version": snap.generator_version,
            "nodes": snap.voting_info.len(),
            "delegating_nodes": delegating,
            "total_voting_power": snap.total_voting_power().to_string(),
        });
        println!("{}", v);
    } else {
        println!("file              = {}", filename);
        println!("network           = {}", snap.network);
        println!("block_number      = {}", snap.block_number);
        println!("generator_version = {}", snap.generator_version);
        println!("nodes             = {}", snap.voting_info.len());
        println!("delegating_nodes  = {}", delegating);
        println!("total_power       = {}", snap.total_voting_power());
    }
    Ok(())
}
