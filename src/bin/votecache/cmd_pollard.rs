use anyhow::{anyhow, Result};
use std::sync::Arc;

use votecache::codec::Compressor;
use votecache::metrics::CacheMetrics;
use votecache::orchestrator::{decode_pollard, encode_pollard};
use votecache::store::open_snapshot_store;
use votecache::{CacheConfig, PollardBuilder, ProposalArtifacts, TreeHashPollardBuilder};

pub fn exec(cfg: &CacheConfig, block: Option<u32>, decode: Option<String>) -> Result<()> {
    if let Some(encoded) = decode {
        let mut codec = Compressor::new(cfg.zstd_level)?;
        let pollard = decode_pollard(&mut codec, &encoded)?;
        println!("{}", serde_json::to_string_pretty(&pollard)?);
        return Ok(());
    }

    let block = block.ok_or_else(|| anyhow!("--block is required"))?;
    let mut store = open_snapshot_store(cfg, Arc::new(CacheMetrics::new()))?;
    let snap = store
        .load(block)?
        .ok_or_else(|| anyhow!("no usable snapshot for block {} in {}", block, store.dir().display()))?;

    // То же, что ProposalTreeManager::create_artifacts_for_proposal, без источника цепи
    let pollard = TreeHashPollardBuilder::new(cfg.depth_per_round).build_pollard(&snap.voting_info);
    let encoded_pollard = encode_pollard(store.codec_mut(), &pollard)?;
    let artifacts = ProposalArtifacts {
        block_number: snap.block_number,
        pollard,
        encoded_pollard,
    };
    println!("{}", serde_json::to_string_pretty(&artifacts)?);
    Ok(())
}
