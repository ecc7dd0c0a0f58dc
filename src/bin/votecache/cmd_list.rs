use anyhow::Result;
use std::sync::Arc;

use votecache::metrics::CacheMetrics;
use votecache::store::open_snapshot_store;
use votecache::CacheConfig;

use super::util::checksum_prefix;

pub fn exec(cfg: &CacheConfig, json: bool) -> Result<()> {
    let store = open_snapshot_store(cfg, Arc::new(CacheMetrics::new()))?;
    let entries = store.entries()?;

    if json {
        let arr: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "block_number": e.block_number,
                    "filename": e.filename,
                    "checksum": e.checksum_hex,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(arr));
        return Ok(());
    }

    if entries.is_empty() {
        println!("(no entries in {})", store.index().path().display());
        return Ok(());
    }
    for e in &entries {
        println!("{:>12}  {}  {}…", e.block_number, e.filename, checksum_prefix(&e.checksum_hex));
    }
    println!("{} entries", entries.len());
    Ok(())
}
