use anyhow::{anyhow, Result};
use std::sync::Arc;

use votecache::metrics::CacheMetrics;
use votecache::store::{open_node_tree_store, open_snapshot_store, open_tree_store, VerifyReport};
use votecache::CacheConfig;

pub fn exec(cfg: &CacheConfig, trees: bool, node_trees: bool, json: bool) -> Result<()> {
    let metrics = Arc::new(CacheMetrics::new());
    let report = if trees {
        open_tree_store(cfg, metrics)?.verify_all()?
    } else if node_trees {
        open_node_tree_store(cfg, metrics)?.verify_all()?
    } else {
        open_snapshot_store(cfg, metrics)?.verify_all()?
    };

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }

    if report.is_healthy() {
        Ok(())
    } else {
        Err(anyhow!("cache has damaged entries (see report)"))
    }
}

fn print_report(r: &VerifyReport) {
    for e in &r.entries {
        match (e.block_number, e.node_index) {
            (Some(b), Some(n)) => println!(
                "{:<18} block={:<12} node={:<6} {}",
                e.status.to_string(),
                b,
                n,
                e.filename
            ),
            (Some(b), None) => println!("{:<18} block={:<12} {}", e.status.to_string(), b, e.filename),
            (None, _) => println!("{:<18} {:<18} {}", e.status.to_string(), "-", e.filename),
        }
    }
    println!("Doctor:");
    println!("  ok                = {}", r.ok);
    println!("  missing           = {}", r.missing);
    println!("  checksum_mismatch = {}", r.checksum_mismatch);
    println!("  undecodable       = {}", r.undecodable);
    println!("  other_network     = {}", r.other_network);
    println!("  incompatible      = {}", r.incompatible);
    println!("  malformed         = {}", r.malformed);
}
